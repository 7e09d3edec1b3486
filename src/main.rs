use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use std::time::{Duration, Instant};

use framestore::cli::Args;
use framestore::config::{CONFIG_FILE, PathConfig, StoreConfig};
use framestore::{FrameStore, PreloadEvent};

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .as_ref()
            .cloned()
            .unwrap_or_else(|| path_config.config_file("framestore.log"));
        if let Some(dir) = log_path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Respects RUST_LOG if set
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    init_logging(&args, &path_config)?;
    debug!("Command-line args: {:?}", args);

    let config_path = path_config.config_file(CONFIG_FILE);
    let mut config = StoreConfig::load(&config_path);
    if let Some(radius) = args.radius {
        config.frame_cache_radius = radius;
    }
    info!("Config: {} ({:?})", config_path.display(), config);

    let (mut store, events) = FrameStore::new(config);
    let started = Instant::now();
    let total = store.load_folder(&args.folder);
    if total == 0 {
        anyhow::bail!("No frames found in {}", args.folder.display());
    }
    let generation = store.preload_generation();

    if let Some(priority) = args.priority {
        store.request_preload_priority(priority);
    }

    println!(
        "{}: {} frames, proxies: {}, anchors: {:?}",
        args.folder.display(),
        total,
        if store.has_proxy_frames() { "yes" } else { "no" },
        store.anchors()
    );

    let mut failed = 0usize;
    let mut attempted = 0usize;
    let mut next_report = total / 10;
    loop {
        match events.recv_timeout(Duration::from_secs(30)) {
            Ok(PreloadEvent::FramePreloaded { loaded, generation: g, .. }) if g == generation => {
                attempted += 1;
                if !loaded {
                    failed += 1;
                }
                if attempted >= next_report {
                    info!("Preload {}/{}", attempted, total);
                    next_report = attempted + (total / 10).max(1);
                }
            }
            Ok(PreloadEvent::Finished { generation: g }) if g == generation => break,
            Ok(_) => {}
            Err(e) => {
                store.shutdown();
                anyhow::bail!("Preload stalled after {}/{} frames: {}", attempted, total, e);
            }
        }
    }

    let (loaded, _) = store.preload_progress();
    println!(
        "Preloaded {}/{} frames ({} failed) in {:.2?}",
        loaded,
        total,
        failed,
        started.elapsed()
    );

    if let Some(idx) = args.frame {
        match store.get_frame(idx, args.proxy) {
            Some(frame) => println!("Frame {}: {}x{}", idx, frame.width(), frame.height()),
            None => println!("Frame {}: unavailable", idx),
        }
        if let Some((w, h)) = store.get_display_size(idx) {
            println!("Frame {} display size: {}x{}", idx, w, h);
        }
    }

    store.shutdown();
    Ok(())
}
