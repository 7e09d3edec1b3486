use clap::Parser;
use std::path::PathBuf;

// Build version with decoder info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Formats: png, jpg, jpeg, bmp, webp\n",
    "Target:  ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Load a frames folder, preload it in the background and report progress
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Frames folder (extracted video frames)
    #[arg(value_name = "FOLDER")]
    pub folder: PathBuf,

    /// Cache radius override (resident window is 2R+1 frames)
    #[arg(short = 'r', long = "radius", value_name = "N")]
    pub radius: Option<usize>,

    /// Steer the preload toward this frame right after loading
    #[arg(short = 'p', long = "priority", value_name = "N", allow_negative_numbers = true)]
    pub priority: Option<i64>,

    /// Also fetch this frame through the cache and print its size
    #[arg(long = "frame", value_name = "N")]
    pub frame: Option<usize>,

    /// Use proxy frames for --frame when available
    #[arg(long = "proxy")]
    pub proxy: bool,

    /// Enable logging to file (default: framestore.log in the config dir)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from([
            "framestore", "/tmp/frames", "-r", "10", "-p", "-3", "--frame", "4", "--proxy", "-vv",
        ])
        .unwrap();
        assert_eq!(args.folder, PathBuf::from("/tmp/frames"));
        assert_eq!(args.radius, Some(10));
        assert_eq!(args.priority, Some(-3));
        assert_eq!(args.frame, Some(4));
        assert!(args.proxy);
        assert_eq!(args.verbosity, 2);
        assert!(args.log_file.is_none());
    }

    #[test]
    fn test_log_flag_without_value() {
        let args = Args::try_parse_from(["framestore", "-l", "--", "/tmp/frames"]).unwrap();
        assert_eq!(args.log_file, Some(None));
    }
}
