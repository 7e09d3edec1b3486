//! Frame store: the public façade over scanner, sidecar, cache and preloader
//!
//! **Why**: A viewer and a timeline want one object that answers "give me frame N"
//! and "how far along is loading", without knowing about workers or generations.
//!
//! **Used by**: Viewer/timeline front ends, CLI (`main.rs`)
//!
//! # Data flow
//!
//! `load_folder` → scan frames → sidecar (proxy folder, bookmarks) → clear cache →
//! fill proxies → start preload generation.
//!
//! `get_frame` → cache hit, or fill from the preloaded image table, or decode from
//! disk; every lookup refreshes the resident window around the requested frame.
//!
//! # Threading
//!
//! Methods are called from one thread. Preload events are delivered on crossbeam
//! channels from worker threads; see [`FrameStore::subscribe`].

use crossbeam::channel::Receiver;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::{FrameCache, FrameSources};
use crate::config::StoreConfig;
use crate::events::{EventSender, PreloadEvent};
use crate::frame::{Frame, FrameDecoder, ImageDecoder};
use crate::preload::Preloader;
use crate::scanner;
use crate::sidecar;

/// Frame sequence store
pub struct FrameStore {
    config: StoreConfig,
    decoder: Arc<dyn FrameDecoder>,
    events: EventSender,
    cache: FrameCache,
    preloader: Preloader,
    frames_folder: Option<PathBuf>,
    proxy_folder: Option<PathBuf>,
    sidecar_path: Option<PathBuf>,
    frame_files: Vec<PathBuf>,
    proxy_files: Vec<PathBuf>,
}

impl FrameStore {
    /// Create store with the default `image` decoder.
    ///
    /// Returns the store and a receiver for preload events.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use framestore::{FrameStore, PreloadEvent, StoreConfig};
    ///
    /// let (mut store, events) = FrameStore::new(StoreConfig::default());
    /// let total = store.load_folder("/videos/clip/frames");
    /// if let Some(frame) = store.get_frame(0, false) {
    ///     println!("{} frames, first is {}x{}", total, frame.width(), frame.height());
    /// }
    /// while let Ok(ev) = events.recv() {
    ///     if let PreloadEvent::Finished { .. } = ev {
    ///         break;
    ///     }
    /// }
    /// ```
    pub fn new(config: StoreConfig) -> (Self, Receiver<PreloadEvent>) {
        Self::with_decoder(config, Arc::new(ImageDecoder))
    }

    /// Create store with a custom decoder
    pub fn with_decoder(
        config: StoreConfig,
        decoder: Arc<dyn FrameDecoder>,
    ) -> (Self, Receiver<PreloadEvent>) {
        let events = EventSender::new();
        let rx = events.subscribe();
        let store = Self {
            cache: FrameCache::new(config.frame_cache_radius),
            preloader: Preloader::new(Arc::clone(&decoder), events.clone()),
            config,
            decoder,
            events,
            frames_folder: None,
            proxy_folder: None,
            sidecar_path: None,
            frame_files: Vec::new(),
            proxy_files: Vec::new(),
        };
        (store, rx)
    }

    /// Additional receiver for preload events
    pub fn subscribe(&self) -> Receiver<PreloadEvent> {
        self.events.subscribe()
    }

    /// Load a frames folder, replacing the current sequence. Returns the frame count.
    ///
    /// A running preload is cancelled first; its remaining events are never emitted.
    /// Missing or unreadable folders load as 0 frames.
    pub fn load_folder(&mut self, path: impl AsRef<Path>) -> usize {
        let folder = path.as_ref();
        self.preloader.cancel();
        self.reset_sequence();

        let frame_files = match scanner::scan(folder) {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to scan {}: {}", folder.display(), e);
                Vec::new()
            }
        };
        let n = frame_files.len();
        if n == 0 {
            warn!("No frames in {}", folder.display());
            self.preloader.start(&[], &[]);
            return 0;
        }

        let meta = sidecar::read_sequence_meta(folder, n);
        let proxy_files = meta
            .proxy_dir
            .as_deref()
            .map(|dir| Self::scan_proxies(dir, n))
            .unwrap_or_default();

        self.frames_folder = Some(folder.canonicalize().unwrap_or_else(|_| folder.to_path_buf()));
        if !proxy_files.is_empty() {
            self.proxy_folder = meta.proxy_dir.clone();
        }
        self.sidecar_path = meta.sidecar_path.clone();
        self.frame_files = frame_files;
        self.proxy_files = proxy_files;

        self.cache.preload_proxy(&self.proxy_files, self.decoder.as_ref());
        let generation = self.preloader.start(&self.frame_files, &meta.anchors);

        info!(
            "Loaded {}: {} frames, proxies={}, sidecar={:?}, generation {}",
            folder.display(),
            n,
            self.has_proxy_frames(),
            self.sidecar_path,
            generation
        );
        n
    }

    /// Proxy list for `dir`, rejected (empty) unless it has exactly `n` frames
    fn scan_proxies(dir: &Path, n: usize) -> Vec<PathBuf> {
        match scanner::scan(dir) {
            Ok(files) if files.len() == n => files,
            Ok(files) => {
                info!(
                    "Ignoring proxies in {}: {} files for {} frames",
                    dir.display(),
                    files.len(),
                    n
                );
                Vec::new()
            }
            Err(e) => {
                warn!("Failed to scan proxies {}: {}", dir.display(), e);
                Vec::new()
            }
        }
    }

    fn reset_sequence(&mut self) {
        self.cache.clear();
        self.frames_folder = None;
        self.proxy_folder = None;
        self.sidecar_path = None;
        self.frame_files.clear();
        self.proxy_files.clear();
    }

    /// Frame `idx` for display; proxy if requested and available.
    ///
    /// `None` for out-of-range indices or undecodable frames.
    pub fn get_frame(&mut self, idx: usize, use_proxy: bool) -> Option<Frame> {
        if idx >= self.frame_files.len() {
            return None;
        }
        let preloader = &self.preloader;
        let resolve = |i: usize| preloader.image(i);
        let src = FrameSources {
            frame_files: &self.frame_files,
            proxy_files: &self.proxy_files,
            resolve_full: &resolve,
            decoder: self.decoder.as_ref(),
        };
        self.cache.get(idx, use_proxy, &src)
    }

    /// Full-resolution size of frame `idx`
    pub fn get_display_size(&mut self, idx: usize) -> Option<(u32, u32)> {
        if idx >= self.frame_files.len() {
            return None;
        }
        let preloader = &self.preloader;
        let resolve = |i: usize| preloader.image(i);
        let src = FrameSources {
            frame_files: &self.frame_files,
            proxy_files: &self.proxy_files,
            resolve_full: &resolve,
            decoder: self.decoder.as_ref(),
        };
        self.cache.get_display_size(idx, &src)
    }

    /// Steer the preload toward `idx` (clamped to `[0, N-1]`)
    pub fn request_preload_priority(&self, idx: i64) {
        let n = self.frame_files.len();
        if n == 0 {
            return;
        }
        let clamped = idx.clamp(0, (n - 1) as i64) as usize;
        self.preloader.set_priority(clamped);
    }

    /// Frame the preload is currently steered toward, if any
    pub fn preload_priority(&self) -> Option<usize> {
        self.preloader.priority()
    }

    /// Stop the preload and wait for workers
    pub fn shutdown(&mut self) {
        self.preloader.stop(true);
    }

    /// Stop the preload (waiting) and drop the whole sequence
    pub fn clear(&mut self) {
        self.preloader.reset();
        self.reset_sequence();
    }

    pub fn total_frames(&self) -> usize {
        self.frame_files.len()
    }

    pub fn has_proxy_frames(&self) -> bool {
        !self.proxy_files.is_empty()
    }

    /// Snapshot of per-frame preload state
    pub fn loaded_flags(&self) -> Vec<bool> {
        self.preloader.loaded_flags()
    }

    pub fn is_frame_loaded(&self, idx: usize) -> bool {
        self.preloader.is_loaded(idx)
    }

    /// (preloaded, total)
    pub fn preload_progress(&self) -> (usize, usize) {
        (self.preloader.loaded_count(), self.total_frames())
    }

    pub fn is_preloading(&self) -> bool {
        self.preloader.is_running()
    }

    pub fn preload_generation(&self) -> u64 {
        self.preloader.generation()
    }

    /// Anchors the current preload was seeded with
    pub fn anchors(&self) -> &[usize] {
        self.preloader.anchors()
    }

    pub fn frames_folder(&self) -> Option<&Path> {
        self.frames_folder.as_deref()
    }

    pub fn proxy_folder(&self) -> Option<&Path> {
        self.proxy_folder.as_deref()
    }

    pub fn sidecar_path(&self) -> Option<&Path> {
        self.sidecar_path.as_deref()
    }

    pub fn frame_path(&self, idx: usize) -> Option<&Path> {
        self.frame_files.get(idx).map(PathBuf::as_path)
    }

    pub fn frame_files(&self) -> &[PathBuf] {
        &self.frame_files
    }

    pub fn proxy_files(&self) -> &[PathBuf] {
        &self.proxy_files
    }

    /// Read-only view of the cache (stats, residency)
    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    /// Cache radius R; at most `2R+1` full-resolution frames stay resident
    pub fn radius(&self) -> usize {
        self.cache.radius()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Internal consistency of the preload table (`loaded[i] == image[i].is_some()`)
    pub fn is_consistent(&self) -> bool {
        self.preloader.is_consistent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn write_png(path: &Path, w: u32, h: u32) {
        image::RgbaImage::from_pixel(w, h, image::Rgba([1, 2, 3, 255]))
            .save(path)
            .unwrap();
    }

    fn wait_finished(rx: &Receiver<PreloadEvent>, generation: u64) -> bool {
        while let Ok(ev) = rx.recv_timeout(Duration::from_secs(10)) {
            if ev == (PreloadEvent::Finished { generation }) {
                return true;
            }
        }
        false
    }

    #[test]
    fn test_missing_folder_loads_nothing() {
        let (mut store, rx) = FrameStore::new(StoreConfig::with_radius(2));
        assert_eq!(store.load_folder("/nonexistent/frames"), 0);
        assert_eq!(store.total_frames(), 0);
        assert!(store.get_frame(0, false).is_none());
        assert!(store.get_display_size(0).is_none());
        store.request_preload_priority(-5);
        assert!(store.loaded_flags().is_empty());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_load_get_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().join("frames");
        fs::create_dir(&frames).unwrap();
        for i in 0..6 {
            write_png(&frames.join(format!("frame_{}.png", i)), 4 + i, 3);
        }

        let (mut store, rx) = FrameStore::new(StoreConfig::with_radius(1));
        assert_eq!(store.load_folder(&frames), 6);
        assert_eq!(store.anchors(), &[0, 3, 5]);
        assert!(!store.has_proxy_frames());
        assert!(wait_finished(&rx, store.preload_generation()));
        assert_eq!(store.loaded_flags(), vec![true; 6]);
        assert_eq!(store.preload_progress(), (6, 6));

        let frame = store.get_frame(2, false).unwrap();
        assert_eq!(frame.resolution(), (6, 3));
        assert_eq!(store.get_display_size(5), Some((9, 3)));
        assert!(store.get_frame(6, false).is_none());
        assert!(store.cache().base_len() <= 3);
        // Everything came from the preloaded table
        assert_eq!(store.cache().stats().decodes(), 0);
    }

    #[test]
    fn test_clear_resets_state() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            write_png(&dir.path().join(format!("{}.png", i)), 2, 2);
        }

        let (mut store, _rx) = FrameStore::new(StoreConfig::with_radius(1));
        assert_eq!(store.load_folder(dir.path()), 3);
        store.get_frame(1, false).unwrap();
        store.clear();

        assert_eq!(store.total_frames(), 0);
        assert!(store.frames_folder().is_none());
        assert!(store.loaded_flags().is_empty());
        assert!(store.cache().is_empty());
        assert!(store.get_frame(1, false).is_none());
    }
}
