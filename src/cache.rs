//! Decoded frame cache with spatial (distance-from-playhead) eviction
//!
//! **Why**: Scrubbing moves the playhead back and forth around one spot. Plain LRU
//! churns under that pattern; keeping a window of `2R+1` full-resolution frames
//! centered on the last accessed frame keeps both sides of the playhead resident.
//!
//! **Used by**: FrameStore (`get_frame`, `get_display_size`, `load_folder`)
//!
//! # Layout
//!
//! - **IndexMap**: insertion order doubles as recency; a hit moves the key to the back
//! - **Base entries** (`is_proxy = false`): capped at `2R+1`, evicted farthest-first
//! - **Proxy entries** (`is_proxy = true`): filled eagerly on load, never evicted
//! - **Base sizes**: full-resolution dimensions per frame, recorded once
//!
//! # Threading
//!
//! The cache is owned by the caller thread. It never talks to preload workers
//! directly; the store hands it a resolver closure over the preloaded image table.

use indexmap::IndexMap;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::frame::{Frame, FrameDecoder};

/// Cache key: proxy flag + frame index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub is_proxy: bool,
    pub frame_idx: usize,
}

impl CacheKey {
    pub fn base(frame_idx: usize) -> Self {
        Self {
            is_proxy: false,
            frame_idx,
        }
    }

    pub fn proxy(frame_idx: usize) -> Self {
        Self {
            is_proxy: true,
            frame_idx,
        }
    }
}

/// Cache statistics for monitoring performance
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    decodes: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode(&self) {
        self.decodes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Disk decodes performed by the cache itself (proxies, misses, prefetch)
    pub fn decodes(&self) -> u64 {
        self.decodes.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.decodes.store(0, Ordering::Relaxed);
    }
}

/// Where cache fills come from.
///
/// `resolve_full` looks up the preloader's image table; it is consulted before
/// any full-resolution disk decode.
pub struct FrameSources<'a> {
    pub frame_files: &'a [PathBuf],
    pub proxy_files: &'a [PathBuf],
    pub resolve_full: &'a dyn Fn(usize) -> Option<Frame>,
    pub decoder: &'a dyn FrameDecoder,
}

impl FrameSources<'_> {
    fn files(&self, is_proxy: bool) -> &[PathBuf] {
        if is_proxy { self.proxy_files } else { self.frame_files }
    }
}

/// Decoded frame cache
#[derive(Debug)]
pub struct FrameCache {
    entries: IndexMap<CacheKey, Frame>,
    base_sizes: HashMap<usize, (u32, u32)>,
    base_len: usize,
    proxy_filled: bool,
    radius: usize,
    stats: CacheStats,
}

impl FrameCache {
    /// Create cache keeping at most `2 * radius + 1` full-resolution frames
    pub fn new(radius: usize) -> Self {
        debug!("FrameCache created: radius={}, capacity={}", radius, 2 * radius + 1);
        Self {
            entries: IndexMap::new(),
            base_sizes: HashMap::new(),
            base_len: 0,
            proxy_filled: false,
            radius,
            stats: CacheStats::default(),
        }
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    /// Maximum number of full-resolution entries
    pub fn base_capacity(&self) -> usize {
        2 * self.radius + 1
    }

    /// Total entries (base + proxy)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of full-resolution entries
    pub fn base_len(&self) -> usize {
        self.base_len
    }

    /// Number of proxy entries
    pub fn proxy_len(&self) -> usize {
        self.entries.len() - self.base_len
    }

    pub fn proxy_filled(&self) -> bool {
        self.proxy_filled
    }

    /// Check presence without touching recency
    pub fn contains(&self, key: CacheKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Resident full-resolution frame indices, oldest first
    pub fn base_indices(&self) -> Vec<usize> {
        self.entries
            .keys()
            .filter(|k| !k.is_proxy)
            .map(|k| k.frame_idx)
            .collect()
    }

    /// Memoised full-resolution size, if observed
    pub fn base_size(&self, idx: usize) -> Option<(u32, u32)> {
        self.base_sizes.get(&idx).copied()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Drop all entries and memoised sizes (sequence change)
    pub fn clear(&mut self) {
        self.entries.clear();
        self.base_sizes.clear();
        self.base_len = 0;
        self.proxy_filled = false;
        self.stats.reset();
    }

    /// Decode every proxy frame into the cache. No-op if empty or already filled.
    pub fn preload_proxy(&mut self, proxy_files: &[PathBuf], decoder: &dyn FrameDecoder) {
        if proxy_files.is_empty() || self.proxy_filled {
            return;
        }

        let mut failed = 0;
        for (idx, path) in proxy_files.iter().enumerate() {
            self.stats.record_decode();
            match decoder.decode(path) {
                Ok(frame) => self.insert(CacheKey::proxy(idx), frame),
                Err(e) => {
                    failed += 1;
                    debug!("Proxy {} failed: {}", idx, e);
                }
            }
        }
        self.proxy_filled = true;

        info!(
            "Proxy frames cached: {} of {} ({} failed)",
            proxy_files.len() - failed,
            proxy_files.len(),
            failed
        );
    }

    /// Get frame `idx`, filling on miss.
    ///
    /// Proxies are used iff `use_proxy` and the sequence has proxies. Every lookup,
    /// hit or miss, refreshes the resident window around `idx`.
    pub fn get(&mut self, idx: usize, use_proxy: bool, src: &FrameSources) -> Option<Frame> {
        let is_proxy = use_proxy && !src.proxy_files.is_empty();
        if idx >= src.files(is_proxy).len() {
            return None;
        }

        let key = CacheKey { is_proxy, frame_idx: idx };
        if let Some(frame) = self.touch(key) {
            self.stats.record_hit();
            self.prefetch_neighbors(idx, is_proxy, src);
            return Some(frame);
        }

        self.stats.record_miss();
        let frame = self.fill(idx, is_proxy, src)?;
        self.insert(key, frame.clone());
        self.evict_around(idx);
        self.prefetch_neighbors(idx, is_proxy, src);
        Some(frame)
    }

    /// Fill absent keys in `[center - R, center + R]`, then enforce the bound
    pub fn prefetch_neighbors(&mut self, center: usize, is_proxy: bool, src: &FrameSources) {
        let total = src.files(is_proxy).len();
        if total == 0 || self.radius == 0 {
            self.evict_around(center);
            return;
        }

        let lo = center.saturating_sub(self.radius);
        let hi = center.saturating_add(self.radius).min(total - 1);
        for idx in lo..=hi {
            let key = CacheKey { is_proxy, frame_idx: idx };
            if self.entries.contains_key(&key) {
                continue;
            }
            if let Some(frame) = self.fill(idx, is_proxy, src) {
                self.insert(key, frame);
            }
        }

        self.evict_around(center);
    }

    /// Full-resolution size of frame `idx`.
    ///
    /// Order: memo, preloaded image (size only), then a forced full-resolution `get`.
    pub fn get_display_size(&mut self, idx: usize, src: &FrameSources) -> Option<(u32, u32)> {
        if idx >= src.frame_files.len() {
            return None;
        }
        if let Some(size) = self.base_size(idx) {
            return Some(size);
        }
        if let Some(frame) = (src.resolve_full)(idx) {
            return Some(*self.base_sizes.entry(idx).or_insert(frame.resolution()));
        }
        self.get(idx, false, src)?;
        self.base_size(idx)
    }

    /// Remove base entries until at most `2R+1` remain, farthest from `center` first.
    ///
    /// Ties on distance remove the later-inserted key. With `R == 0` the base cache
    /// is disabled and all base entries go.
    pub fn evict_around(&mut self, center: usize) {
        if self.radius == 0 {
            if self.base_len > 0 {
                self.entries.retain(|k, _| k.is_proxy);
                self.base_len = 0;
            }
            return;
        }

        let capacity = self.base_capacity();
        while self.base_len > capacity {
            let victim = self
                .entries
                .keys()
                .enumerate()
                .filter(|(_, k)| !k.is_proxy)
                .max_by_key(|(pos, k)| (k.frame_idx.abs_diff(center), *pos))
                .map(|(pos, _)| pos);

            let Some(pos) = victim else {
                break;
            };
            if let Some((key, _)) = self.entries.shift_remove_index(pos) {
                self.base_len -= 1;
                debug!("Evicted frame {} (center {})", key.frame_idx, center);
            }
        }
    }

    /// Promote an existing key to most-recent and return its frame
    fn touch(&mut self, key: CacheKey) -> Option<Frame> {
        let pos = self.entries.get_index_of(&key)?;
        let last = self.entries.len() - 1;
        self.entries.move_index(pos, last);
        self.entries.get(&key).cloned()
    }

    /// Produce a frame for `idx` without inserting it
    fn fill(&self, idx: usize, is_proxy: bool, src: &FrameSources) -> Option<Frame> {
        if !is_proxy {
            if let Some(frame) = (src.resolve_full)(idx) {
                return Some(frame);
            }
        }

        let path = src.files(is_proxy).get(idx)?;
        self.stats.record_decode();
        match src.decoder.decode(path) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("Failed to load frame {} (proxy={}): {}", idx, is_proxy, e);
                None
            }
        }
    }

    fn insert(&mut self, key: CacheKey, frame: Frame) {
        if !key.is_proxy {
            self.base_sizes
                .entry(key.frame_idx)
                .or_insert_with(|| frame.resolution());
        }
        if self.entries.insert(key, frame).is_none() && !key.is_proxy {
            self.base_len += 1;
        }
    }
}
