//! Background preloader: decodes the whole sequence into an image table
//!
//! **Why**: A single worker starting at frame 0 leaves the tail cold, so a jump to
//! the end waits for a full pass. One worker is seeded per anchor (start, middle,
//! end, bookmarks) and all of them pull from one shared pending set, so they
//! cooperate instead of duplicating work.
//!
//! **Used by**: FrameStore (`load_folder`, `request_preload_priority`, `shutdown`)
//!
//! # Scheduling
//!
//! Each worker repeatedly takes the pending frame nearest to its hint. The hint is
//! its anchor until the user requests a priority frame; from then on every worker
//! steers toward the priority frame. Ties go to the lower index.
//!
//! # Generations
//!
//! Every `start` and every `stop` bumps the generation. A worker captures the
//! generation it was spawned for and re-checks it before decoding, before storing
//! and before emitting. Stores and emits happen under the state lock, and the
//! bump happens under the same lock, so once `stop` returns no worker of an older
//! generation can touch the table or emit.

use log::{debug, error, info, trace};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::events::{EventSender, PreloadEvent};
use crate::frame::{Frame, FrameDecoder, FrameError};

/// How long `stop(true)` waits for each worker before detaching it
pub const JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Hot state shared by the workers, guarded by one mutex
#[derive(Debug)]
struct PreloadState {
    images: Vec<Option<Frame>>,
    loaded: Vec<bool>,
    priority: Option<usize>,
    pending: BTreeSet<usize>,
    remaining_workers: usize,
    started: Instant,
}

impl PreloadState {
    fn empty() -> Self {
        Self {
            images: Vec::new(),
            loaded: Vec::new(),
            priority: None,
            pending: BTreeSet::new(),
            remaining_workers: 0,
            started: Instant::now(),
        }
    }

    /// Remove and return the pending index nearest to `target` (lower index on ties)
    fn take_nearest(&mut self, target: usize) -> Option<usize> {
        let below = self.pending.range(..=target).next_back().copied();
        let above = self.pending.range(target..).next().copied();
        let pick = match (below, above) {
            (Some(b), Some(a)) => {
                if target - b <= a - target { b } else { a }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };
        self.pending.remove(&pick);
        Some(pick)
    }
}

struct Shared {
    state: Mutex<PreloadState>,
    generation: AtomicU64,
    stop: AtomicBool,
    events: EventSender,
    decoder: Arc<dyn FrameDecoder>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PreloadState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.stop.load(Ordering::SeqCst) || self.generation.load(Ordering::SeqCst) != generation
    }

    /// Count a worker out; the last one of a live generation reports completion
    fn finish_worker(&self, generation: u64) {
        let mut st = self.lock();
        if self.is_stale(generation) {
            return;
        }
        st.remaining_workers = st.remaining_workers.saturating_sub(1);
        if st.remaining_workers == 0 {
            let loaded = st.loaded.iter().filter(|l| **l).count();
            info!(
                "Preload generation {} finished: {}/{} frames in {:.2?}",
                generation,
                loaded,
                st.loaded.len(),
                st.started.elapsed()
            );
            self.events.emit(PreloadEvent::Finished { generation });
        }
    }
}

/// Anchor list: `[0, n/2, n-1]` followed by bookmarks, deduplicated in order, all `< n`
pub fn build_anchors(n: usize, bookmarks: &[usize]) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let mut anchors = Vec::new();
    for anchor in [0, n / 2, n - 1].into_iter().chain(bookmarks.iter().copied()) {
        if anchor < n && !anchors.contains(&anchor) {
            anchors.push(anchor);
        }
    }
    anchors
}

/// Multi-anchor background preloader
pub struct Preloader {
    shared: Arc<Shared>,
    handles: Vec<thread::JoinHandle<()>>,
    anchors: Vec<usize>,
}

impl Preloader {
    pub fn new(decoder: Arc<dyn FrameDecoder>, events: EventSender) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PreloadState::empty()),
                generation: AtomicU64::new(0),
                stop: AtomicBool::new(false),
                events,
                decoder,
            }),
            handles: Vec::new(),
            anchors: Vec::new(),
        }
    }

    /// Start a new generation over `frame_files`; returns the generation number
    pub fn start(&mut self, frame_files: &[PathBuf], bookmark_anchors: &[usize]) -> u64 {
        let n = frame_files.len();
        let anchors = build_anchors(n, bookmark_anchors);

        let generation = {
            let mut st = self.shared.lock();
            // Bump before clearing the stop flag: cancelled workers must stay stale
            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.shared.stop.store(false, Ordering::SeqCst);
            st.images = vec![None; n];
            st.loaded = vec![false; n];
            st.priority = None;
            st.pending = (0..n).collect();
            st.remaining_workers = anchors.len();
            st.started = Instant::now();
            generation
        };

        info!(
            "Preload generation {}: {} frames, anchors {:?}",
            generation, n, anchors
        );

        // Workers of older generations exit on their own; keep only live handles
        self.handles.retain(|h| !h.is_finished());

        let files: Arc<[PathBuf]> = frame_files.into();
        for (worker_id, &anchor) in anchors.iter().enumerate() {
            let shared = Arc::clone(&self.shared);
            let files = Arc::clone(&files);

            let spawned = thread::Builder::new()
                .name(format!("framestore-preload-{}", worker_id))
                .spawn(move || run_worker(shared, files, anchor, generation));

            match spawned {
                Ok(handle) => self.handles.push(handle),
                Err(e) => {
                    error!("Failed to spawn preload worker {}: {}", worker_id, e);
                    self.shared.finish_worker(generation);
                }
            }
        }

        self.anchors = anchors;
        generation
    }

    /// Make running workers quit at their next check without bumping the generation.
    ///
    /// Used right before `start`, which does the bump; a reload therefore advances
    /// the generation by exactly one.
    pub fn cancel(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        debug!("Preload cancelled (generation {})", self.generation());
    }

    /// Cancel the running generation.
    ///
    /// `wait = true` joins workers, giving each up to [`JOIN_TIMEOUT`]; stragglers are
    /// detached. `wait = false` detaches immediately. Safe to call repeatedly.
    pub fn stop(&mut self, wait: bool) {
        self.shared.stop.store(true, Ordering::SeqCst);
        let generation = {
            let _st = self.shared.lock();
            self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        debug!("Preload stopped (generation now {}, wait={})", generation, wait);

        let handles = std::mem::take(&mut self.handles);
        if !wait {
            return;
        }

        let total = handles.len();
        let mut detached = 0;
        for handle in handles {
            let deadline = Instant::now() + JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                detached += 1;
            }
        }

        if detached > 0 {
            debug!("Preload join timeout: {} of {} workers detached", detached, total);
        } else {
            trace!("All {} preload workers stopped", total);
        }
    }

    /// Stop (waiting) and drop the image table
    pub fn reset(&mut self) {
        self.stop(true);
        *self.shared.lock() = PreloadState::empty();
        self.anchors.clear();
    }

    /// Steer every worker toward `idx` (clamped to the last frame)
    pub fn set_priority(&self, idx: usize) {
        let mut st = self.shared.lock();
        let n = st.loaded.len();
        if n == 0 {
            return;
        }
        st.priority = Some(idx.min(n - 1));
    }

    pub fn priority(&self) -> Option<usize> {
        self.shared.lock().priority
    }

    /// Preloaded full-resolution image, if any
    pub fn image(&self, idx: usize) -> Option<Frame> {
        self.shared.lock().images.get(idx).cloned().flatten()
    }

    /// Snapshot of the loaded flags
    pub fn loaded_flags(&self) -> Vec<bool> {
        self.shared.lock().loaded.clone()
    }

    pub fn is_loaded(&self, idx: usize) -> bool {
        self.shared.lock().loaded.get(idx).copied().unwrap_or(false)
    }

    pub fn loaded_count(&self) -> usize {
        self.shared.lock().loaded.iter().filter(|l| **l).count()
    }

    /// Frames not yet attempted in the current generation
    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn frame_count(&self) -> usize {
        self.shared.lock().loaded.len()
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// True while workers of the current generation are still draining
    pub fn is_running(&self) -> bool {
        !self.shared.stop.load(Ordering::SeqCst) && self.shared.lock().remaining_workers > 0
    }

    /// Anchors used by the last `start`
    pub fn anchors(&self) -> &[usize] {
        &self.anchors
    }

    /// Check the `loaded[i] == images[i].is_some()` invariant under one lock
    pub fn is_consistent(&self) -> bool {
        let st = self.shared.lock();
        st.images.len() == st.loaded.len()
            && st
                .images
                .iter()
                .zip(st.loaded.iter())
                .all(|(img, loaded)| img.is_some() == *loaded)
    }
}

impl Drop for Preloader {
    fn drop(&mut self) {
        self.stop(false);
    }
}

fn decode_guarded(decoder: &dyn FrameDecoder, path: &std::path::Path) -> Result<Frame, FrameError> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| decoder.decode(path)))
        .unwrap_or_else(|_| {
            error!("Decoder panicked on {}", path.display());
            Err(FrameError::Image(format!("decoder panicked on {}", path.display())))
        })
}

fn run_worker(shared: Arc<Shared>, files: Arc<[PathBuf]>, anchor: usize, generation: u64) {
    trace!("Preload worker started (anchor {}, generation {})", anchor, generation);

    loop {
        let idx = {
            let mut st = shared.lock();
            if shared.is_stale(generation) {
                return;
            }
            let target = st.priority.unwrap_or(anchor);
            match st.take_nearest(target) {
                Some(idx) => idx,
                None => break,
            }
        };

        if shared.is_stale(generation) {
            return;
        }

        let result = decode_guarded(shared.decoder.as_ref(), &files[idx]);

        let mut st = shared.lock();
        if shared.is_stale(generation) {
            return;
        }
        let loaded = match result {
            Ok(frame) => {
                st.images[idx] = Some(frame);
                st.loaded[idx] = true;
                true
            }
            Err(e) => {
                debug!("Preload frame {} failed: {}", idx, e);
                false
            }
        };
        shared.events.emit(PreloadEvent::FramePreloaded {
            frame_idx: idx,
            loaded,
            generation,
        });
    }

    shared.finish_worker(generation);
    trace!("Preload worker stopped (anchor {}, generation {})", anchor, generation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::Receiver;
    use image::RgbaImage;
    use std::path::Path;

    /// Synthetic decoder: `bad` in the name fails, everything else is 2x1.
    /// An optional delay slows every decode.
    struct FakeDecoder {
        delay: Duration,
    }

    impl FrameDecoder for FakeDecoder {
        fn decode(&self, path: &Path) -> Result<Frame, FrameError> {
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            if path.to_string_lossy().contains("bad") {
                return Err(FrameError::Image("bad".into()));
            }
            Ok(Frame::from_rgba(RgbaImage::new(2, 1)))
        }
    }

    fn preloader(delay_ms: u64) -> (Preloader, Receiver<PreloadEvent>) {
        let events = EventSender::new();
        let rx = events.subscribe();
        let decoder = Arc::new(FakeDecoder {
            delay: Duration::from_millis(delay_ms),
        });
        (Preloader::new(decoder, events), rx)
    }

    fn files(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("/f/{}.png", i))).collect()
    }

    /// Collect events until `Finished` or timeout
    fn drain_until_finished(rx: &Receiver<PreloadEvent>) -> Vec<PreloadEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.recv_timeout(Duration::from_secs(10)) {
            out.push(ev);
            if matches!(ev, PreloadEvent::Finished { .. }) {
                break;
            }
        }
        out
    }

    #[test]
    fn test_build_anchors() {
        assert_eq!(build_anchors(10, &[]), vec![0, 5, 9]);
        assert_eq!(build_anchors(100, &[10, 50, 80]), vec![0, 50, 99, 10, 80]);
        assert_eq!(build_anchors(1, &[0, 3]), vec![0]);
        assert_eq!(build_anchors(2, &[]), vec![0, 1]);
        assert!(build_anchors(0, &[1]).is_empty());
    }

    #[test]
    fn test_take_nearest_ties_to_lower() {
        let mut st = PreloadState::empty();
        st.pending = [2, 6, 9].into_iter().collect();
        assert_eq!(st.take_nearest(4), Some(2));
        assert_eq!(st.take_nearest(4), Some(6));
        assert_eq!(st.take_nearest(0), Some(9));
        assert_eq!(st.take_nearest(0), None);
    }

    #[test]
    fn test_every_frame_attempted_once() {
        let (mut pre, rx) = preloader(0);
        let mut list = files(40);
        list[7] = PathBuf::from("/f/bad.png");
        let generation = pre.start(&list, &[20, 33]);
        assert_eq!(generation, 1);
        assert_eq!(pre.anchors(), &[0, 20, 39, 33]);

        let events = drain_until_finished(&rx);
        assert_eq!(events.last(), Some(&PreloadEvent::Finished { generation: 1 }));

        let mut attempted: Vec<usize> = events
            .iter()
            .filter_map(|ev| match *ev {
                PreloadEvent::FramePreloaded { frame_idx, loaded, generation } => {
                    assert_eq!(generation, 1);
                    assert_eq!(loaded, frame_idx != 7);
                    Some(frame_idx)
                }
                PreloadEvent::Finished { .. } => None,
            })
            .collect();
        attempted.sort();
        assert_eq!(attempted, (0..40).collect::<Vec<_>>());

        let flags = pre.loaded_flags();
        assert_eq!(flags.iter().filter(|l| **l).count(), 39);
        assert!(!flags[7]);
        assert!(pre.image(7).is_none());
        assert!(pre.image(8).is_some());
        assert!(pre.is_consistent());
        assert!(!pre.is_running());

        // Finished is emitted exactly once
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_empty_sequence_emits_nothing() {
        let (mut pre, rx) = preloader(0);
        let generation = pre.start(&[], &[]);
        assert_eq!(generation, 1);
        assert_eq!(pre.frame_count(), 0);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        pre.set_priority(3);
        assert_eq!(pre.priority(), None);
    }

    #[test]
    fn test_stop_with_wait_silences_workers() {
        let (mut pre, rx) = preloader(5);
        pre.start(&files(500), &[]);
        thread::sleep(Duration::from_millis(20));

        pre.stop(true);
        pre.stop(true);
        assert_eq!(pre.generation(), 3);
        while rx.try_recv().is_ok() {}

        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err());
        assert!(pre.is_consistent());
        assert!(pre.pending_count() > 0);
    }

    #[test]
    fn test_restart_invalidates_previous_generation() {
        let (mut pre, rx) = preloader(2);
        pre.start(&files(300), &[]);
        thread::sleep(Duration::from_millis(5));
        pre.stop(false);
        let second = pre.start(&files(20), &[]);
        assert_eq!(second, 3);

        // Everything still in the channel from generation 1 was sent before the bump
        let mut seen_second = false;
        while let Ok(ev) = rx.recv_timeout(Duration::from_secs(10)) {
            if ev.generation() == second {
                seen_second = true;
            } else {
                assert!(!seen_second, "stale event after current generation events");
                assert!(!matches!(ev, PreloadEvent::Finished { .. }));
            }
            if ev == (PreloadEvent::Finished { generation: second }) {
                break;
            }
        }
        assert!(seen_second);
        assert_eq!(pre.loaded_flags().len(), 20);
        assert_eq!(pre.loaded_count(), 20);
    }

    #[test]
    fn test_cancel_then_start_bumps_once() {
        let (mut pre, rx) = preloader(2);
        assert_eq!(pre.start(&files(200), &[]), 1);
        pre.cancel();
        assert!(!pre.is_running());
        assert_eq!(pre.start(&files(10), &[]), 2);

        let events = drain_until_finished(&rx);
        assert_eq!(events.last(), Some(&PreloadEvent::Finished { generation: 2 }));
        assert!(!events.contains(&PreloadEvent::Finished { generation: 1 }));
        assert_eq!(pre.loaded_count(), 10);
    }

    #[test]
    fn test_priority_steers_workers() {
        let (mut pre, rx) = preloader(3);
        pre.start(&files(400), &[]);
        pre.set_priority(300);
        assert_eq!(pre.priority(), Some(300));

        let mut near = 0;
        let mut seen = 0;
        while seen < 30 {
            match rx.recv_timeout(Duration::from_secs(10)) {
                Ok(PreloadEvent::FramePreloaded { frame_idx, .. }) => {
                    seen += 1;
                    if frame_idx.abs_diff(300) <= 20 {
                        near += 1;
                    }
                }
                Ok(PreloadEvent::Finished { .. }) | Err(_) => break,
            }
        }
        assert!(near >= 20, "only {} of {} near priority", near, seen);
        pre.stop(true);
    }
}
