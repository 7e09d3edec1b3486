//! Preload progress events and their fan-out sender.
//!
//! Events are emitted from preload worker threads and delivered over unbounded
//! crossbeam channels, so workers never block on slow consumers. Consumers that
//! touch UI state must marshal events to their own thread.

use crossbeam::channel::{Receiver, Sender, unbounded};
use std::sync::{Arc, RwLock};

/// Events emitted by the preloader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadEvent {
    /// A frame was attempted in `generation`; `loaded` is false when decoding failed
    FramePreloaded {
        frame_idx: usize,
        loaded: bool,
        generation: u64,
    },

    /// Every frame of `generation` has been attempted
    Finished { generation: u64 },
}

impl PreloadEvent {
    pub fn generation(&self) -> u64 {
        match *self {
            PreloadEvent::FramePreloaded { generation, .. } => generation,
            PreloadEvent::Finished { generation } => generation,
        }
    }
}

/// Event sender wrapper shared by the store and its workers
///
/// Every subscriber gets its own channel. Subscribers whose receiver was
/// dropped are pruned on the next emit.
#[derive(Clone, Debug, Default)]
pub struct EventSender {
    subscribers: Arc<RwLock<Vec<Sender<PreloadEvent>>>>,
}

impl EventSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new subscriber channel
    pub fn subscribe(&self) -> Receiver<PreloadEvent> {
        let (tx, rx) = unbounded();
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Emit event (silent if no receiver); dropped receivers are pruned
    pub fn emit(&self, event: PreloadEvent) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|tx| tx.send(event).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
