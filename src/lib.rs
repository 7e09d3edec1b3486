//! framestore - frame sequence cache and background preloader
//!
//! Random access to decoded frames of an extracted video for scrubbing viewers:
//! a spatially evicted frame cache, eager proxy frames, and a multi-anchor
//! background preloader with priority steering and generation-based cancellation.

pub mod cache;
pub mod cli;
pub mod config;
pub mod events;
pub mod frame;
pub mod preload;
pub mod scanner;
pub mod sidecar;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use cache::{CacheKey, CacheStats, FrameCache};
pub use config::{PathConfig, StoreConfig};
pub use events::{EventSender, PreloadEvent};
pub use frame::{Frame, FrameDecoder, FrameError, ImageDecoder};
pub use preload::Preloader;
pub use store::FrameStore;
