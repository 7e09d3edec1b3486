//! Decoded frames and the decoder seam
//!
//! **Why**: The cache and the preloader both need decoded RGBA images, and both
//! must be able to share one decode without copying pixels.
//!
//! **Used by**: Cache (misses, prefetch, proxies), Preloader workers, FrameStore
//!
//! # Sharing
//!
//! `Frame` wraps the pixel buffer in an `Arc`, so a frame decoded by a preload
//! worker can sit in the image table and in the cache at the same time.
//!
//! # Decoding
//!
//! All decoding goes through [`FrameDecoder`]. [`ImageDecoder`] is the default and
//! reads PNG/JPEG/BMP/WebP through the `image` crate.

use image::RgbaImage;
use log::debug;
use std::path::Path;
use std::sync::Arc;

use crate::utils::media;

/// Single decoded frame (cheap to clone)
#[derive(Debug, Clone)]
pub struct Frame {
    pixels: Arc<RgbaImage>,
}

/// Frame decoding errors
#[derive(Debug)]
pub enum FrameError {
    Io(String),
    Image(String),
    UnsupportedFormat(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Io(e) => write!(f, "I/O error: {}", e),
            FrameError::Image(e) => write!(f, "Image error: {}", e),
            FrameError::UnsupportedFormat(e) => write!(f, "Unsupported format: {}", e),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<std::io::Error> for FrameError {
    fn from(e: std::io::Error) -> Self {
        FrameError::Io(e.to_string())
    }
}

impl Frame {
    /// Wrap an already decoded RGBA image
    pub fn from_rgba(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Resolution as (width, height)
    pub fn resolution(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Raw RGBA pixels
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Size of the pixel buffer in bytes
    pub fn mem(&self) -> usize {
        self.pixels.as_raw().len()
    }

    /// True if both handles point at the same pixel buffer
    pub fn ptr_eq(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

/// Decodes an image file into a [`Frame`].
///
/// Implementations must be callable from several preload workers at once.
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<Frame, FrameError>;
}

/// Default decoder backed by the `image` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDecoder;

impl FrameDecoder for ImageDecoder {
    fn decode(&self, path: &Path) -> Result<Frame, FrameError> {
        if !media::is_image(path) {
            return Err(FrameError::UnsupportedFormat(path.display().to_string()));
        }

        let bytes = std::fs::read(path)?;
        let img = image::load_from_memory(&bytes)
            .map_err(|e| FrameError::Image(format!("{}: {}", path.display(), e)))?;

        let frame = Frame::from_rgba(img.into_rgba8());
        debug!(
            "Decoded {} ({}x{})",
            path.display(),
            frame.width(),
            frame.height()
        );
        Ok(frame)
    }
}
