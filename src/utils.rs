//! Utility functions and constants
//!
//! **Why**: Centralized helpers used across multiple modules
//!
//! **Used by**: scanner, frame modules

/// Media file type detection
pub mod media {
    use std::path::Path;

    /// Supported frame file extensions
    pub const IMAGE_EXTS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp"];

    /// Check if file is a supported frame image (suffix only, case-insensitive)
    pub fn is_image(path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .map(|s| IMAGE_EXTS.contains(&s.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_is_image() {
            assert!(is_image(Path::new("frame_0001.png")));
            assert!(is_image(Path::new("frame_0001.JPG")));
            assert!(is_image(Path::new("a/b/c.WebP")));
            assert!(is_image(Path::new("x.jpeg")));
            assert!(is_image(Path::new("x.bmp")));
            assert!(!is_image(Path::new("x.exr")));
            assert!(!is_image(Path::new("x.json")));
            assert!(!is_image(Path::new("png")));
        }
    }
}
