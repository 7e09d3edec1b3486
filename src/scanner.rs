//! Frames folder scanning with natural ordering
//!
//! **Why**: Extracted frames are named `frame_1.png`, `frame_2.png`, ... `frame_10.png`
//! (sometimes unpadded), so plain string order would put frame 10 before frame 2.
//!
//! **Used by**: FrameStore (`load_folder`, proxy folder resolution)
//!
//! # Ordering
//!
//! A file name is split at digit runs: `Frame_010.PNG` → `["frame_", 10, ".png"]`.
//! Digit runs compare as integers of any length, text runs compare lowercased.
//! Names with identical keys (`a1` vs `a01`) fall back to the raw name.

use log::debug;
use regex::Regex;
use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::utils::media;

static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());

/// One segment of a natural sort key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Segment {
    /// Lowercased text run (possibly empty)
    Text(String),
    /// Digit run without leading zeros; `len` first so longer numbers sort higher
    Number { len: usize, digits: String },
}

impl Segment {
    fn number(run: &str) -> Self {
        let trimmed = run.trim_start_matches('0');
        Segment::Number {
            len: trimmed.len(),
            digits: trimmed.to_string(),
        }
    }
}

/// Build the natural sort key of a file name.
///
/// Keys always alternate text/number starting and ending with text, so two keys
/// never compare a number against a text run at the same position.
pub fn natural_key(name: &str) -> Vec<Segment> {
    let mut key = Vec::new();
    let mut last = 0;
    for m in DIGIT_RUN.find_iter(name) {
        key.push(Segment::Text(name[last..m.start()].to_lowercase()));
        key.push(Segment::number(m.as_str()));
        last = m.end();
    }
    key.push(Segment::Text(name[last..].to_lowercase()));
    key
}

/// Compare two file names in natural order (total: ties fall back to raw name)
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key(a).cmp(&natural_key(b)).then_with(|| a.cmp(b))
}

/// List frame files in `dir`, naturally sorted.
///
/// Non-recursive. Keeps regular files with a supported image suffix.
/// A missing directory yields an empty list; other I/O errors are returned.
pub fn scan(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let dir = match dir.canonicalize() {
        Ok(d) => d,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Scan: {} does not exist", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() || !media::is_image(&path) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        files.push((name, path));
    }

    // Precompute keys: sort_by would rebuild them O(n log n) times
    let mut keyed: Vec<(Vec<Segment>, String, PathBuf)> = files
        .into_iter()
        .map(|(name, path)| (natural_key(&name), name, path))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    debug!("Scan: {} frame files in {}", keyed.len(), dir.display());
    Ok(keyed.into_iter().map(|(_, _, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_natural_cmp_numbers() {
        assert_eq!(natural_cmp("frame_2.png", "frame_10.png"), Ordering::Less);
        assert_eq!(natural_cmp("frame_10.png", "frame_9.png"), Ordering::Greater);
        assert_eq!(natural_cmp("a2b10", "a2b9"), Ordering::Greater);
    }

    #[test]
    fn test_natural_cmp_case_insensitive_text() {
        assert_eq!(natural_cmp("B_1.png", "a_2.png"), Ordering::Greater);
        assert_eq!(natural_key("Frame_1.PNG"), natural_key("frame_1.png"));
    }

    #[test]
    fn test_natural_key_huge_digit_run() {
        // Longer than u64, still ordered numerically
        let a = "f_99999999999999999999999.png";
        let b = "f_100000000000000000000000.png";
        assert_eq!(natural_cmp(a, b), Ordering::Less);
    }

    #[test]
    fn test_natural_key_zero_padding_is_transparent() {
        assert_eq!(natural_key("frame_0007.png"), natural_key("frame_7.png"));
        assert_eq!(natural_key("frame_0000.png"), natural_key("frame_0.png"));
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        let files = scan(Path::new("/nonexistent/frames/dir")).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["f_10.png", "f_2.JPG", "f_1.webp", "notes.txt", "f_3.exr", "f_11.bmp"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("f_0.png")).unwrap(); // directory, not a file
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("f_5.png"), b"").unwrap();

        let files = scan(dir.path()).unwrap();
        assert_eq!(names(&files), vec!["f_1.webp", "f_2.JPG", "f_10.png", "f_11.bmp"]);
        assert!(files.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn test_scan_order_survives_zero_padding_rename() {
        let plain = tempfile::tempdir().unwrap();
        let padded = tempfile::tempdir().unwrap();
        for i in [1, 5, 12, 40, 100] {
            fs::write(plain.path().join(format!("shot{}_v{}.png", i, i % 3)), b"").unwrap();
            fs::write(padded.path().join(format!("shot{:05}_v{:03}.png", i, i % 3)), b"").unwrap();
        }

        let strip = |names: Vec<String>| -> Vec<Vec<Segment>> {
            names.iter().map(|n| natural_key(n)).collect()
        };
        let a = strip(names(&scan(plain.path()).unwrap()));
        let b = strip(names(&scan(padded.path()).unwrap()));
        assert_eq!(a, b);
    }
}
