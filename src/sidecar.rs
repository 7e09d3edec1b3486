//! Sidecar metadata lookup (proxy folder + bookmark anchors)
//!
//! **Why**: The extraction step writes a JSON sidecar next to the video that names
//! the frames folder, the downscaled proxy folder and the user's bookmarks.
//! Proxies make scrubbing cheap, bookmarks tell the preloader where to start.
//!
//! **Used by**: FrameStore (`load_folder`)
//!
//! # Matching
//!
//! The sidecar lives in the frames folder's parent. A candidate matches when its
//! `frames` (or legacy `frames_path`) entry resolves to the same canonical path as
//! the frames folder. `*.dance_tracker.json` files are tried before other `*.json`.
//!
//! Nothing here writes to disk, and nothing here fails: unreadable or malformed
//! JSON simply does not match.

use log::debug;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Sibling proxy folder names, canonical first
pub const PROXY_DIR_NAMES: &[&str] = &["low_frames", "frames_mino"];

/// Preferred sidecar suffix
pub const SIDECAR_SUFFIX: &str = ".dance_tracker.json";

/// Fields consumed from the sidecar; everything else is ignored.
///
/// Known fields of the wrong type read as absent instead of failing the file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SidecarPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub frames: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub frames_path: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub low_frames: Option<String>,
    /// `{ "bookmarks": [...] }`, kept raw
    #[serde(default)]
    pub sequence: Value,
}

impl SidecarPayload {
    /// Raw bookmark entries; empty unless `sequence.bookmarks` is an array
    pub fn bookmarks(&self) -> &[Value] {
        self.sequence
            .get("bookmarks")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// A sidecar file matched to a frames folder
#[derive(Debug, Clone)]
pub struct Sidecar {
    pub path: PathBuf,
    pub payload: SidecarPayload,
}

impl Sidecar {
    /// Directory relative paths in the payload are resolved against
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Declared frames entry (`frames`, then legacy `frames_path`)
    pub fn frames_entry(&self) -> Option<&str> {
        non_empty(self.payload.frames.as_deref())
            .or_else(|| non_empty(self.payload.frames_path.as_deref()))
    }

    /// Declared proxy entry
    pub fn low_frames_entry(&self) -> Option<&str> {
        non_empty(self.payload.low_frames.as_deref())
    }
}

/// Everything the store needs from sidecar + sibling lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceMeta {
    pub sidecar_path: Option<PathBuf>,
    pub proxy_dir: Option<PathBuf>,
    pub anchors: Vec<usize>,
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Resolve a sidecar path entry: `~` expanded, relative paths joined onto `base`
pub fn expand_path(raw: &str, base: &Path) -> PathBuf {
    let expanded = if raw == "~" {
        dirs_next::home_dir().unwrap_or_else(|| PathBuf::from(raw))
    } else if let Some(rest) = raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
        match dirs_next::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(raw),
        }
    } else {
        PathBuf::from(raw)
    };

    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

fn read_payload(path: &Path) -> Option<SidecarPayload> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            debug!("Sidecar {}: read failed: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<SidecarPayload>(&text) {
        Ok(p) => Some(p),
        Err(e) => {
            debug!("Sidecar {}: parse failed: {}", path.display(), e);
            None
        }
    }
}

/// Candidate sidecars in `dir`: `*.dance_tracker.json` first, then other `*.json`
fn candidates(dir: &Path) -> Vec<PathBuf> {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let list = |pattern: String| -> Vec<PathBuf> {
        match glob::glob(&pattern) {
            Ok(paths) => paths.filter_map(Result::ok).filter(|p| p.is_file()).collect(),
            Err(e) => {
                debug!("Sidecar glob {} failed: {}", pattern, e);
                Vec::new()
            }
        }
    };

    let mut out = list(format!("{}/*{}", escaped, SIDECAR_SUFFIX));
    for path in list(format!("{}/*.json", escaped)) {
        if !out.contains(&path) {
            out.push(path);
        }
    }
    out
}

/// Find the sidecar whose frames entry points at `frames_dir`
pub fn find_sidecar(frames_dir: &Path) -> Option<Sidecar> {
    let target = frames_dir.canonicalize().ok()?;
    let parent = target.parent()?;

    for path in candidates(parent) {
        let Some(payload) = read_payload(&path) else {
            continue;
        };
        let sidecar = Sidecar { path, payload };
        let Some(entry) = sidecar.frames_entry() else {
            continue;
        };
        let resolved = expand_path(entry, sidecar.base_dir());
        if resolved.canonicalize().ok().as_deref() == Some(target.as_path()) {
            debug!("Sidecar matched: {}", sidecar.path.display());
            return Some(sidecar);
        }
    }
    None
}

/// Proxy folder: sidecar `low_frames` if it exists, else sibling `low_frames`, else `frames_mino`
pub fn resolve_proxy_dir(frames_dir: &Path, sidecar: Option<&Sidecar>) -> Option<PathBuf> {
    if let Some(sc) = sidecar {
        if let Some(entry) = sc.low_frames_entry() {
            let dir = expand_path(entry, sc.base_dir());
            if dir.is_dir() {
                return Some(dir);
            }
            debug!("Sidecar low_frames {} is not a directory", dir.display());
        }
    }

    let frames_dir = frames_dir
        .canonicalize()
        .unwrap_or_else(|_| frames_dir.to_path_buf());
    let parent = frames_dir.parent()?;
    PROXY_DIR_NAMES
        .iter()
        .map(|name| parent.join(name))
        .find(|dir| dir.is_dir() && *dir != frames_dir)
}

/// Unique bookmark frames in `[0, n)`, ascending. Malformed entries are skipped.
pub fn bookmark_anchors(sidecar: Option<&Sidecar>, n: usize) -> Vec<usize> {
    let Some(sidecar) = sidecar else {
        return Vec::new();
    };

    let anchors: BTreeSet<usize> = sidecar
        .payload
        .bookmarks()
        .iter()
        .filter_map(|entry| match entry {
            Value::Object(obj) => obj.get("frame").and_then(|f| f.as_i64()),
            other => other.as_i64(),
        })
        .filter_map(|frame| usize::try_from(frame).ok())
        .filter(|&frame| frame < n)
        .collect();

    anchors.into_iter().collect()
}

/// Sidecar lookup + proxy resolution + anchors in one pass
pub fn read_sequence_meta(frames_dir: &Path, n: usize) -> SequenceMeta {
    let sidecar = find_sidecar(frames_dir);
    SequenceMeta {
        sidecar_path: sidecar.as_ref().map(|sc| sc.path.clone()),
        proxy_dir: resolve_proxy_dir(frames_dir, sidecar.as_ref()),
        anchors: bookmark_anchors(sidecar.as_ref(), n),
    }
}
