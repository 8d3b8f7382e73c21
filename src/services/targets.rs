//! Target discovery
//!
//! Pulls YouTube URLs out of the text and markdown files in the links
//! directory and turns them into video or playlist targets.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, RotaError};

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://(?:www\.|m\.|music\.)?(?:youtube\.com|youtu\.be)/[^\s<>()\[\]"'`]+"#)
        .expect("valid regex")
});
static VIDEO_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid regex"));
static PLAYLIST_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{2,}$").expect("valid regex"));

const LINK_FILE_EXTENSIONS: &[&str] = &["txt", "md"];

/// Something the batch runner can work on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Video(String),
    Playlist(String),
}

impl Target {
    /// Parse a YouTube URL.
    ///
    /// Handles `watch?v=`, `youtu.be/`, `shorts/`, `embed/` and `live/` forms
    /// for videos, and `playlist?list=` for playlists. A watch URL that also
    /// carries `list=` is treated as the video.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim())
            .map_err(|e| RotaError::InvalidTarget(format!("{}: {}", raw, e)))?;
        let host = url.host_str().unwrap_or_default().to_lowercase();
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        let query = |key: &str| {
            url.query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
        };

        let target = if host == "youtu.be" {
            segments.first().map(|id| Target::Video(id.to_string()))
        } else if host.ends_with("youtube.com") {
            match segments.as_slice() {
                ["watch"] => query("v").map(Target::Video),
                ["playlist"] => query("list").map(Target::Playlist),
                ["shorts" | "embed" | "live" | "v", id, ..] => Some(Target::Video(id.to_string())),
                _ => None,
            }
        } else {
            None
        };

        match target {
            Some(target) if target.is_well_formed() => Ok(target),
            _ => Err(RotaError::InvalidTarget(raw.to_string())),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Target::Video(id) | Target::Playlist(id) => id,
        }
    }

    fn is_well_formed(&self) -> bool {
        match self {
            Target::Video(id) => VIDEO_ID_RE.is_match(id),
            Target::Playlist(id) => PLAYLIST_ID_RE.is_match(id),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Video(id) => write!(f, "video {}", id),
            Target::Playlist(id) => write!(f, "playlist {}", id),
        }
    }
}

/// Every target mentioned in `text`, in order of first appearance
pub fn extract_targets(text: &str) -> Vec<Target> {
    let mut seen = HashSet::new();
    URL_RE
        .find_iter(text)
        .filter_map(|m| {
            let raw = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
            match Target::parse(raw) {
                Ok(target) => Some(target),
                Err(e) => {
                    debug!("Ignoring link: {}", e);
                    None
                }
            }
        })
        .filter(|target| seen.insert(target.clone()))
        .collect()
}

/// Scan `.txt` and `.md` files in `dir` (sorted by name) for targets,
/// de-duplicated across files
pub fn scan_links_dir(dir: &Path) -> Result<Vec<Target>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| LINK_FILE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();

    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for file in &files {
        let text = match fs::read_to_string(file) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to read {}: {}", file.display(), e);
                continue;
            }
        };
        let found = extract_targets(&text);
        debug!("{}: {} targets", file.display(), found.len());
        targets.extend(found.into_iter().filter(|t| seen.insert(t.clone())));
    }

    info!(
        "Found {} targets in {} link files under {}",
        targets.len(),
        files.len(),
        dir.display()
    );
    Ok(targets)
}
