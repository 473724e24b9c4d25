//! Stock media search capability.

pub mod coverr;
pub mod pexels;
pub mod pixabay;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ProviderResult;

/// A search hit that can be downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCandidate {
    /// Provider-scoped identifier, used for deduplication
    pub source_id: String,
    /// Download URL
    pub media_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Portrait => "portrait",
            Orientation::Landscape => "landscape",
        }
    }

    pub fn matches(&self, width: u32, height: u32) -> bool {
        match self {
            Orientation::Portrait => height >= width,
            Orientation::Landscape => width >= height,
        }
    }
}

/// Search constraints shared by every stock backend.
#[derive(Debug, Clone)]
pub struct StockSearchConfig {
    pub orientation: Orientation,
    /// Hits shorter than this are dropped
    pub min_duration_secs: u64,
    pub target_width: u32,
    pub target_height: u32,
}

impl Default for StockSearchConfig {
    fn default() -> Self {
        Self {
            orientation: Orientation::Portrait,
            min_duration_secs: 3,
            target_width: 1080,
            target_height: 1920,
        }
    }
}

/// Stock video source.
#[async_trait]
pub trait StockMediaProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Ranked hits for `query`; an empty list means "no results".
    async fn search(&self, query: &str, max_results: usize) -> ProviderResult<Vec<MediaCandidate>>;

    /// Download `candidate` into `dest_dir`, returning the local path.
    async fn download(&self, candidate: &MediaCandidate, dest_dir: &Path) -> ProviderResult<PathBuf>;
}

/// Local file name for a downloaded candidate.
pub(crate) fn download_path(provider: &str, candidate: &MediaCandidate, dest_dir: &Path) -> PathBuf {
    let safe_id: String = candidate
        .source_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    dest_dir.join(format!("{}-{}.mp4", provider, safe_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_path_sanitized() {
        let candidate = MediaCandidate {
            source_id: "abc/../1".to_string(),
            media_ref: "https://x".to_string(),
            duration_ms: None,
            width: None,
            height: None,
        };
        let path = download_path("pexels", &candidate, Path::new("/w/clips"));
        assert_eq!(path, PathBuf::from("/w/clips/pexels-abc____1.mp4"));
    }

    #[test]
    fn test_orientation_matches() {
        assert!(Orientation::Portrait.matches(1080, 1920));
        assert!(!Orientation::Portrait.matches(1920, 1080));
        assert!(Orientation::Landscape.matches(1920, 1080));
    }
}
