//! Pexels video search.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::{download_path, MediaCandidate, StockMediaProvider, StockSearchConfig};
use crate::error::{ProviderError, ProviderResult};
use crate::http;

const PROVIDER: &str = "pexels";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    videos: Vec<Video>,
}

#[derive(Debug, Deserialize)]
struct Video {
    id: u64,
    duration: u64,
    #[serde(default)]
    video_files: Vec<VideoFile>,
}

#[derive(Debug, Clone, Deserialize)]
struct VideoFile {
    link: String,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    file_type: Option<String>,
}

pub struct PexelsProvider {
    http: Client,
    api_key: String,
    base_url: String,
    search: StockSearchConfig,
}

impl PexelsProvider {
    pub fn new(api_key: impl Into<String>, search: StockSearchConfig) -> ProviderResult<Self> {
        Ok(Self {
            http: http::build_client(Duration::from_secs(60))?,
            api_key: api_key.into(),
            base_url: "https://api.pexels.com".to_string(),
            search,
        })
    }

    pub fn from_env(search: StockSearchConfig) -> ProviderResult<Self> {
        let key = std::env::var("PEXELS_API_KEY")
            .map_err(|_| ProviderError::config("PEXELS_API_KEY not set"))?;
        Self::new(key, search)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Smallest mp4 rendition at least as large as the target, else the largest.
    fn pick_file(&self, files: &[VideoFile]) -> Option<VideoFile> {
        let mut mp4: Vec<&VideoFile> = files
            .iter()
            .filter(|f| f.file_type.as_deref().map_or(true, |t| t == "video/mp4"))
            .filter(|f| f.width.is_some() && f.height.is_some())
            .filter(|f| {
                self.search
                    .orientation
                    .matches(f.width.unwrap_or(0), f.height.unwrap_or(0))
            })
            .collect();
        mp4.sort_by_key(|f| u64::from(f.width.unwrap_or(0)) * u64::from(f.height.unwrap_or(0)));

        let target = u64::from(self.search.target_width) * u64::from(self.search.target_height);
        mp4.iter()
            .find(|f| u64::from(f.width.unwrap_or(0)) * u64::from(f.height.unwrap_or(0)) >= target)
            .or(mp4.last())
            .map(|f| (*f).clone())
    }
}

#[async_trait]
impl StockMediaProvider for PexelsProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn search(&self, query: &str, max_results: usize) -> ProviderResult<Vec<MediaCandidate>> {
        let url = format!("{}/videos/search", self.base_url.trim_end_matches('/'));
        let per_page = max_results.clamp(1, 80).to_string();

        let response: SearchResponse = http::send_json(
            PROVIDER,
            self.http
                .get(&url)
                .header("Authorization", &self.api_key)
                .query(&[
                    ("query", query),
                    ("per_page", per_page.as_str()),
                    ("orientation", self.search.orientation.as_str()),
                ]),
        )
        .await?;

        let total = response.videos.len();
        let candidates: Vec<MediaCandidate> = response
            .videos
            .into_iter()
            .filter(|v| v.duration >= self.search.min_duration_secs)
            .filter_map(|v| {
                let file = self.pick_file(&v.video_files)?;
                Some(MediaCandidate {
                    source_id: v.id.to_string(),
                    media_ref: file.link,
                    duration_ms: Some(v.duration * 1000),
                    width: file.width,
                    height: file.height,
                })
            })
            .take(max_results)
            .collect();

        debug!(query, total, usable = candidates.len(), "Pexels search");
        Ok(candidates)
    }

    async fn download(&self, candidate: &MediaCandidate, dest_dir: &Path) -> ProviderResult<PathBuf> {
        let dest = download_path(PROVIDER, candidate, dest_dir);
        http::download_to(&self.http, PROVIDER, &candidate.media_ref, &dest).await?;
        Ok(dest)
    }
}
