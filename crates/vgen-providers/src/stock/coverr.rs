//! Coverr video search.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{download_path, MediaCandidate, StockMediaProvider, StockSearchConfig};
use crate::error::{ProviderError, ProviderResult};
use crate::http;

const PROVIDER: &str = "coverr";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    id: String,
    #[serde(default)]
    duration: f64,
    urls: Option<Urls>,
    #[serde(default)]
    is_vertical: bool,
}

#[derive(Debug, Deserialize)]
struct Urls {
    mp4: Option<String>,
    mp4_download: Option<String>,
}

pub struct CoverrProvider {
    http: Client,
    api_key: String,
    base_url: String,
    search: StockSearchConfig,
}

impl CoverrProvider {
    pub fn new(api_key: impl Into<String>, search: StockSearchConfig) -> ProviderResult<Self> {
        Ok(Self {
            http: http::build_client(Duration::from_secs(60))?,
            api_key: api_key.into(),
            base_url: "https://api.coverr.co".to_string(),
            search,
        })
    }

    pub fn from_env(search: StockSearchConfig) -> ProviderResult<Self> {
        let key = std::env::var("COVERR_API_KEY")
            .map_err(|_| ProviderError::config("COVERR_API_KEY not set"))?;
        Self::new(key, search)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl StockMediaProvider for CoverrProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn search(&self, query: &str, max_results: usize) -> ProviderResult<Vec<MediaCandidate>> {
        let url = format!("{}/videos", self.base_url.trim_end_matches('/'));
        let page_size = max_results.clamp(1, 100).to_string();

        let response: SearchResponse = http::send_json(
            PROVIDER,
            self.http
                .get(&url)
                .bearer_auth(&self.api_key)
                .query(&[
                    ("query", query),
                    ("page_size", page_size.as_str()),
                    ("urls", "true"),
                ]),
        )
        .await?;

        let portrait = self.search.orientation == super::Orientation::Portrait;
        let min_ms = self.search.min_duration_secs * 1000;

        // Vertical clips first when the output is portrait; stable otherwise
        let mut hits: Vec<Hit> = response.hits;
        hits.sort_by_key(|h| h.is_vertical != portrait);

        Ok(hits
            .into_iter()
            .filter_map(|h| {
                let duration_ms = (h.duration * 1000.0).round() as u64;
                if duration_ms < min_ms {
                    return None;
                }
                let urls = h.urls?;
                let link = urls.mp4_download.or(urls.mp4)?;
                Some(MediaCandidate {
                    source_id: h.id,
                    media_ref: link,
                    duration_ms: Some(duration_ms),
                    width: None,
                    height: None,
                })
            })
            .take(max_results)
            .collect())
    }

    async fn download(&self, candidate: &MediaCandidate, dest_dir: &Path) -> ProviderResult<PathBuf> {
        let dest = download_path(PROVIDER, candidate, dest_dir);
        http::download_to(&self.http, PROVIDER, &candidate.media_ref, &dest).await?;
        Ok(dest)
    }
}
