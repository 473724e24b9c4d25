//! Pixabay video search.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{download_path, MediaCandidate, StockMediaProvider, StockSearchConfig};
use crate::error::{ProviderError, ProviderResult};
use crate::http;

const PROVIDER: &str = "pixabay";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    id: u64,
    duration: u64,
    videos: Renditions,
}

#[derive(Debug, Deserialize)]
struct Renditions {
    large: Option<Rendition>,
    medium: Option<Rendition>,
    small: Option<Rendition>,
}

#[derive(Debug, Clone, Deserialize)]
struct Rendition {
    #[serde(default)]
    url: String,
    width: Option<u32>,
    height: Option<u32>,
}

pub struct PixabayProvider {
    http: Client,
    api_key: String,
    base_url: String,
    search: StockSearchConfig,
}

impl PixabayProvider {
    pub fn new(api_key: impl Into<String>, search: StockSearchConfig) -> ProviderResult<Self> {
        Ok(Self {
            http: http::build_client(Duration::from_secs(60))?,
            api_key: api_key.into(),
            base_url: "https://pixabay.com/api".to_string(),
            search,
        })
    }

    pub fn from_env(search: StockSearchConfig) -> ProviderResult<Self> {
        let key = std::env::var("PIXABAY_API_KEY")
            .map_err(|_| ProviderError::config("PIXABAY_API_KEY not set"))?;
        Self::new(key, search)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl StockMediaProvider for PixabayProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn search(&self, query: &str, max_results: usize) -> ProviderResult<Vec<MediaCandidate>> {
        let url = format!("{}/videos/", self.base_url.trim_end_matches('/'));
        // Pixabay rejects per_page below 3
        let per_page = max_results.clamp(3, 200).to_string();

        let response: SearchResponse = http::send_json(
            PROVIDER,
            self.http.get(&url).query(&[
                ("key", self.api_key.as_str()),
                ("q", query),
                ("per_page", per_page.as_str()),
                ("video_type", "film"),
            ]),
        )
        .await?;

        Ok(response
            .hits
            .into_iter()
            .filter(|h| h.duration >= self.search.min_duration_secs)
            .filter_map(|h| {
                let rendition = [h.videos.large, h.videos.medium, h.videos.small]
                    .into_iter()
                    .flatten()
                    .find(|r| !r.url.is_empty())?;
                Some(MediaCandidate {
                    source_id: h.id.to_string(),
                    media_ref: rendition.url,
                    duration_ms: Some(h.duration * 1000),
                    width: rendition.width,
                    height: rendition.height,
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_search_prefers_large_rendition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos/"))
            .and(query_param("key", "pb-key"))
            .and(query_param("per_page", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": [
                    {"id": 7, "duration": 9, "videos": {
                        "large": {"url": "", "width": 0, "height": 0},
                        "medium": {"url": "https://p/7-m.mp4", "width": 1280, "height": 720},
                        "small": {"url": "https://p/7-s.mp4", "width": 640, "height": 360}
                    }}
                ]
            })))
            .mount(&server)
            .await;

        let provider = PixabayProvider::new("pb-key", StockSearchConfig::default())
            .unwrap()
            .with_base_url(server.uri());
        let hits = provider.search("city", 1).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].media_ref, "https://p/7-m.mp4");
    }
}
