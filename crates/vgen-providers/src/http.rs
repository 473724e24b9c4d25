//! Shared HTTP plumbing for provider backends.

use futures::StreamExt;
use reqwest::{header, Client, RequestBuilder, Response};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

/// Build an HTTP client with a request timeout.
pub fn build_client(timeout: Duration) -> ProviderResult<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("vgen/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(ProviderError::Network)
}

/// Send a request and classify transport errors and non-success statuses.
pub async fn send(provider: &str, request: RequestBuilder) -> ProviderResult<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::from_transport(provider, e))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::from_http_status(provider, status, body, retry_after))
}

/// Send a request and decode a JSON body.
pub async fn send_json<T: serde::de::DeserializeOwned>(
    provider: &str,
    request: RequestBuilder,
) -> ProviderResult<T> {
    let response = send(provider, request).await?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProviderError::from_transport(provider, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ProviderError::invalid_response(provider, format!("undecodable body: {}", e)))
}

/// Stream `url` into `dest`, writing a sibling `.part` file first.
pub async fn download_to(
    client: &Client,
    provider: &str,
    url: &str,
    dest: &Path,
) -> ProviderResult<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let response = send(provider, client.get(url)).await?;
    let partial = dest.with_extension("part");
    let mut file = tokio::fs::File::create(&partial).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(ProviderError::from_transport(provider, e));
            }
        };
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    if written == 0 {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(ProviderError::invalid_response(provider, "empty download"));
    }

    tokio::fs::rename(&partial, dest).await?;
    debug!(provider, url, bytes = written, "Downloaded media");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_classifies_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let client = build_client(Duration::from_secs(5)).unwrap();
        let err = send("test", client.get(format!("{}/x", server.uri())))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::RateLimited {
                retry_after_secs: Some(7),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_download_writes_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clip.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3, 4]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("clips").join("a.mp4");
        let client = build_client(Duration::from_secs(5)).unwrap();

        download_to(&client, "test", &format!("{}/clip.mp4", server.uri()), &dest)
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap(), vec![1, 2, 3, 4]);
        assert!(!dest.with_extension("part").exists());
    }

    #[tokio::test]
    async fn test_download_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = build_client(Duration::from_secs(5)).unwrap();
        let err = download_to(&client, "test", &server.uri(), &dir.path().join("a.mp4"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
