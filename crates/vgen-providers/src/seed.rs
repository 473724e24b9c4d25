//! Seed resolution: turning URLs and uploaded videos into plain text.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::http;

/// Extracts readable article text from a URL.
#[async_trait]
pub trait ArticleExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> ProviderResult<String>;
}

/// Produces a transcript or description of a video file.
#[async_trait]
pub trait VideoDescriber: Send + Sync {
    async fn describe(&self, path: &Path) -> ProviderResult<String>;
}

const EXTRACTOR: &str = "article";

/// Fetches a page and keeps paragraph text.
pub struct HttpArticleExtractor {
    http: Client,
    max_chars: usize,
}

impl HttpArticleExtractor {
    pub fn new(timeout: Duration, max_chars: usize) -> ProviderResult<Self> {
        Ok(Self {
            http: http::build_client(timeout)?,
            max_chars,
        })
    }
}

#[async_trait]
impl ArticleExtractor for HttpArticleExtractor {
    async fn extract(&self, url: &str) -> ProviderResult<String> {
        let response = http::send(EXTRACTOR, self.http.get(url)).await?;
        let html = response
            .text()
            .await
            .map_err(|e| ProviderError::from_transport(EXTRACTOR, e))?;

        let mut text = extract_readable_text(&html);
        if text.is_empty() {
            return Err(ProviderError::invalid_response(
                EXTRACTOR,
                format!("no readable text at {}", url),
            ));
        }
        if text.len() > self.max_chars {
            let cut = (0..=self.max_chars)
                .rev()
                .find(|i| text.is_char_boundary(*i))
                .unwrap_or(0);
            text.truncate(cut);
        }
        debug!(url, chars = text.len(), "Extracted article text");
        Ok(text)
    }
}

struct Patterns {
    noise: Regex,
    article: Regex,
    paragraph: Regex,
    tag: Regex,
    space: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        noise: Regex::new(r"(?is)<(script|style|noscript|nav|header|footer|aside)\b.*?</\s*(script|style|noscript|nav|header|footer|aside)\s*>")
            .expect("valid regex"),
        article: Regex::new(r"(?is)<article\b[^>]*>(.*?)</article\s*>").expect("valid regex"),
        paragraph: Regex::new(r"(?is)<p\b[^>]*>(.*?)</p\s*>").expect("valid regex"),
        tag: Regex::new(r"(?s)<[^>]+>").expect("valid regex"),
        space: Regex::new(r"\s+").expect("valid regex"),
    })
}

/// Paragraph text from `<article>` (or the whole page), without markup.
pub fn extract_readable_text(html: &str) -> String {
    let p = patterns();
    let cleaned = p.noise.replace_all(html, " ");
    let scope = p
        .article
        .captures(&cleaned)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| cleaned.to_string());

    let paragraphs: Vec<String> = p
        .paragraph
        .captures_iter(&scope)
        .filter_map(|c| c.get(1))
        .map(|m| normalize(&p.tag.replace_all(m.as_str(), " "), &p.space))
        .filter(|s| !s.is_empty())
        .collect();

    if paragraphs.is_empty() {
        normalize(&p.tag.replace_all(&scope, " "), &p.space)
    } else {
        paragraphs.join("\n")
    }
}

fn normalize(text: &str, space: &Regex) -> String {
    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    space.replace_all(&decoded, " ").trim().to_string()
}

const DESCRIBER: &str = "describer";

/// Runs an external transcription command and captures its stdout.
///
/// The video path is appended as the final argument.
pub struct CommandVideoDescriber {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandVideoDescriber {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Parse a shell-like command line (`whisper --model base`).
    pub fn from_command_line(command: &str, timeout: Duration) -> ProviderResult<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| ProviderError::config("empty video describer command"))?;
        Ok(Self::new(program, parts.collect(), timeout))
    }
}

#[async_trait]
impl VideoDescriber for CommandVideoDescriber {
    async fn describe(&self, path: &Path) -> ProviderResult<String> {
        if !path.exists() {
            return Err(ProviderError::config(format!(
                "uploaded video not found: {}",
                path.display()
            )));
        }
        which::which(&self.program)
            .map_err(|_| ProviderError::config(format!("{} not found in PATH", self.program)))?;

        let run = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| ProviderError::timeout(DESCRIBER, self.timeout))??;

        if !output.status.success() {
            return Err(ProviderError::unavailable(
                DESCRIBER,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(ProviderError::invalid_response(DESCRIBER, "empty description"));
        }
        Ok(text)
    }
}
