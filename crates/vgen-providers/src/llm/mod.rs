//! LLM completion capability.

pub mod gemini;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Output constraint requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Model must answer with a single JSON object
    Json,
}

/// Chat completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Backend name used in logs and metrics.
    fn name(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        format: ResponseFormat,
    ) -> ProviderResult<String>;
}

/// Remove a surrounding markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening fence line
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```  "), "{}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&ChatMessage::system("hi")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"hi"}"#);
    }
}
