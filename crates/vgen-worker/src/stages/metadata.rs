//! Metadata stage: title, description and tags for the finished video.

use serde_json::Value;
use std::time::Duration;

use vgen_models::{Script, VideoMetadata};
use vgen_providers::{strip_code_fences, ChatMessage, LlmProvider, ResponseFormat};

use super::script::VideoLength;
use super::with_deadline;
use crate::error::MetadataError;

/// Script text sent to the model is cut to this many characters.
const EXCERPT_CHARS: usize = 1000;

const MAX_TITLE_CHARS: usize = 100;

fn build_messages(script: &Script, length: VideoLength) -> Vec<ChatMessage> {
    let excerpt: String = script.full_text().chars().take(EXCERPT_CHARS).collect();
    let title_hint = match script.title.as_deref() {
        Some(title) if !title.is_empty() => format!("Working title: {}\n", title),
        _ => String::new(),
    };

    let user = format!(
        "Generate publishing metadata for this video.\n\n\
         Video type: {}\n{}Transcript excerpt: {}\n\n\
         Return a JSON object with:\n\
         \"title\": catchy title, at most 70 characters\n\
         \"description\": 150-300 characters with keywords and a call to action\n\
         \"tags\": 10-15 relevant keywords\n\
         \"hashtags\": 5 hashtags",
        length.platform_hint(),
        title_hint,
        excerpt
    );

    vec![
        ChatMessage::system("You write video metadata. Return only valid JSON."),
        ChatMessage::user(user),
    ]
}

/// Single attempt against one LLM.
pub async fn derive_metadata(
    llm: &dyn LlmProvider,
    script: &Script,
    length: VideoLength,
    deadline: Duration,
) -> Result<VideoMetadata, MetadataError> {
    let messages = build_messages(script, length);
    let raw = with_deadline(llm.name(), deadline, llm.complete(&messages, ResponseFormat::Json))
        .await
        .map_err(MetadataError::Provider)?;
    parse_metadata(&raw)
}

/// Parse the model's JSON answer.
///
/// `tags` and `hashtags` may be arrays or comma/space separated strings.
pub fn parse_metadata(raw: &str) -> Result<VideoMetadata, MetadataError> {
    let body = strip_code_fences(raw);
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => {
            let span = match (body.find('{'), body.rfind('}')) {
                (Some(start), Some(end)) if end > start => &body[start..=end],
                _ => return Err(MetadataError::Malformed("no JSON object found".to_string())),
            };
            serde_json::from_str(span).map_err(|e| MetadataError::Malformed(e.to_string()))?
        }
    };

    let Some(object) = value.as_object() else {
        return Err(MetadataError::Malformed("expected a JSON object".to_string()));
    };

    let text = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };

    let title: String = text("title").chars().take(MAX_TITLE_CHARS).collect();
    if title.is_empty() {
        return Err(MetadataError::Malformed("missing title".to_string()));
    }

    let tags = list(object.get("tags"), &[','])
        .into_iter()
        .map(|t| t.trim_start_matches('#').to_string())
        .filter(|t| !t.is_empty())
        .collect();

    let mut hashtags: Vec<String> = Vec::new();
    for tag in list(object.get("hashtags"), &[',', ' ']) {
        let word: String = tag
            .trim_start_matches('#')
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if word.is_empty() {
            continue;
        }
        let tag = format!("#{}", word);
        if !hashtags.iter().any(|h| h.eq_ignore_ascii_case(&tag)) {
            hashtags.push(tag);
        }
    }

    Ok(VideoMetadata {
        title,
        description: text("description"),
        tags,
        hashtags,
    })
}

fn list(value: Option<&Value>, separators: &[char]) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(|c| separators.contains(&c))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_string_lists() {
        let raw = r##"```json
{"title": "Life Without Sunlight", "description": "Meet the vent dwellers.",
 "tags": "ocean, deep sea , biology", "hashtags": "#science ocean #Science #fyp"}
```"##;
        let meta = parse_metadata(raw).unwrap();
        assert_eq!(meta.title, "Life Without Sunlight");
        assert_eq!(meta.tags, vec!["ocean", "deep sea", "biology"]);
        assert_eq!(meta.hashtags, vec!["#science", "#ocean", "#fyp"]);
    }

    #[test]
    fn test_parse_arrays_with_prose() {
        let raw = r##"Sure! {"title": "T", "tags": ["a", "#b"], "hashtags": ["x"]} Enjoy."##;
        let meta = parse_metadata(raw).unwrap();
        assert_eq!(meta.description, "");
        assert_eq!(meta.tags, vec!["a", "b"]);
        assert_eq!(meta.hashtags, vec!["#x"]);
    }

    #[test]
    fn test_missing_title_is_malformed() {
        assert!(matches!(
            parse_metadata(r#"{"description": "d"}"#),
            Err(MetadataError::Malformed(_))
        ));
        assert!(matches!(
            parse_metadata("not json"),
            Err(MetadataError::Malformed(_))
        ));
    }

    #[test]
    fn test_prompt_mentions_platform() {
        let script = Script::from_pairs([("A", "hello there")]);
        let messages = build_messages(&script, VideoLength::Reels);
        assert!(messages[1].content.contains("Reels"));
        assert!(messages[1].content.contains("hello there"));
    }
}
