//! Script stage: seed to multi-character dialogue.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

use vgen_models::{Line, Script, Seed};
use vgen_providers::{strip_code_fences, ChatMessage, LlmProvider, ProviderError, ResponseFormat};

use super::with_deadline;
use crate::error::{ScriptError, WorkerError, WorkerResult};
use crate::providers::ProviderSet;

/// Target running time, steering how much dialogue is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoLength {
    /// 12-30 second reel
    Reels,
    /// 1-2 minutes
    #[default]
    Short,
    /// 5-10 minutes
    Mid,
}

impl VideoLength {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "reels" | "reel" => Some(Self::Reels),
            "short" | "short_content" => Some(Self::Short),
            "mid" | "mid_content" => Some(Self::Mid),
            _ => None,
        }
    }

    /// Platform description used in prompts.
    pub fn platform_hint(&self) -> &'static str {
        match self {
            Self::Reels => "YouTube Shorts / TikTok / Instagram Reels (12-30s)",
            Self::Short => "YouTube short video (1-2 min)",
            Self::Mid => "YouTube video (5-10 min)",
        }
    }

    fn guidance(&self) -> &'static str {
        match self {
            Self::Reels => {
                "[DURATION: short reel, 12-30 seconds. Keep it to a handful of punchy lines \
                 of one or two sentences each.]"
            }
            Self::Short => {
                "[DURATION: short video, 1-2 minutes of spoken dialogue. Clear and engaging.]"
            }
            Self::Mid => {
                "[DURATION: mid-length explainer, 5-10 minutes. Detailed discussion with \
                 examples.]"
            }
        }
    }
}

/// Prompt template for one dialogue style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    /// Speaker identifiers the dialogue should use
    #[serde(default)]
    pub characters: Vec<String>,
    /// Approximate number of lines to write
    #[serde(default = "default_target_lines")]
    pub target_lines: usize,
}

fn default_target_lines() -> usize {
    8
}

impl StyleTemplate {
    fn builtin(
        name: &str,
        description: &str,
        characters: &[&str],
        target_lines: usize,
        brief: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            system_prompt: brief.to_string(),
            characters: characters.iter().map(|c| c.to_string()).collect(),
            target_lines,
        }
    }
}

/// Named style templates.
#[derive(Debug, Clone)]
pub struct StyleCatalog {
    templates: BTreeMap<String, StyleTemplate>,
}

impl Default for StyleCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StyleCatalog {
    pub fn builtin() -> Self {
        let templates = [
            StyleTemplate::builtin(
                "dialogue",
                "General podcast conversation",
                &["Host", "Guest"],
                8,
                "You write lively two-person podcast dialogue. The host asks sharp questions, \
                 the guest explains with concrete examples.",
            ),
            StyleTemplate::builtin(
                "tech_talk",
                "Technology discussion, gadgets, software, AI",
                &["Alex", "Sam"],
                8,
                "You write a fast-paced tech talk between an enthusiast and a skeptic.",
            ),
            StyleTemplate::builtin(
                "debate",
                "Pros and cons, arguments",
                &["Pro", "Con", "Moderator"],
                9,
                "You write a fair debate. The moderator frames the question, each side argues, \
                 the moderator closes.",
            ),
            StyleTemplate::builtin(
                "science_explainer",
                "Science explanation, discovery, research",
                &["Narrator", "Scientist"],
                8,
                "You write an explainer where a curious narrator interviews a scientist.",
            ),
            StyleTemplate::builtin(
                "storytelling",
                "Narrative storytelling",
                &["Narrator", "Character"],
                10,
                "You retell the material as a short story with a narrator and one character voice.",
            ),
        ];
        Self {
            templates: templates.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    /// Builtins plus templates from a JSON array file; file entries win.
    pub async fn with_file(path: &Path) -> WorkerResult<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let extra: Vec<StyleTemplate> = serde_json::from_str(&raw).map_err(|e| {
            WorkerError::config_error(format!("invalid style file {}: {}", path.display(), e))
        })?;

        let mut catalog = Self::builtin();
        for template in extra {
            catalog.templates.insert(template.name.clone(), template);
        }
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Option<&StyleTemplate> {
        self.templates.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Like [`get`](Self::get), but an unknown name lists the known ones.
    pub fn resolve(&self, name: &str) -> Result<&StyleTemplate, ScriptError> {
        self.get(name).ok_or_else(|| ScriptError::UnknownStyle {
            name: name.to_string(),
            available: self.names().collect::<Vec<_>>().join(", "),
        })
    }
}

/// Turn a seed into plain source text.
pub async fn resolve_seed(
    seed: &Seed,
    providers: &ProviderSet,
    deadline: Duration,
) -> Result<String, ScriptError> {
    let text = match seed {
        Seed::Topic(topic) => topic.trim().to_string(),
        Seed::Url(url) => {
            let extractor = providers.article_extractor.as_ref().ok_or_else(|| {
                ScriptError::SeedResolution(ProviderError::config("no article extractor configured"))
            })?;
            with_deadline("article", deadline, extractor.extract(url))
                .await
                .map_err(ScriptError::SeedResolution)?
        }
        Seed::UploadedVideo(path) => {
            let describer = providers.video_describer.as_ref().ok_or_else(|| {
                ScriptError::SeedResolution(ProviderError::config("no video describer configured"))
            })?;
            // Transcription is slow; no extra deadline beyond the describer's own
            describer
                .describe(path)
                .await
                .map_err(ScriptError::SeedResolution)?
        }
    };

    if text.is_empty() {
        return Err(ScriptError::SeedResolution(ProviderError::invalid_response(
            seed.kind(),
            "seed resolved to empty text",
        )));
    }
    debug!(seed = seed.kind(), chars = text.len(), "Seed resolved");
    Ok(text)
}

fn build_messages(text: &str, style: &StyleTemplate, length: VideoLength) -> Vec<ChatMessage> {
    let characters = if style.characters.is_empty() {
        "two speakers of your choosing".to_string()
    } else {
        style.characters.join(", ")
    };

    let system = format!(
        "{}\n\nWrite about {} lines using these speakers: {}.\n\
         Respond with JSON only, in exactly this shape:\n\
         {{\"title\": \"...\", \"lines\": [{{\"speaker\": \"...\", \"text\": \"...\", \"emotion\": \"optional\"}}]}}",
        style.system_prompt, style.target_lines, characters
    );
    let user = format!("{}\n\n{}", length.guidance(), text);

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Single attempt against one LLM with already-resolved text.
pub async fn generate_from_text(
    llm: &dyn LlmProvider,
    text: &str,
    style: &StyleTemplate,
    length: VideoLength,
    deadline: Duration,
    max_line_chars: usize,
) -> Result<Script, ScriptError> {
    let messages = build_messages(text, style, length);
    let raw = with_deadline(llm.name(), deadline, llm.complete(&messages, ResponseFormat::Json))
        .await
        .map_err(ScriptError::Provider)?;
    parse_script(&raw, max_line_chars)
}

/// Resolve the seed and generate a script with the first LLM, once.
pub async fn generate_script(
    seed: &Seed,
    style: &StyleTemplate,
    length: VideoLength,
    providers: &ProviderSet,
    deadline: Duration,
    max_line_chars: usize,
) -> Result<Script, ScriptError> {
    let llm = providers.llm.first().ok_or(ScriptError::NoProvider)?;
    let text = resolve_seed(seed, providers, deadline).await?;
    generate_from_text(llm.as_ref(), &text, style, length, deadline, max_line_chars).await
}

#[derive(Debug, Deserialize)]
struct RawScript {
    #[serde(default)]
    title: Option<String>,
    #[serde(alias = "dialogue", alias = "dialogues")]
    lines: Vec<RawLine>,
}

#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(alias = "role", alias = "name")]
    speaker: String,
    #[serde(alias = "content", alias = "line")]
    text: String,
    #[serde(default)]
    emotion: Option<String>,
}

/// Parse LLM output into a validated script.
///
/// Accepts the JSON object form (optionally fenced or surrounded by prose),
/// a bare JSON array of lines, or plain `SPEAKER: text` lines.
pub fn parse_script(raw: &str, max_line_chars: usize) -> Result<Script, ScriptError> {
    let body = strip_code_fences(raw);

    let (title, lines) = match parse_json(body) {
        Some(parsed) => parsed,
        None => (None, parse_plain(body)),
    };

    if lines.is_empty() {
        return Err(ScriptError::malformed("no dialogue lines found"));
    }

    let mut validated = Vec::with_capacity(lines.len());
    for (i, line) in lines.into_iter().enumerate() {
        let speaker = line.speaker.trim().to_string();
        let text = line.text.trim().to_string();
        if speaker.is_empty() || text.is_empty() {
            return Err(ScriptError::malformed(format!(
                "line {} has an empty speaker or text",
                i
            )));
        }
        let chars = text.chars().count();
        if chars > max_line_chars {
            return Err(ScriptError::malformed(format!(
                "line {} is {} characters, limit is {}",
                i, chars, max_line_chars
            )));
        }
        validated.push(Line {
            index: i,
            speaker,
            text,
            emotion: line
                .emotion
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
        });
    }

    let title = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
    Ok(Script::new(title, validated))
}

fn parse_json(body: &str) -> Option<(Option<String>, Vec<RawLine>)> {
    let from_value = |s: &str| -> Option<(Option<String>, Vec<RawLine>)> {
        if let Ok(script) = serde_json::from_str::<RawScript>(s) {
            return Some((script.title, script.lines));
        }
        serde_json::from_str::<Vec<RawLine>>(s)
            .ok()
            .map(|lines| (None, lines))
    };

    if let Some(parsed) = from_value(body) {
        return Some(parsed);
    }

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    from_value(&body[start..=end])
}

fn plain_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(?:[-*]\s*)?\**([^:*\n]{1,40}?)\**\s*[:：]\s*(.+?)\s*$")
            .expect("valid regex")
    })
}

fn parse_plain(body: &str) -> Vec<RawLine> {
    let pattern = plain_line_pattern();
    body.lines()
        .filter_map(|l| pattern.captures(l))
        .filter_map(|c| {
            let speaker = c.get(1)?.as_str().trim().to_string();
            let text = c.get(2)?.as_str().trim().to_string();
            Some(RawLine {
                speaker,
                text,
                emotion: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageFailure;

    #[test]
    fn test_parse_json_object() {
        let raw = r#"```json
{"title": "Vents", "lines": [
  {"speaker": "Host", "text": "What lives down there?"},
  {"speaker": "Guest", "text": "Tube worms.", "emotion": "excited"}
]}
```"#;
        let script = parse_script(raw, 400).unwrap();
        assert_eq!(script.title.as_deref(), Some("Vents"));
        assert_eq!(script.len(), 2);
        assert_eq!(script.lines[1].index, 1);
        assert_eq!(script.lines[1].emotion.as_deref(), Some("excited"));
    }

    #[test]
    fn test_parse_json_with_prose_and_aliases() {
        let raw = r#"Sure! Here it is: {"dialogues": [{"role": "A", "content": "Hi"}]} Enjoy."#;
        let script = parse_script(raw, 400).unwrap();
        assert_eq!(script.lines[0].speaker, "A");
        assert_eq!(script.lines[0].text, "Hi");
    }

    #[test]
    fn test_parse_plain_format() {
        let raw = "A Title\n\n**Host**: Welcome back.\n- Guest: Thanks for having me.\n";
        let script = parse_script(raw, 400).unwrap();
        assert_eq!(script.len(), 2);
        assert_eq!(script.speakers(), vec!["Host", "Guest"]);
    }

    #[test]
    fn test_rejects_empty_and_overlong() {
        assert!(matches!(
            parse_script("I cannot help with that", 400),
            Err(ScriptError::Malformed(_))
        ));
        assert!(matches!(
            parse_script(r#"{"lines": []}"#, 400),
            Err(ScriptError::Malformed(_))
        ));
        assert!(matches!(
            parse_script(r#"{"lines": [{"speaker": "A", "text": "  "}]}"#, 400),
            Err(ScriptError::Malformed(_))
        ));

        let long = format!(r#"{{"lines": [{{"speaker": "A", "text": "{}"}}]}}"#, "x".repeat(41));
        assert!(matches!(parse_script(&long, 40), Err(ScriptError::Malformed(_))));
    }

    #[test]
    fn test_video_length_parse() {
        assert_eq!(VideoLength::parse("reels"), Some(VideoLength::Reels));
        assert_eq!(VideoLength::parse("MID_CONTENT"), Some(VideoLength::Mid));
        assert_eq!(VideoLength::parse("epic"), None);
    }

    #[tokio::test]
    async fn test_catalog_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("styles.json");
        tokio::fs::write(
            &path,
            r#"[{"name": "dialogue", "system_prompt": "Custom", "characters": ["X", "Y"]},
                {"name": "roast", "system_prompt": "Roast it"}]"#,
        )
        .await
        .unwrap();

        let catalog = StyleCatalog::with_file(&path).await.unwrap();
        assert_eq!(catalog.get("dialogue").unwrap().system_prompt, "Custom");
        assert_eq!(catalog.get("roast").unwrap().target_lines, 8);
        assert!(catalog.get("tech_talk").is_some());
        assert!(catalog.names().any(|n| n == "roast"));
    }

    #[test]
    fn test_unknown_style_lists_known_names() {
        let catalog = StyleCatalog::builtin();
        assert_eq!(catalog.resolve("debate").unwrap().name, "debate");

        let err = catalog.resolve("opera").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("opera"));
        assert!(message.contains("debate, dialogue"));
        assert_eq!(err.code(), "unknown_style");
    }

    struct EchoLlm;

    #[async_trait::async_trait]
    impl LlmProvider for EchoLlm {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            messages: &[ChatMessage],
            _format: ResponseFormat,
        ) -> vgen_providers::ProviderResult<String> {
            let topic = messages[1].content.lines().last().unwrap_or_default();
            Ok(format!(
                r#"{{"lines": [{{"speaker": "Host", "text": "Today: {}"}}]}}"#,
                topic
            ))
        }
    }

    #[tokio::test]
    async fn test_generate_script_from_topic() {
        let providers = ProviderSet::new(
            vec![std::sync::Arc::new(EchoLlm) as std::sync::Arc<dyn LlmProvider>],
            Vec::new(),
            Vec::new(),
        );
        let catalog = StyleCatalog::builtin();
        let style = catalog.get("dialogue").unwrap();

        let script = generate_script(
            &Seed::Topic("  deep sea vents ".to_string()),
            style,
            VideoLength::Short,
            &providers,
            Duration::from_secs(5),
            400,
        )
        .await
        .unwrap();
        assert_eq!(script.lines[0].text, "Today: deep sea vents");

        let err = generate_script(
            &Seed::Url("https://example.com/a".to_string()),
            style,
            VideoLength::Short,
            &providers,
            Duration::from_secs(5),
            400,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ScriptError::SeedResolution(_)));
    }

    #[test]
    fn test_messages_include_characters_and_guidance() {
        let catalog = StyleCatalog::builtin();
        let style = catalog.get("debate").unwrap();
        let messages = build_messages("Nuclear power", style, VideoLength::Reels);

        assert!(messages[0].content.contains("Pro, Con, Moderator"));
        assert!(messages[1].content.contains("short reel"));
        assert!(messages[1].content.ends_with("Nuclear power"));
    }
}
