//! Dialogue scripts and speaker voice assignments.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One line of dialogue. Order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Line {
    /// Position in the script (0-based)
    pub index: usize,
    /// Speaker identifier
    pub speaker: String,
    /// Spoken text
    pub text: String,
    /// Optional emotion/style tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
}

/// Ordered multi-character dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Script {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub lines: Vec<Line>,
}

impl Script {
    /// Build a script, assigning position indices in order.
    pub fn new(title: Option<String>, lines: Vec<Line>) -> Self {
        let lines = lines
            .into_iter()
            .enumerate()
            .map(|(index, line)| Line { index, ..line })
            .collect();
        Self { title, lines }
    }

    /// Build a script from `(speaker, text)` pairs.
    pub fn from_pairs<S, T>(pairs: impl IntoIterator<Item = (S, T)>) -> Self
    where
        S: Into<String>,
        T: Into<String>,
    {
        let lines = pairs
            .into_iter()
            .map(|(speaker, text)| Line {
                index: 0,
                speaker: speaker.into(),
                text: text.into(),
                emotion: None,
            })
            .collect();
        Self::new(None, lines)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Distinct speakers in order of first appearance.
    pub fn speakers(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for line in &self.lines {
            if !seen.contains(&line.speaker.as_str()) {
                seen.push(&line.speaker);
            }
        }
        seen
    }

    /// All spoken text, one line per dialogue line.
    pub fn full_text(&self) -> String {
        self.lines
            .iter()
            .map(|l| format!("{}: {}", l.speaker, l.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Concrete voice for a speaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VoiceChoice {
    /// TTS engine name (e.g. `edge`, `openai`)
    pub engine: String,
    /// Engine-specific voice ID
    pub voice_id: String,
    /// Voice to use if this line falls back to another engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_voice_id: Option<String>,
}

impl VoiceChoice {
    pub fn new(engine: impl Into<String>, voice_id: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            voice_id: voice_id.into(),
            fallback_voice_id: None,
        }
    }

    pub fn with_fallback(mut self, voice_id: impl Into<String>) -> Self {
        self.fallback_voice_id = Some(voice_id.into());
        self
    }

    /// Parse `engine:voice_id`.
    pub fn parse(value: &str) -> Option<Self> {
        let (engine, voice) = value.trim().split_once(':')?;
        let (engine, voice) = (engine.trim(), voice.trim());
        if engine.is_empty() || voice.is_empty() {
            return None;
        }
        Some(Self::new(engine, voice))
    }
}

/// Speaker identifier to voice mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VoiceAssignment(BTreeMap<String, VoiceChoice>);

impl VoiceAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(mut self, speaker: impl Into<String>, choice: VoiceChoice) -> Self {
        self.0.insert(speaker.into(), choice);
        self
    }

    pub fn get(&self, speaker: &str) -> Option<&VoiceChoice> {
        self.0.get(speaker)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VoiceChoice)> {
        self.0.iter()
    }

    /// Speakers in `script` that have no voice.
    pub fn missing_speakers(&self, script: &Script) -> Vec<String> {
        script
            .speakers()
            .into_iter()
            .filter(|s| !self.0.contains_key(*s))
            .map(str::to_string)
            .collect()
    }

    /// Assign voices from `pool` in speaker order, wrapping around.
    pub fn round_robin(script: &Script, pool: &[VoiceChoice]) -> Self {
        let mut assignment = Self::new();
        if pool.is_empty() {
            return assignment;
        }
        for (i, speaker) in script.speakers().into_iter().enumerate() {
            assignment = assignment.assign(speaker, pool[i % pool.len()].clone());
        }
        assignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script() -> Script {
        Script::from_pairs([
            ("Host", "Welcome back."),
            ("Guest", "Glad to be here."),
            ("Host", "Let's start."),
        ])
    }

    #[test]
    fn test_indices_assigned_in_order() {
        let s = script();
        let indices: Vec<usize> = s.lines.iter().map(|l| l.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_speakers_first_appearance() {
        assert_eq!(script().speakers(), vec!["Host", "Guest"]);
    }

    #[test]
    fn test_missing_speakers() {
        let assignment = VoiceAssignment::new().assign("Host", VoiceChoice::new("edge", "a"));
        assert_eq!(assignment.missing_speakers(&script()), vec!["Guest"]);
    }

    #[test]
    fn test_round_robin_wraps() {
        let pool = vec![VoiceChoice::new("edge", "a")];
        let assignment = VoiceAssignment::round_robin(&script(), &pool);

        assert_eq!(assignment.get("Host").unwrap().voice_id, "a");
        assert_eq!(assignment.get("Guest").unwrap().voice_id, "a");
        assert!(assignment.missing_speakers(&script()).is_empty());
    }

    #[test]
    fn test_voice_choice_parse() {
        let choice = VoiceChoice::parse("edge:en-US-GuyNeural").unwrap();
        assert_eq!(choice.engine, "edge");
        assert_eq!(choice.voice_id, "en-US-GuyNeural");
        assert!(VoiceChoice::parse("nocolon").is_none());
        assert!(VoiceChoice::parse(":x").is_none());
    }
}
