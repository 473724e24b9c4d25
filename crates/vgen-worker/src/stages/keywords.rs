//! Search query extraction for stock footage.

use regex::Regex;
use std::sync::OnceLock;

/// Derives stock-search queries from a line of dialogue.
pub trait KeywordExtractor: Send + Sync {
    /// Up to `max` queries, most relevant first. An empty result falls
    /// back to a generic query.
    fn queries(&self, text: &str, max: usize) -> Vec<String>;
}

/// Query used when a line yields no keywords.
pub(crate) const FALLBACK_QUERY: &str = "abstract background";

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "also", "always", "because", "been", "before",
    "being", "below", "between", "both", "but", "can", "could", "did", "does", "doing", "down",
    "during", "each", "even", "every", "ever", "few", "from", "further", "had", "has", "have",
    "having", "here", "how", "into", "its", "just", "know", "like", "little", "more", "most",
    "much", "must", "never", "now", "off", "once", "only", "other", "our", "ours", "out", "over",
    "own", "really", "right", "same", "should", "some", "still", "such", "than", "that", "the",
    "their", "theirs", "them", "then", "there", "these", "they", "thing", "things", "think",
    "this", "those", "through", "too", "under", "until", "very", "want", "was", "well", "were",
    "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with", "would",
    "yeah", "yes", "you", "your", "yours", "and", "are", "for", "not", "all", "any", "one", "get",
    "got", "let", "may", "say", "see", "way", "okay", "actually", "maybe", "going", "make",
];

/// Picks the longest non-stopwords and pairs them into two-word queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopwordExtractor;

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[\p{L}][\p{L}'-]*").expect("valid regex"))
}

impl KeywordExtractor for StopwordExtractor {
    fn queries(&self, text: &str, max: usize) -> Vec<String> {
        let max = max.max(1);

        let mut words: Vec<(usize, String)> = Vec::new();
        for m in word_pattern().find_iter(text) {
            let word = m.as_str().trim_matches(|c| c == '\'' || c == '-').to_lowercase();
            if word.chars().count() < 3 || STOPWORDS.contains(&word.as_str()) {
                continue;
            }
            if !words.iter().any(|(_, w)| *w == word) {
                words.push((words.len(), word));
            }
        }

        if words.is_empty() {
            return vec![FALLBACK_QUERY.to_string()];
        }

        // Longest words carry the most meaning; keep them in spoken order
        let mut ranked = words.clone();
        ranked.sort_by(|a, b| b.1.chars().count().cmp(&a.1.chars().count()).then(a.0.cmp(&b.0)));
        let mut chosen: Vec<(usize, String)> = ranked.into_iter().take(max * 2).collect();
        chosen.sort_by_key(|(pos, _)| *pos);

        chosen
            .chunks(2)
            .take(max)
            .map(|pair| {
                pair.iter()
                    .map(|(_, w)| w.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }
}
