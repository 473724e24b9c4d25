//! Publishing metadata.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Title, description and discovery tags for a finished video.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Always `#`-prefixed
    #[serde(default)]
    pub hashtags: Vec<String>,
}

impl VideoMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.description.is_empty()
            && self.tags.is_empty()
            && self.hashtags.is_empty()
    }
}
