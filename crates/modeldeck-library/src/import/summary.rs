//! External catalog entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A model listed by the Hugging Face hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HuggingFaceModelSummary {
    /// Repository id, e.g. `google/gemma-2b`.
    pub model_id: String,
    pub display_name: String,
    pub author: Option<String>,
    pub downloads: u64,
    pub likes: u64,
    pub pipeline_tag: Option<String>,
    pub library_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub trending_score: Option<u32>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_private: bool,
    pub total_size_bytes: Option<u64>,
    pub license: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub architectures: Vec<String>,
    pub model_type: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
}

impl HuggingFaceModelSummary {
    /// Creates a public summary with no metadata beyond its id and name.
    #[must_use]
    pub fn new(model_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            display_name: display_name.into(),
            author: None,
            downloads: 0,
            likes: 0,
            pipeline_tag: None,
            library_name: None,
            tags: Vec::new(),
            trending_score: None,
            created_at: None,
            last_modified: None,
            is_private: false,
            total_size_bytes: None,
            license: None,
            languages: Vec::new(),
            architectures: Vec::new(),
            model_type: None,
            summary: None,
            description: None,
        }
    }

    #[must_use]
    pub fn with_library(mut self, library_name: impl Into<String>) -> Self {
        self.library_name = Some(library_name.into());
        self
    }

    #[must_use]
    pub fn with_pipeline_tag(mut self, pipeline_tag: impl Into<String>) -> Self {
        self.pipeline_tag = Some(pipeline_tag.into());
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}
