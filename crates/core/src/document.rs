//! Document value type — the unit of content handed to combination chains.
//!
//! Documents are produced by retrieval and consumed read-only by the
//! document-combination strategies. A collapse pass synthesizes new
//! documents rather than editing existing ones.

use serde::{Deserialize, Serialize};

/// A single document: some page content plus retrieval metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// The text content of this document.
    pub page_content: String,

    /// Unique ID assigned by the producing store, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    /// Embedding vector, if the producing store attached one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,

    /// Free-form metadata (source, page number, etc.).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Relevance score set by the producing search, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Document {
    /// Create a document from page content alone.
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            unique_id: None,
            embedding: None,
            metadata: serde_json::Map::new(),
            score: None,
        }
    }

    /// Attach a unique ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.unique_id = Some(id.into());
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach a relevance score.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

impl From<&str> for Document {
    fn from(content: &str) -> Self {
        Self::new(content)
    }
}
