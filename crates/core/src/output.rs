//! Model output value types.
//!
//! A model call produces a `ModelReply` (text plus metadata, returned
//! structurally — there is no side-channel result holder). The generate
//! layer groups replies into `Generation`s, one group per prompt in a
//! batch, collected into an `LlmResult`.

use serde::{Deserialize, Serialize};

/// One generated completion for a single prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    /// The generated text.
    pub text: String,

    /// Provider-specific info for this generation (finish reason, etc.).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub generation_info: serde_json::Map<String, serde_json::Value>,
}

impl Generation {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            generation_info: serde_json::Map::new(),
        }
    }

    pub fn with_info(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.generation_info.insert(key.into(), value);
        self
    }
}

/// The result of one generate call over a batch of prompts.
///
/// `generations[i]` holds the generations for the i-th submitted prompt;
/// order is the submission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResult {
    /// One generation group per prompt, in submission order.
    pub generations: Vec<Vec<Generation>>,

    /// Result-level metadata (token usage totals, model id, etc.).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub llm_output: serde_json::Map<String, serde_json::Value>,
}

impl LlmResult {
    /// The text of the first generation for the first prompt, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.generations
            .first()
            .and_then(|group| group.first())
            .map(|g| g.text.as_str())
    }
}

/// Token usage reported by a model backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single model call's structured reply: the text plus whatever
/// metadata the backend reported alongside it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelReply {
    /// The completed text.
    pub text: String,

    /// Backend-specific metadata for this reply.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Token usage, if the backend reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ModelReply {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: serde_json::Map::new(),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Convert this reply into a Generation, folding usage into the
    /// generation info.
    pub fn into_generation(self) -> Generation {
        let mut generation = Generation::new(self.text);
        generation.generation_info = self.metadata;
        if let Some(usage) = self.usage {
            generation.generation_info.insert(
                "token_usage".into(),
                serde_json::json!({
                    "prompt_tokens": usage.prompt_tokens,
                    "completion_tokens": usage.completion_tokens,
                    "total_tokens": usage.total_tokens,
                }),
            );
        }
        generation
    }
}
