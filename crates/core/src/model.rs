//! ChatModel trait — the abstraction over language-model backends.
//!
//! A ChatModel knows how to complete a rendered prompt, either as one
//! blocking reply or by streaming incremental chunks into a sink while
//! the call is in flight. The orchestration engine calls it through the
//! generate layer without knowing which backend is behind it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::output::ModelReply;

/// Sink receiving incremental text chunks from a streaming call.
///
/// Streaming affects delivery only: the call still returns the final
/// assembled reply, and the caller does not proceed until it completes.
pub type StreamSink = tokio::sync::mpsc::Sender<String>;

/// A fully built request for one model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The model to use (e.g., "gpt-4o", "qwen-max").
    pub model: String,

    /// The rendered prompt text.
    pub prompt: String,

    /// Temperature (0.0 = deterministic).
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Top-k sampling cutoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Nucleus sampling cutoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Frequency penalty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,

    /// Presence penalty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,

    /// Stop sequences; generation halts before emitting any of these.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,

    /// Whether the backend should stream.
    #[serde(default)]
    pub stream: bool,
}

pub(crate) fn default_temperature() -> f64 {
    0.0
}

impl ModelRequest {
    /// Create a request with defaults for everything but model and prompt.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            temperature: default_temperature(),
            max_tokens: None,
            top_k: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: Vec::new(),
            stream: false,
        }
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// The core ChatModel trait.
///
/// Every backend implements `invoke`; streaming backends override
/// `invoke_streaming`, others inherit the default that completes the
/// call and delivers the whole reply as a single chunk.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// A human-readable name for this backend (e.g., "openai", "mock").
    fn name(&self) -> &str;

    /// Complete the request and return the full reply.
    async fn invoke(&self, request: ModelRequest) -> std::result::Result<ModelReply, ModelError>;

    /// Complete the request, delivering incremental chunks to `sink`,
    /// and return the final assembled reply.
    async fn invoke_streaming(
        &self,
        request: ModelRequest,
        sink: StreamSink,
    ) -> std::result::Result<ModelReply, ModelError> {
        let reply = self.invoke(request).await?;
        // Receiver may already be gone; that only affects delivery.
        let _ = sink.send(reply.text.clone()).await;
        Ok(reply)
    }
}
