//! Configured model defaults and request construction.

use serde::{Deserialize, Serialize};
use tangle_core::ModelRequest;

/// Defaults applied to every request an engine builds.
///
/// Per-call parameters (the prompt, the stop list, the streaming flag)
/// are merged over these when the request is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Model id sent to the backend.
    pub model: String,

    /// Sampling temperature (0.0 = deterministic).
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
}

fn default_temperature() -> f64 {
    0.0
}

impl ModelSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: default_temperature(),
            max_tokens: None,
            top_k: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Build the request for one model call, merging the per-call
    /// parameters over these defaults.
    pub fn build_request(&self, prompt: &str, stop: &[String], stream: bool) -> ModelRequest {
        ModelRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_k: self.top_k,
            top_p: self.top_p,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            stop: stop.to_vec(),
            stream,
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self::new("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_request_applies_defaults_and_call_parameters() {
        let settings = ModelSettings::new("qwen-max")
            .with_temperature(0.2)
            .with_max_tokens(512);

        let stop = vec!["Observation:".to_string()];
        let request = settings.build_request("What is 2 + 2?", &stop, true);

        assert_eq!(request.model, "qwen-max");
        assert_eq!(request.temperature, 0.2);
        assert_eq!(request.max_tokens, Some(512));
        assert_eq!(request.stop, stop);
        assert!(request.stream);
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: ModelSettings = serde_json::from_str(r#"{"model":"gpt-4o"}"#).unwrap();
        assert_eq!(settings.model, "gpt-4o");
        assert_eq!(settings.temperature, 0.0);
        assert!(settings.max_tokens.is_none());
    }
}
