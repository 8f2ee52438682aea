//! # Tangle LLM
//!
//! The model invocation layer: wraps a `ChatModel` backend with
//! configured defaults, response caching, callback emission, and
//! streaming/blocking dispatch. Chains call `LlmEngine::generate`
//! instead of talking to backends directly.

pub mod engine;
pub mod settings;
pub mod testing;
pub mod token;

pub use engine::LlmEngine;
pub use settings::ModelSettings;
pub use token::estimate_tokens;
