//! # Tangle Core
//!
//! Domain types, traits, and error definitions for the Tangle
//! orchestration engine. This crate defines the domain model that all
//! other crates implement against: execution context, callbacks,
//! models, tools, caching, and conversation memory.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in
//! their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

use std::collections::HashMap;

pub mod agent;
pub mod cache;
pub mod callback;
pub mod context;
pub mod document;
pub mod error;
pub mod memory;
pub mod model;
pub mod output;
pub mod tool;

/// String-keyed record of JSON values. Chains speak this shape for
/// their inputs and outputs.
pub type Record = HashMap<String, serde_json::Value>;

// Re-export key types at crate root for ergonomics
pub use agent::{
    AgentAction, AgentDecision, AgentFinish, AgentOutputParser, INTERMEDIATE_STEPS_KEY, OUTPUT_KEY,
};
pub use cache::{InMemoryCache, ResponseCache, stop_key};
pub use callback::{
    CallbackHandler, CallbackManager, CallbackOutcome, RunInfo, RunManager, RunType,
    TracingCallbackHandler,
};
pub use context::ExecutionContext;
pub use document::Document;
pub use error::{CacheError, CallbackError, Error, MemoryError, ModelError, Result, ToolError};
pub use memory::{BufferMemory, Memory};
pub use model::{ChatModel, ModelRequest, StreamSink};
pub use output::{Generation, LlmResult, ModelReply, TokenUsage};
pub use tool::{Tool, ToolOutcome};
