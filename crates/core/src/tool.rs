//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world. Each
//! tool call carries the execution context so callbacks can attribute
//! the invocation to the run that issued it.

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::ToolError;

/// What a tool execution produced.
///
/// Besides plain output a tool can signal two loop-affecting outcomes:
/// `interrupted` ends the agent run immediately with the tool's output
/// as the final answer, and `next_tools` swaps the executor's active
/// tool set for all subsequent iterations.
#[derive(Clone, Default)]
pub struct ToolOutcome {
    /// The textual output, recorded as the action's observation.
    pub output: String,

    /// When set, the run ends this iteration with `output` as the
    /// final answer.
    pub interrupted: bool,

    /// When set, the executor switches to this tool set before the
    /// next iteration.
    pub next_tools: Option<Vec<Arc<dyn Tool>>>,
}

impl ToolOutcome {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            interrupted: false,
            next_tools: None,
        }
    }

    /// An outcome that ends the run with `output` as the final answer.
    pub fn interrupt(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            interrupted: true,
            next_tools: None,
        }
    }

    /// Request a tool-set swap for subsequent iterations.
    pub fn with_next_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.next_tools = Some(tools);
        self
    }
}

impl std::fmt::Debug for ToolOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolOutcome")
            .field("output", &self.output)
            .field("interrupted", &self.interrupted)
            .field("next_tools", &self.next_tools.as_ref().map(|t| t.len()))
            .finish()
    }
}

/// The core Tool trait.
///
/// Implementations must be safely callable once per agent action, from
/// concurrent runs sharing the same `Arc<dyn Tool>`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "search", "calculator").
    fn name(&self) -> &str;

    /// A description of what this tool does (rendered into the
    /// planning prompt).
    fn description(&self) -> &str;

    /// Execute the tool with the given input.
    async fn run(
        &self,
        input: &str,
        context: &ExecutionContext,
    ) -> std::result::Result<ToolOutcome, ToolError>;
}
