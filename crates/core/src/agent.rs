//! Planner decision types.
//!
//! A planning pass ends in exactly one of two ways: the model picks a
//! tool to invoke (`AgentAction`) or it produces a final answer
//! (`AgentFinish`). `AgentDecision` is the closed union of the two;
//! there is no third case and no runtime type sniffing.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::Record;
use crate::tool::Tool;

/// Output key under which a final answer is recorded.
pub const OUTPUT_KEY: &str = "output";

/// Output key under which a run's step history is recorded when the
/// caller asked for it.
pub const INTERMEDIATE_STEPS_KEY: &str = "intermediate_steps";

/// A tool invocation chosen by the planner.
///
/// Created by `plan`, completed once when the tool result arrives
/// (observation filled in), then appended immutably to the step history.
#[derive(Clone, Serialize, Deserialize)]
pub struct AgentAction {
    /// The tool name the model asked for (possibly decorated; the
    /// executor resolves it against the registry).
    pub tool: String,

    /// The input to pass to the tool.
    pub tool_input: String,

    /// The tool's output, filled in after execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,

    /// The free-text reasoning that produced this action; replayed
    /// verbatim into the next scratchpad.
    pub log: String,

    /// Tool set the executor must switch to for subsequent iterations,
    /// if the executed tool requested a swap.
    #[serde(skip)]
    pub next_tools: Option<Vec<Arc<dyn Tool>>>,
}

impl AgentAction {
    pub fn new(
        tool: impl Into<String>,
        tool_input: impl Into<String>,
        log: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            tool_input: tool_input.into(),
            observation: None,
            log: log.into(),
            next_tools: None,
        }
    }

    /// Copy of this action with the observation recorded.
    pub fn observed(mut self, observation: impl Into<String>) -> Self {
        self.observation = Some(observation.into());
        self
    }
}

impl std::fmt::Debug for AgentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentAction")
            .field("tool", &self.tool)
            .field("tool_input", &self.tool_input)
            .field("observation", &self.observation)
            .field("log", &self.log)
            .field("next_tools", &self.next_tools.as_ref().map(|t| t.len()))
            .finish()
    }
}

/// The terminal output of an agent run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentFinish {
    /// The final key/value output record.
    pub return_values: Record,

    /// The reasoning that produced the finish.
    pub log: String,
}

impl AgentFinish {
    /// A finish whose record carries a single `output` entry.
    pub fn from_output(output: impl Into<String>, log: impl Into<String>) -> Self {
        let mut return_values = Record::new();
        return_values.insert(OUTPUT_KEY.into(), serde_json::Value::String(output.into()));
        Self {
            return_values,
            log: log.into(),
        }
    }

    /// The `output` entry as text, if present.
    pub fn output_text(&self) -> Option<&str> {
        self.return_values.get(OUTPUT_KEY).and_then(|v| v.as_str())
    }
}

/// What the planner decided: act or finish. Closed union — callers
/// match exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentDecision {
    Action(AgentAction),
    Finish(AgentFinish),
}

impl AgentDecision {
    pub fn is_finish(&self) -> bool {
        matches!(self, AgentDecision::Finish(_))
    }
}

/// Turns raw model text into a decision.
///
/// Implementations must be total over merely unexpected formatting:
/// text that matches no recognized action shape maps to a Finish
/// carrying the raw text, not to an error. `Err` is reserved for
/// genuinely unrecoverable parsing state.
pub trait AgentOutputParser: Send + Sync {
    fn parse(&self, text: &str) -> crate::error::Result<AgentDecision>;
}
