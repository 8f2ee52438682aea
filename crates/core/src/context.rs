//! Execution context — the request-scoped snapshot threaded through
//! every call.
//!
//! The context is an immutable value: entering a nested scope produces
//! a copy with overrides, never a shared mutation. Callback handlers
//! receive the snapshot that was current when the hook fired. One
//! top-level invocation owns one context lineage; concurrent
//! invocations never share one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Record;
use crate::agent::{AgentAction, AgentFinish};
use crate::output::LlmResult;

/// Snapshot of one point in a chain/tool/model execution.
///
/// A chain invoked while another chain is already recorded lands in the
/// `child_*` fields, which is how nested runs stay distinguishable from
/// the run that spawned them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Correlates every snapshot descended from one top-level call.
    pub correlation_id: String,

    /// When the top-level call began.
    pub started_at: DateTime<Utc>,

    /// Name of the outermost chain currently executing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_name: Option<String>,

    /// Name of the nested chain currently executing, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_chain_name: Option<String>,

    /// Inputs of the outermost chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Record>,

    /// Outputs of the outermost chain, once produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Record>,

    /// Inputs of the nested chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_inputs: Option<Record>,

    /// Outputs of the nested chain, once produced. Also serves as the
    /// precomputed-replay slot for nested chains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_outputs: Option<Record>,

    /// Model involved in the current model call, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    /// Prompts submitted to the current model call.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prompts: Vec<String>,

    /// Result of the current model call. When set before the call, the
    /// generate layer returns it verbatim (replay/testing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_result: Option<LlmResult>,

    /// Tool involved in the current tool call, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Input of the current tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<String>,

    /// Output of the current tool call, once produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<String>,

    /// Action the planner most recently produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_action: Option<AgentAction>,

    /// Finish the planner most recently produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_finish: Option<AgentFinish>,

    /// Display text of a captured error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionContext {
    /// Fresh context for a new top-level invocation.
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            chain_name: None,
            child_chain_name: None,
            inputs: None,
            outputs: None,
            child_inputs: None,
            child_outputs: None,
            model_name: None,
            prompts: Vec::new(),
            llm_result: None,
            tool_name: None,
            tool_input: None,
            tool_result: None,
            agent_action: None,
            agent_finish: None,
            error: None,
        }
    }

    /// Whether a chain named `chain_name` would run as a nested scope
    /// in this context (some other chain is already recorded).
    pub fn is_child_scope_for(&self, chain_name: &str) -> bool {
        match &self.chain_name {
            Some(current) => current != chain_name,
            None => false,
        }
    }

    /// Snapshot for a chain entering execution. Lands in the top-level
    /// or child slot depending on what is already recorded; incoming
    /// inputs are merged over any already present in that slot. Output
    /// slots are left untouched, which is what lets a caller preload
    /// them for replay.
    pub fn chain_started(&self, chain_name: &str, inputs: &Record) -> Self {
        let mut next = self.clone();
        if next.is_child_scope_for(chain_name) {
            next.child_chain_name = Some(chain_name.to_string());
            next.child_inputs = Some(merge_records(next.child_inputs.as_ref(), inputs));
        } else {
            next.chain_name = Some(chain_name.to_string());
            next.inputs = Some(merge_records(next.inputs.as_ref(), inputs));
        }
        next
    }

    /// Snapshot for a chain that completed with `outputs` (which may be
    /// absent for a limit-stopped run).
    pub fn chain_finished(
        &self,
        chain_name: &str,
        inputs: &Record,
        outputs: Option<&Record>,
    ) -> Self {
        let mut next = self.clone();
        if next.is_child_scope_for(chain_name) {
            next.child_chain_name = Some(chain_name.to_string());
            next.child_inputs = Some(inputs.clone());
            next.child_outputs = outputs.cloned();
        } else {
            next.chain_name = Some(chain_name.to_string());
            next.inputs = Some(inputs.clone());
            next.outputs = outputs.cloned();
        }
        next
    }

    /// Snapshot for a chain that failed.
    pub fn chain_failed(&self, chain_name: &str, inputs: &Record, error: &str) -> Self {
        let mut next = self.clone();
        if next.is_child_scope_for(chain_name) {
            next.child_chain_name = Some(chain_name.to_string());
            next.child_inputs = Some(inputs.clone());
            next.child_outputs = None;
        } else {
            next.chain_name = Some(chain_name.to_string());
            next.inputs = Some(inputs.clone());
            next.outputs = None;
        }
        next.error = Some(error.to_string());
        next
    }

    /// Snapshot for a model call entering execution.
    pub fn model_started(&self, model_name: &str, prompts: &[String]) -> Self {
        let mut next = self.clone();
        next.model_name = Some(model_name.to_string());
        next.prompts = prompts.to_vec();
        next.llm_result = None;
        next
    }

    /// Snapshot with the model call's result recorded.
    pub fn with_llm_result(&self, result: LlmResult) -> Self {
        let mut next = self.clone();
        next.llm_result = Some(result);
        next
    }

    /// Precompute a model result so the next generate call replays it
    /// instead of invoking the model.
    pub fn with_precomputed(result: LlmResult) -> Self {
        Self::new().with_llm_result(result)
    }

    /// Snapshot for a tool call entering execution.
    pub fn tool_started(&self, tool_name: &str, tool_input: &str) -> Self {
        let mut next = self.clone();
        next.tool_name = Some(tool_name.to_string());
        next.tool_input = Some(tool_input.to_string());
        next.tool_result = None;
        next
    }

    /// Snapshot with the tool call's output recorded.
    pub fn with_tool_result(&self, result: &str) -> Self {
        let mut next = self.clone();
        next.tool_result = Some(result.to_string());
        next
    }

    /// Snapshot with a planner action recorded.
    pub fn with_agent_action(&self, action: AgentAction) -> Self {
        let mut next = self.clone();
        next.agent_action = Some(action);
        next
    }

    /// Snapshot with a planner finish recorded.
    pub fn with_agent_finish(&self, finish: AgentFinish) -> Self {
        let mut next = self.clone();
        next.agent_finish = Some(finish);
        next
    }

    /// Snapshot with an error recorded.
    pub fn with_error(&self, error: &str) -> Self {
        let mut next = self.clone();
        next.error = Some(error.to_string());
        next
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge `incoming` over `existing`; incoming entries win.
fn merge_records(existing: Option<&Record>, incoming: &Record) -> Record {
    let mut merged = existing.cloned().unwrap_or_default();
    for (key, value) in incoming {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
