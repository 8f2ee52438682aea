//! Callback fabric — lifecycle observation for chains, models, tools,
//! agents, and retrievers.
//!
//! A `CallbackManager` fans each lifecycle event out to zero or more
//! handlers. Handler failures are logged and swallowed by the
//! dispatcher, never re-raised into the execution path. `child()`
//! derives a manager for a nested scope: same handler set, fresh
//! `RunManager` descended from the parent's, so nested runs stay
//! attributable without losing observers.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::warn;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::error::CallbackError;

/// What kind of run a scope is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunType {
    Chain,
    Llm,
    Tool,
    Retriever,
}

impl std::fmt::Display for RunType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunType::Chain => write!(f, "chain"),
            RunType::Llm => write!(f, "llm"),
            RunType::Tool => write!(f, "tool"),
            RunType::Retriever => write!(f, "retriever"),
        }
    }
}

/// Run metadata snapshot handed to handlers with every hook.
#[derive(Debug, Clone)]
pub struct RunInfo {
    /// Id of the run this scope belongs to.
    pub run_id: String,

    /// Id of the parent scope's run, if this is a nested scope.
    pub parent_run_id: Option<String>,

    /// Kind of the most recently started run in this scope.
    pub run_type: Option<RunType>,

    /// Milliseconds since the most recent `*_start` hook in this scope.
    pub elapsed_ms: u64,
}

/// Tracks run identity and start time for one scope.
///
/// The four `*_start` hooks mark a new run start here; end/error hooks
/// read the elapsed time from the same mark.
#[derive(Debug)]
pub struct RunManager {
    run_id: String,
    parent_run_id: Option<String>,
    state: Mutex<RunState>,
}

#[derive(Debug)]
struct RunState {
    run_type: Option<RunType>,
    started_at: Instant,
}

impl RunManager {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            parent_run_id: None,
            state: Mutex::new(RunState {
                run_type: None,
                started_at: Instant::now(),
            }),
        }
    }

    /// A run manager for a nested scope, descended from this one.
    pub fn derive(&self) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            parent_run_id: Some(self.run_id.clone()),
            state: Mutex::new(RunState {
                run_type: None,
                started_at: Instant::now(),
            }),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn parent_run_id(&self) -> Option<&str> {
        self.parent_run_id.as_deref()
    }

    fn mark_start(&self, run_type: RunType) {
        let mut state = self.state.lock().unwrap();
        state.run_type = Some(run_type);
        state.started_at = Instant::now();
    }

    fn info(&self) -> RunInfo {
        let state = self.state.lock().unwrap();
        RunInfo {
            run_id: self.run_id.clone(),
            parent_run_id: self.parent_run_id.clone(),
            run_type: state.run_type,
            elapsed_ms: state.started_at.elapsed().as_millis() as u64,
        }
    }
}

impl Default for RunManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one handler hook. The dispatcher logs and swallows `Err`.
pub type CallbackOutcome = std::result::Result<(), CallbackError>;

/// Observer of execution lifecycle events.
///
/// Every hook has a no-op default, so handlers implement only what they
/// care about. Hooks run inline on the calling task and may fire
/// concurrently from independent invocations; long-running work belongs
/// on a channel, not in the hook.
pub trait CallbackHandler: Send + Sync {
    fn on_chain_start(&self, _run: &RunInfo, _context: &ExecutionContext) -> CallbackOutcome {
        Ok(())
    }
    fn on_chain_end(&self, _run: &RunInfo, _context: &ExecutionContext) -> CallbackOutcome {
        Ok(())
    }
    fn on_chain_error(&self, _run: &RunInfo, _context: &ExecutionContext) -> CallbackOutcome {
        Ok(())
    }
    fn on_llm_start(&self, _run: &RunInfo, _context: &ExecutionContext) -> CallbackOutcome {
        Ok(())
    }
    fn on_llm_end(&self, _run: &RunInfo, _context: &ExecutionContext) -> CallbackOutcome {
        Ok(())
    }
    fn on_llm_error(&self, _run: &RunInfo, _context: &ExecutionContext) -> CallbackOutcome {
        Ok(())
    }
    fn on_tool_start(&self, _run: &RunInfo, _context: &ExecutionContext) -> CallbackOutcome {
        Ok(())
    }
    fn on_tool_end(&self, _run: &RunInfo, _context: &ExecutionContext) -> CallbackOutcome {
        Ok(())
    }
    fn on_tool_error(&self, _run: &RunInfo, _context: &ExecutionContext) -> CallbackOutcome {
        Ok(())
    }
    fn on_agent_action(&self, _run: &RunInfo, _context: &ExecutionContext) -> CallbackOutcome {
        Ok(())
    }
    fn on_agent_finish(&self, _run: &RunInfo, _context: &ExecutionContext) -> CallbackOutcome {
        Ok(())
    }
    fn on_retriever_start(&self, _run: &RunInfo, _context: &ExecutionContext) -> CallbackOutcome {
        Ok(())
    }
    fn on_retriever_end(&self, _run: &RunInfo, _context: &ExecutionContext) -> CallbackOutcome {
        Ok(())
    }
    fn on_retriever_error(&self, _run: &RunInfo, _context: &ExecutionContext) -> CallbackOutcome {
        Ok(())
    }
}

/// Fan-out dispatcher of lifecycle events.
///
/// Cheap to clone; clones share the handler list and the run scope.
/// Use `child()` to enter a nested scope.
#[derive(Clone)]
pub struct CallbackManager {
    handlers: Arc<Vec<Arc<dyn CallbackHandler>>>,
    run: Arc<RunManager>,
}

impl CallbackManager {
    /// A manager with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
            run: Arc::new(RunManager::new()),
        }
    }

    /// Add a handler. Builder-style; prefer wiring handlers up before
    /// the manager is shared.
    pub fn with_handler(mut self, handler: Arc<dyn CallbackHandler>) -> Self {
        let mut handlers = self.handlers.as_ref().clone();
        handlers.push(handler);
        self.handlers = Arc::new(handlers);
        self
    }

    /// A manager for a nested scope: same handlers, descended run.
    pub fn child(&self) -> Self {
        Self {
            handlers: Arc::clone(&self.handlers),
            run: Arc::new(self.run.derive()),
        }
    }

    /// Snapshot of this scope's run metadata.
    pub fn run_info(&self) -> RunInfo {
        self.run.info()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    // ── Chain hooks ───────────────────────────────────────────────────

    pub fn on_chain_start(&self, context: &ExecutionContext) {
        self.run.mark_start(RunType::Chain);
        self.dispatch("on_chain_start", context, |h, run, ctx| {
            h.on_chain_start(run, ctx)
        });
    }

    pub fn on_chain_end(&self, context: &ExecutionContext) {
        self.dispatch("on_chain_end", context, |h, run, ctx| {
            h.on_chain_end(run, ctx)
        });
    }

    pub fn on_chain_error(&self, context: &ExecutionContext) {
        self.dispatch("on_chain_error", context, |h, run, ctx| {
            h.on_chain_error(run, ctx)
        });
    }

    // ── Model hooks ───────────────────────────────────────────────────

    pub fn on_llm_start(&self, context: &ExecutionContext) {
        self.run.mark_start(RunType::Llm);
        self.dispatch("on_llm_start", context, |h, run, ctx| {
            h.on_llm_start(run, ctx)
        });
    }

    pub fn on_llm_end(&self, context: &ExecutionContext) {
        self.dispatch("on_llm_end", context, |h, run, ctx| h.on_llm_end(run, ctx));
    }

    pub fn on_llm_error(&self, context: &ExecutionContext) {
        self.dispatch("on_llm_error", context, |h, run, ctx| {
            h.on_llm_error(run, ctx)
        });
    }

    // ── Tool hooks ────────────────────────────────────────────────────

    pub fn on_tool_start(&self, context: &ExecutionContext) {
        self.run.mark_start(RunType::Tool);
        self.dispatch("on_tool_start", context, |h, run, ctx| {
            h.on_tool_start(run, ctx)
        });
    }

    pub fn on_tool_end(&self, context: &ExecutionContext) {
        self.dispatch("on_tool_end", context, |h, run, ctx| {
            h.on_tool_end(run, ctx)
        });
    }

    pub fn on_tool_error(&self, context: &ExecutionContext) {
        self.dispatch("on_tool_error", context, |h, run, ctx| {
            h.on_tool_error(run, ctx)
        });
    }

    // ── Agent hooks ───────────────────────────────────────────────────

    pub fn on_agent_action(&self, context: &ExecutionContext) {
        self.dispatch("on_agent_action", context, |h, run, ctx| {
            h.on_agent_action(run, ctx)
        });
    }

    pub fn on_agent_finish(&self, context: &ExecutionContext) {
        self.dispatch("on_agent_finish", context, |h, run, ctx| {
            h.on_agent_finish(run, ctx)
        });
    }

    // ── Retriever hooks ───────────────────────────────────────────────

    pub fn on_retriever_start(&self, context: &ExecutionContext) {
        self.run.mark_start(RunType::Retriever);
        self.dispatch("on_retriever_start", context, |h, run, ctx| {
            h.on_retriever_start(run, ctx)
        });
    }

    pub fn on_retriever_end(&self, context: &ExecutionContext) {
        self.dispatch("on_retriever_end", context, |h, run, ctx| {
            h.on_retriever_end(run, ctx)
        });
    }

    pub fn on_retriever_error(&self, context: &ExecutionContext) {
        self.dispatch("on_retriever_error", context, |h, run, ctx| {
            h.on_retriever_error(run, ctx)
        });
    }

    fn dispatch<F>(&self, hook: &'static str, context: &ExecutionContext, call: F)
    where
        F: Fn(&dyn CallbackHandler, &RunInfo, &ExecutionContext) -> CallbackOutcome,
    {
        let info = self.run.info();
        for handler in self.handlers.iter() {
            if let Err(e) = call(handler.as_ref(), &info, context) {
                warn!(hook, error = %e, "Callback handler failed");
            }
        }
    }
}

impl Default for CallbackManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler that logs every lifecycle event through `tracing`.
///
/// Structured fields carry the run hierarchy and elapsed times, so an
/// env-filter on this crate is enough to trace a whole agent run.
pub struct TracingCallbackHandler;

impl CallbackHandler for TracingCallbackHandler {
    fn on_chain_start(&self, run: &RunInfo, context: &ExecutionContext) -> CallbackOutcome {
        tracing::info!(
            run_id = %run.run_id,
            chain = context.chain_name.as_deref().unwrap_or("-"),
            child_chain = context.child_chain_name.as_deref().unwrap_or("-"),
            "chain started"
        );
        Ok(())
    }

    fn on_chain_end(&self, run: &RunInfo, context: &ExecutionContext) -> CallbackOutcome {
        tracing::info!(
            run_id = %run.run_id,
            chain = context.chain_name.as_deref().unwrap_or("-"),
            child_chain = context.child_chain_name.as_deref().unwrap_or("-"),
            elapsed_ms = run.elapsed_ms,
            "chain finished"
        );
        Ok(())
    }

    fn on_chain_error(&self, run: &RunInfo, context: &ExecutionContext) -> CallbackOutcome {
        tracing::warn!(
            run_id = %run.run_id,
            chain = context.chain_name.as_deref().unwrap_or("-"),
            error = context.error.as_deref().unwrap_or("-"),
            elapsed_ms = run.elapsed_ms,
            "chain failed"
        );
        Ok(())
    }

    fn on_llm_start(&self, run: &RunInfo, context: &ExecutionContext) -> CallbackOutcome {
        tracing::info!(
            run_id = %run.run_id,
            parent_run_id = run.parent_run_id.as_deref().unwrap_or("-"),
            model = context.model_name.as_deref().unwrap_or("-"),
            prompts = context.prompts.len(),
            "model call started"
        );
        Ok(())
    }

    fn on_llm_end(&self, run: &RunInfo, context: &ExecutionContext) -> CallbackOutcome {
        let groups = context
            .llm_result
            .as_ref()
            .map(|r| r.generations.len())
            .unwrap_or(0);
        tracing::info!(
            run_id = %run.run_id,
            model = context.model_name.as_deref().unwrap_or("-"),
            generation_groups = groups,
            elapsed_ms = run.elapsed_ms,
            "model call finished"
        );
        Ok(())
    }

    fn on_llm_error(&self, run: &RunInfo, context: &ExecutionContext) -> CallbackOutcome {
        tracing::warn!(
            run_id = %run.run_id,
            model = context.model_name.as_deref().unwrap_or("-"),
            error = context.error.as_deref().unwrap_or("-"),
            elapsed_ms = run.elapsed_ms,
            "model call failed"
        );
        Ok(())
    }

    fn on_tool_start(&self, run: &RunInfo, context: &ExecutionContext) -> CallbackOutcome {
        tracing::info!(
            run_id = %run.run_id,
            tool = context.tool_name.as_deref().unwrap_or("-"),
            "tool started"
        );
        Ok(())
    }

    fn on_tool_end(&self, run: &RunInfo, context: &ExecutionContext) -> CallbackOutcome {
        tracing::info!(
            run_id = %run.run_id,
            tool = context.tool_name.as_deref().unwrap_or("-"),
            elapsed_ms = run.elapsed_ms,
            "tool finished"
        );
        Ok(())
    }

    fn on_tool_error(&self, run: &RunInfo, context: &ExecutionContext) -> CallbackOutcome {
        tracing::warn!(
            run_id = %run.run_id,
            tool = context.tool_name.as_deref().unwrap_or("-"),
            error = context.error.as_deref().unwrap_or("-"),
            "tool failed"
        );
        Ok(())
    }

    fn on_agent_action(&self, run: &RunInfo, context: &ExecutionContext) -> CallbackOutcome {
        let (tool, input) = context
            .agent_action
            .as_ref()
            .map(|a| (a.tool.as_str(), a.tool_input.as_str()))
            .unwrap_or(("-", "-"));
        tracing::info!(run_id = %run.run_id, tool, input, "agent chose action");
        Ok(())
    }

    fn on_agent_finish(&self, run: &RunInfo, context: &ExecutionContext) -> CallbackOutcome {
        let output = context
            .agent_finish
            .as_ref()
            .and_then(|f| f.output_text())
            .unwrap_or("-");
        tracing::info!(run_id = %run.run_id, output, elapsed_ms = run.elapsed_ms, "agent finished");
        Ok(())
    }

    fn on_retriever_start(&self, run: &RunInfo, _context: &ExecutionContext) -> CallbackOutcome {
        tracing::info!(run_id = %run.run_id, "retriever started");
        Ok(())
    }

    fn on_retriever_end(&self, run: &RunInfo, _context: &ExecutionContext) -> CallbackOutcome {
        tracing::info!(run_id = %run.run_id, elapsed_ms = run.elapsed_ms, "retriever finished");
        Ok(())
    }

    fn on_retriever_error(&self, run: &RunInfo, context: &ExecutionContext) -> CallbackOutcome {
        tracing::warn!(
            run_id = %run.run_id,
            error = context.error.as_deref().unwrap_or("-"),
            "retriever failed"
        );
        Ok(())
    }
}
