//! The agent control loop.
//!
//! `AgentExecutor` is a chain whose body is the plan/act/observe loop:
//! ask the planner for a decision, run the chosen tool, record the
//! observation, repeat until the planner finishes or a limit trips.
//! Limits never raise; a limited run stands down with a fixed message
//! so callers always get a record back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use tangle_chain::{Chain, Result};
use tangle_core::{
    AgentAction, AgentDecision, AgentFinish, CallbackManager, ExecutionContext,
    INTERMEDIATE_STEPS_KEY, Memory, OUTPUT_KEY, Record, StreamSink, Tool,
};

use crate::planner::AgentPlanner;
use crate::registry::ToolRegistry;

/// Iteration ceiling applied unless the caller lifts it.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// The answer a limited or under-powered run stands down with.
pub const DEFAULT_FORCE_STOPPING_CONTENT: &str =
    "Agent stopped due to iteration limit or time limit.";

/// What to do when a run must stop before the planner finished on its
/// own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EarlyStoppingMethod {
    /// Overwrite every finish, even a genuine one, with the stand-down
    /// message.
    Force,
    /// Let a genuine finish through; only limited runs stand down.
    #[default]
    Generate,
}

/// One turn of the loop, from the executor's point of view.
enum StepOutcome {
    Finish(AgentFinish),
    Action(AgentAction),
    /// The planner had nothing, or the planned tool does not exist.
    Stopped,
}

/// Drives an `AgentPlanner` against a tool set until it finishes.
pub struct AgentExecutor {
    agent: Arc<dyn AgentPlanner>,
    tools: Vec<Arc<dyn Tool>>,
    max_iterations: Option<usize>,
    max_execution_time: Option<Duration>,
    early_stopping_method: EarlyStoppingMethod,
    force_stopping_content: Option<String>,
    return_intermediate_steps: bool,
    callbacks: CallbackManager,
    memory: Option<Arc<dyn Memory>>,
}

impl AgentExecutor {
    pub fn new(agent: Arc<dyn AgentPlanner>, tools: Vec<Arc<dyn Tool>>) -> Self {
        Self {
            agent,
            tools,
            max_iterations: Some(DEFAULT_MAX_ITERATIONS),
            max_execution_time: None,
            early_stopping_method: EarlyStoppingMethod::default(),
            force_stopping_content: None,
            return_intermediate_steps: false,
            callbacks: CallbackManager::new(),
            memory: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Lift the iteration ceiling entirely. A time limit is strongly
    /// advised in that case.
    pub fn without_iteration_limit(mut self) -> Self {
        self.max_iterations = None;
        self
    }

    pub fn with_max_execution_time(mut self, limit: Duration) -> Self {
        self.max_execution_time = Some(limit);
        self
    }

    pub fn with_early_stopping_method(mut self, method: EarlyStoppingMethod) -> Self {
        self.early_stopping_method = method;
        self
    }

    /// Replace the default stand-down message.
    pub fn with_force_stopping_content(mut self, content: impl Into<String>) -> Self {
        self.force_stopping_content = Some(content.into());
        self
    }

    pub fn with_return_intermediate_steps(mut self, flag: bool) -> Self {
        self.return_intermediate_steps = flag;
        self
    }

    pub fn with_callbacks(mut self, callbacks: CallbackManager) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    fn should_continue(&self, iterations: usize, elapsed: Duration) -> bool {
        if let Some(max) = self.max_iterations {
            if iterations >= max {
                return false;
            }
        }
        if let Some(limit) = self.max_execution_time {
            if elapsed >= limit {
                return false;
            }
        }
        true
    }

    fn stand_down_message(&self) -> &str {
        self.force_stopping_content
            .as_deref()
            .unwrap_or(DEFAULT_FORCE_STOPPING_CONTENT)
    }

    fn stand_down_record(&self) -> Record {
        let mut return_values = Record::new();
        return_values.insert(
            OUTPUT_KEY.to_string(),
            Value::String(self.stand_down_message().to_string()),
        );
        return_values
    }

    fn stopped_finish(&self) -> AgentFinish {
        AgentFinish {
            return_values: self.stand_down_record(),
            log: String::new(),
        }
    }

    /// One plan/act turn.
    async fn take_next_step(
        &self,
        planner: &Arc<dyn AgentPlanner>,
        registry: &ToolRegistry,
        inputs: &Record,
        steps: &[AgentAction],
        context: &ExecutionContext,
        sink: Option<StreamSink>,
    ) -> Result<StepOutcome> {
        // ── Plan ──
        let Some(decision) = planner.plan(steps, inputs, context, sink).await? else {
            return Ok(StepOutcome::Stopped);
        };

        let mut action = match decision {
            AgentDecision::Finish(mut finish) => {
                if self.early_stopping_method == EarlyStoppingMethod::Force {
                    finish.return_values = self.stand_down_record();
                }
                return Ok(StepOutcome::Finish(finish));
            }
            AgentDecision::Action(action) => action,
        };

        self.callbacks
            .on_agent_action(&context.with_agent_action(action.clone()));

        // ── Resolve the tool ──
        let Some(tool) = registry.resolve(&action.tool) else {
            warn!(tool = %action.tool, "Planned tool is not registered; standing down");
            return Ok(StepOutcome::Stopped);
        };

        // ── Run it ──
        let tool_context = context.tool_started(tool.name(), &action.tool_input);
        self.callbacks.on_tool_start(&tool_context);
        let outcome = match tool.run(&action.tool_input, &tool_context).await {
            Ok(outcome) => {
                self.callbacks
                    .on_tool_end(&tool_context.with_tool_result(&outcome.output));
                outcome
            }
            Err(e) => {
                self.callbacks
                    .on_tool_error(&tool_context.with_error(&e.to_string()));
                return Err(tangle_core::Error::from(e).into());
            }
        };

        if outcome.interrupted {
            debug!(tool = %tool.name(), "Tool interrupted the run");
            let mut return_values = Record::new();
            return_values.insert(
                OUTPUT_KEY.to_string(),
                Value::String(outcome.output.clone()),
            );
            return Ok(StepOutcome::Finish(AgentFinish {
                return_values,
                log: outcome.output,
            }));
        }

        if let Some(next_tools) = outcome.next_tools {
            action.next_tools = Some(next_tools);
        }
        Ok(StepOutcome::Action(action.observed(outcome.output)))
    }

    /// Close out the run: fire the finish hook, shape the outputs.
    fn return_agent(
        &self,
        finish: AgentFinish,
        steps: &[AgentAction],
        context: &ExecutionContext,
    ) -> Result<Record> {
        self.callbacks
            .on_agent_finish(&context.with_agent_finish(finish.clone()));

        let mut outputs = finish.return_values;
        if self.return_intermediate_steps {
            outputs.insert(
                INTERMEDIATE_STEPS_KEY.to_string(),
                serde_json::to_value(steps).map_err(tangle_core::Error::from)?,
            );
        }
        Ok(outputs)
    }
}

#[async_trait]
impl Chain for AgentExecutor {
    fn name(&self) -> &str {
        "agent_executor"
    }

    fn input_keys(&self) -> Vec<String> {
        self.agent.input_keys()
    }

    fn output_keys(&self) -> Vec<String> {
        let mut keys = self.agent.return_values();
        if self.return_intermediate_steps {
            keys.push(INTERMEDIATE_STEPS_KEY.to_string());
        }
        keys
    }

    fn callbacks(&self) -> &CallbackManager {
        &self.callbacks
    }

    fn memory(&self) -> Option<Arc<dyn Memory>> {
        self.memory.clone()
    }

    async fn call(
        &self,
        inputs: &Record,
        context: &ExecutionContext,
        sink: Option<StreamSink>,
    ) -> Result<Record> {
        let mut registry = ToolRegistry::from_tools(self.tools.iter().cloned());
        let mut planner = Arc::clone(&self.agent);
        let mut steps: Vec<AgentAction> = Vec::new();
        let mut iterations = 0usize;
        let started = Instant::now();

        info!(
            tools = registry.len(),
            max_iterations = ?self.max_iterations,
            "Agent loop starting"
        );

        while self.should_continue(iterations, started.elapsed()) {
            let step = self
                .take_next_step(&planner, &registry, inputs, &steps, context, sink.clone())
                .await?;

            match step {
                StepOutcome::Finish(finish) => {
                    debug!(iterations, "Agent finished");
                    return self.return_agent(finish, &steps, context);
                }
                StepOutcome::Stopped => {
                    return self.return_agent(self.stopped_finish(), &steps, context);
                }
                StepOutcome::Action(action) => {
                    // ── Tool-set swap requested by the tool ──
                    if let Some(next_tools) = &action.next_tools {
                        debug!(count = next_tools.len(), "Swapping active tool set");
                        registry = ToolRegistry::from_tools(next_tools.iter().cloned());
                        if let Some(rebuilt) = planner.retooled(next_tools) {
                            planner = rebuilt;
                        }
                    }
                    steps.push(action);
                    iterations += 1;
                }
            }
        }

        warn!(iterations, "Agent stopped by iteration or time limit");
        self.return_agent(self.stopped_finish(), &steps, context)
    }
}
