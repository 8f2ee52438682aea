//! # Tangle Agent
//!
//! The planner and the loop that drives it.
//!
//! An agent run follows a **plan → act → observe** cycle:
//!
//! 1. The [`AgentPlanner`] folds the step history into a prompt and
//!    asks the model for a decision.
//! 2. An [`AgentDecision::Action`](tangle_core::AgentDecision) names a
//!    tool; the executor resolves it against the [`ToolRegistry`] and
//!    runs it.
//! 3. The tool's output is recorded as the action's observation and
//!    the cycle repeats.
//!
//! The loop ends when the planner produces a finish, a tool interrupts
//! the run, or an iteration/time limit trips. Limited runs stand down
//! with a fixed answer instead of raising.

pub mod executor;
pub mod parser;
pub mod planner;
pub mod registry;

pub use executor::{
    AgentExecutor, DEFAULT_FORCE_STOPPING_CONTENT, DEFAULT_MAX_ITERATIONS, EarlyStoppingMethod,
};
pub use parser::ReactOutputParser;
pub use planner::{Agent, AgentPlanner, INPUT_KEY, SCRATCHPAD_KEY};
pub use registry::ToolRegistry;
