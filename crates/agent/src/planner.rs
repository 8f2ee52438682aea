//! Planning: deciding the next step from the history so far.
//!
//! `AgentPlanner` is the seam the executor drives; `Agent` is the
//! concrete ReAct planner that folds prior steps into a scratchpad,
//! renders a prompt over them, and parses the completion into a
//! decision.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tangle_chain::{LlmChain, PromptTemplate, Result};
use tangle_core::{
    AgentAction, AgentDecision, AgentOutputParser, ExecutionContext, OUTPUT_KEY, Record,
    StreamSink, Tool,
};
use tangle_llm::LlmEngine;

use crate::parser::ReactOutputParser;

/// Input key the executor's caller provides.
pub const INPUT_KEY: &str = "input";

/// Prompt variable the folded step history is bound to.
pub const SCRATCHPAD_KEY: &str = "agent_scratchpad";

pub const PREFIX: &str =
    "Answer the following questions as best you can. You have access to the following tools:";

pub const FORMAT_INSTRUCTIONS: &str = "Use the following format:

Question: the input question you must answer
Thought: you should always think about what to do
Action: the action to take, should be one of [{tool_names}]
Action Input: the input to the action
Observation: the result of the action
... (this Thought/Action/Action Input/Observation can repeat N times)
Thought: I now know the final answer
Final Answer: the final answer to the original input question";

pub const SUFFIX: &str = "Begin!

Question: {input}
Thought:{agent_scratchpad}";

/// What the executor needs from a planner: which inputs a run takes,
/// which outputs a finish carries, and one planning pass per
/// iteration.
#[async_trait]
pub trait AgentPlanner: Send + Sync {
    /// Keys the caller must supply in the run inputs.
    fn input_keys(&self) -> Vec<String> {
        vec![INPUT_KEY.to_string()]
    }

    /// Keys a finish's return values are expected to carry.
    fn return_values(&self) -> Vec<String> {
        vec![OUTPUT_KEY.to_string()]
    }

    /// Decide the next step given the completed steps so far. `None`
    /// means the planner has nothing to offer and the run should stand
    /// down.
    async fn plan(
        &self,
        steps: &[AgentAction],
        inputs: &Record,
        context: &ExecutionContext,
        sink: Option<StreamSink>,
    ) -> Result<Option<AgentDecision>>;

    /// A replacement planner built for a swapped tool set, if this
    /// planner bakes tool descriptions into its prompt. `None` keeps
    /// the current planner.
    fn retooled(&self, tools: &[Arc<dyn Tool>]) -> Option<Arc<dyn AgentPlanner>> {
        let _ = tools;
        None
    }
}

/// ReAct planner: one `LlmChain` whose prompt embeds the tool roster,
/// plus the parser that reads the model's Thought/Action transcript.
pub struct Agent {
    llm_chain: LlmChain,
    output_parser: Arc<dyn AgentOutputParser>,
    observation_prefix: String,
    llm_prefix: String,
    stop_marker: String,
}

impl Agent {
    pub fn new(llm_chain: LlmChain, output_parser: Arc<dyn AgentOutputParser>) -> Self {
        Self {
            llm_chain,
            output_parser,
            observation_prefix: "Observation: ".to_string(),
            llm_prefix: "Thought:".to_string(),
            stop_marker: "Observation:".to_string(),
        }
    }

    /// Standard construction: ReAct prompt over the given tools, ReAct
    /// parser.
    pub fn from_engine_and_tools(engine: LlmEngine, tools: &[Arc<dyn Tool>]) -> Self {
        let prompt = Self::create_prompt(tools, PREFIX, FORMAT_INSTRUCTIONS, SUFFIX);
        Self::new(LlmChain::new(engine, prompt), Arc::new(ReactOutputParser))
    }

    pub fn with_output_parser(mut self, parser: Arc<dyn AgentOutputParser>) -> Self {
        self.output_parser = parser;
        self
    }

    pub fn llm_chain(&self) -> &LlmChain {
        &self.llm_chain
    }

    /// Assemble the planning prompt: preamble, one `name: description`
    /// line per tool, format instructions with the tool names filled
    /// in, and the suffix holding the `input`/`agent_scratchpad`
    /// variables.
    pub fn create_prompt(
        tools: &[Arc<dyn Tool>],
        prefix: &str,
        format_instructions: &str,
        suffix: &str,
    ) -> PromptTemplate {
        let tool_lines: Vec<String> = tools
            .iter()
            .map(|tool| format!("{}: {}", tool.name(), tool.description()))
            .collect();
        let tool_names: Vec<&str> = tools.iter().map(|tool| tool.name()).collect();
        let instructions = format_instructions.replace("{tool_names}", &tool_names.join(", "));

        let template = [prefix, &tool_lines.join("\n"), &instructions, suffix].join("\n\n");
        PromptTemplate::new(
            template,
            vec![INPUT_KEY.to_string(), SCRATCHPAD_KEY.to_string()],
        )
    }

    /// Fold completed steps back into prompt text. Each step replays
    /// its reasoning log, the observation the tool produced, and the
    /// `Thought:` cue for the next round.
    pub fn construct_scratchpad(&self, steps: &[AgentAction]) -> String {
        let mut thoughts = String::new();
        for step in steps {
            thoughts.push_str(step.log.strip_suffix('\n').unwrap_or(&step.log));
            thoughts.push('\n');
            thoughts.push_str(&self.observation_prefix);
            thoughts.push_str(step.observation.as_deref().unwrap_or_default());
            thoughts.push('\n');
            thoughts.push_str(&self.llm_prefix);
        }
        thoughts
    }
}

#[async_trait]
impl AgentPlanner for Agent {
    fn input_keys(&self) -> Vec<String> {
        self.llm_chain
            .prompt()
            .input_variables()
            .iter()
            .filter(|name| name.as_str() != SCRATCHPAD_KEY)
            .cloned()
            .collect()
    }

    async fn plan(
        &self,
        steps: &[AgentAction],
        inputs: &Record,
        context: &ExecutionContext,
        sink: Option<StreamSink>,
    ) -> Result<Option<AgentDecision>> {
        let mut chain_inputs = inputs.clone();
        chain_inputs.insert(
            SCRATCHPAD_KEY.to_string(),
            Value::String(self.construct_scratchpad(steps)),
        );
        chain_inputs.insert(
            "stop".to_string(),
            Value::Array(vec![Value::String(self.stop_marker.clone())]),
        );

        let completion = self.llm_chain.predict(chain_inputs, context, sink).await?;
        let decision = self.output_parser.parse(&completion)?;
        Ok(Some(decision))
    }

    fn retooled(&self, tools: &[Arc<dyn Tool>]) -> Option<Arc<dyn AgentPlanner>> {
        let rebuilt = Agent::from_engine_and_tools(self.llm_chain.engine().clone(), tools)
            .with_output_parser(self.output_parser.clone());
        Some(Arc::new(rebuilt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tangle_llm::ModelSettings;
    use tangle_llm::testing::SequentialMockModel;

    struct FakeTool(&'static str, &'static str);

    #[async_trait]
    impl Tool for FakeTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            self.1
        }

        async fn run(
            &self,
            input: &str,
            _context: &ExecutionContext,
        ) -> std::result::Result<tangle_core::ToolOutcome, tangle_core::ToolError> {
            Ok(tangle_core::ToolOutcome::new(input))
        }
    }

    fn toolbox() -> Vec<Arc<dyn Tool>> {
        vec![
            Arc::new(FakeTool("search", "Look things up")),
            Arc::new(FakeTool("calculator", "Do arithmetic")),
        ]
    }

    fn agent_with(replies: &[&str]) -> (Agent, Arc<SequentialMockModel>) {
        let model = Arc::new(SequentialMockModel::new(replies.iter().copied()));
        let engine =
            LlmEngine::new(model.clone()).with_settings(ModelSettings::new("mock-model"));
        (Agent::from_engine_and_tools(engine, &toolbox()), model)
    }

    fn question(text: &str) -> Record {
        let mut inputs = Record::new();
        inputs.insert(INPUT_KEY.to_string(), Value::String(text.to_string()));
        inputs
    }

    #[test]
    fn prompt_embeds_tool_roster_and_names() {
        let prompt = Agent::create_prompt(&toolbox(), PREFIX, FORMAT_INSTRUCTIONS, SUFFIX);
        assert!(prompt.template().contains("search: Look things up"));
        assert!(prompt.template().contains("calculator: Do arithmetic"));
        assert!(prompt.template().contains("one of [search, calculator]"));
        assert_eq!(
            prompt.input_variables(),
            &[INPUT_KEY.to_string(), SCRATCHPAD_KEY.to_string()]
        );
    }

    #[test]
    fn scratchpad_folds_log_observation_and_cue() {
        let (agent, _) = agent_with(&[]);
        let steps = vec![
            AgentAction::new("search", "rust", "Thought: look it up\nAction: search\n")
                .observed("3 results"),
        ];
        assert_eq!(
            agent.construct_scratchpad(&steps),
            "Thought: look it up\nAction: search\nObservation: 3 results\nThought:"
        );
    }

    #[test]
    fn scratchpad_of_no_steps_is_empty() {
        let (agent, _) = agent_with(&[]);
        assert_eq!(agent.construct_scratchpad(&[]), "");
    }

    #[tokio::test]
    async fn plan_renders_question_and_stops_at_observation() {
        let (agent, model) = agent_with(&["Thought: go\nAction: search\nAction Input: rust"]);
        let context = ExecutionContext::new();

        let decision = agent
            .plan(&[], &question("What is Rust?"), &context, None)
            .await
            .unwrap()
            .expect("planner always decides");

        match decision {
            AgentDecision::Action(action) => {
                assert_eq!(action.tool, "search");
                assert_eq!(action.tool_input, "rust");
            }
            other => panic!("expected action, got {other:?}"),
        }

        let request = &model.requests()[0];
        assert!(request.prompt.contains("Question: What is Rust?"));
        assert!(request.prompt.ends_with("Thought:"));
        assert_eq!(request.stop, vec!["Observation:".to_string()]);
    }

    #[tokio::test]
    async fn plan_replays_prior_steps_in_the_prompt() {
        let (agent, model) = agent_with(&["Final Answer: blue"]);
        let context = ExecutionContext::new();
        let steps = vec![
            AgentAction::new("search", "sky color", "Thought: check the sky").observed("blue"),
        ];

        let decision = agent
            .plan(&steps, &question("What color is the sky?"), &context, None)
            .await
            .unwrap()
            .expect("planner always decides");
        assert!(decision.is_finish());

        let prompt = &model.requests()[0].prompt;
        assert!(prompt.contains("Thought: check the sky\nObservation: blue\nThought:"));
    }

    #[tokio::test]
    async fn retooled_planner_sees_the_new_roster() {
        let (agent, model) = agent_with(&["Final Answer: ok"]);
        let replacement: Vec<Arc<dyn Tool>> =
            vec![Arc::new(FakeTool("translate", "Translate text"))];

        let rebuilt = agent.retooled(&replacement).expect("rebuilds its prompt");
        rebuilt
            .plan(&[], &question("hi"), &ExecutionContext::new(), None)
            .await
            .unwrap();

        let prompt = &model.requests()[0].prompt;
        assert!(prompt.contains("translate: Translate text"));
        assert!(!prompt.contains("search: Look things up"));
    }
}
