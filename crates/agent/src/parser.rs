//! ReAct-style output parsing.
//!
//! Turns raw completion text into an `AgentDecision`. The parser is
//! total over unexpected formatting: text that matches neither the
//! action shape nor the final-answer shape becomes a Finish carrying
//! the raw text, so a rambling model ends the run instead of crashing
//! it.

use tangle_core::{AgentAction, AgentDecision, AgentFinish, AgentOutputParser};

const FINAL_ANSWER_MARKER: &str = "Final Answer:";
const ACTION_MARKER: &str = "Action:";
const ACTION_INPUT_MARKER: &str = "Action Input:";

/// Parser for the Thought/Action/Action Input/Observation format.
///
/// `Final Answer:` wins when a completion carries both shapes, since a
/// model that has written a final answer is done regardless of what
/// else it rambled about.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReactOutputParser;

impl AgentOutputParser for ReactOutputParser {
    fn parse(&self, text: &str) -> tangle_core::Result<AgentDecision> {
        if let Some(at) = text.find(FINAL_ANSWER_MARKER) {
            let output = text[at + FINAL_ANSWER_MARKER.len()..].trim();
            return Ok(AgentDecision::Finish(AgentFinish::from_output(
                output, text,
            )));
        }

        let mut tool: Option<&str> = None;
        let mut tool_input: Option<&str> = None;
        for line in text.lines() {
            let line = line.trim();
            // "Action Input:" starts with "Action:"'s prefix, so it is
            // checked first.
            if let Some(rest) = line.strip_prefix(ACTION_INPUT_MARKER) {
                if tool_input.is_none() {
                    tool_input = Some(rest.trim());
                }
            } else if let Some(rest) = line.strip_prefix(ACTION_MARKER) {
                if tool.is_none() {
                    tool = Some(rest.trim());
                }
            }
        }

        match tool {
            Some(tool) if !tool.is_empty() => Ok(AgentDecision::Action(AgentAction::new(
                tool,
                tool_input.unwrap_or_default(),
                text,
            ))),
            _ => Ok(AgentDecision::Finish(AgentFinish::from_output(
                text.trim(),
                text,
            ))),
        }
    }
}
