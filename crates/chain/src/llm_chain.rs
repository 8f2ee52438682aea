//! LlmChain — a prompt template bound to a model engine.
//!
//! The workhorse chain: render the template over the inputs, complete
//! it through the engine, return the text under a single output key.
//! A context arriving with preloaded outputs short-circuits the model
//! call and replays them, which is how recorded runs are re-driven.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use tangle_core::error::ModelError;
use tangle_core::{
    AgentDecision, AgentOutputParser, CallbackManager, ExecutionContext, LlmResult, Memory, Record,
    StreamSink,
};
use tangle_llm::LlmEngine;

use crate::base::Chain;
use crate::error::{ChainError, Result};
use crate::prompt::{PromptTemplate, value_text};

/// Default output key for the completion text.
pub const TEXT_KEY: &str = "text";

/// Stop sequences applied when the inputs carry no `stop` entry.
pub const DEFAULT_STOP: [&str; 2] = ["Human:", "AI:"];

pub struct LlmChain {
    engine: LlmEngine,
    prompt: PromptTemplate,
    output_key: String,
    output_parser: Option<Arc<dyn AgentOutputParser>>,
    callbacks: CallbackManager,
    memory: Option<Arc<dyn Memory>>,
    return_only_outputs: bool,
    name: String,
}

impl LlmChain {
    pub fn new(engine: LlmEngine, prompt: PromptTemplate) -> Self {
        Self {
            engine,
            prompt,
            output_key: TEXT_KEY.to_string(),
            output_parser: None,
            callbacks: CallbackManager::new(),
            memory: None,
            return_only_outputs: false,
            name: "llm_chain".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    pub fn with_output_parser(mut self, parser: Arc<dyn AgentOutputParser>) -> Self {
        self.output_parser = Some(parser);
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

    pub fn with_return_only_outputs(mut self, only: bool) -> Self {
        self.return_only_outputs = only;
        self
    }

    pub fn prompt(&self) -> &PromptTemplate {
        &self.prompt
    }

    pub fn engine(&self) -> &LlmEngine {
        &self.engine
    }

    /// Render and complete a batch of input records in one engine call.
    ///
    /// Stop sequences come from the first record's `stop` entry (a list
    /// or a single string); absent that, the conversational defaults.
    pub async fn generate(
        &self,
        batches: &[Record],
        context: &ExecutionContext,
        sink: Option<StreamSink>,
    ) -> Result<LlmResult> {
        let mut prompts = Vec::with_capacity(batches.len());
        for inputs in batches {
            prompts.push(self.prompt.format(inputs)?);
        }
        let stop = resolve_stop(batches.first());
        let result = self
            .engine
            .generate(&prompts, &stop, context, sink, &self.callbacks.child())
            .await?;
        Ok(result)
    }

    /// Run the full lifecycle and return the output key's text.
    pub async fn predict(
        &self,
        inputs: Record,
        context: &ExecutionContext,
        sink: Option<StreamSink>,
    ) -> Result<String> {
        let outputs = self.run(inputs, context, sink).await?;
        match outputs.get(&self.output_key) {
            Some(value) => Ok(value_text(value)),
            None => Err(ChainError::MissingOutput(self.output_key.clone())),
        }
    }

    /// Predict, then hand the text to the configured output parser.
    pub async fn predict_and_parse(
        &self,
        inputs: Record,
        context: &ExecutionContext,
    ) -> Result<AgentDecision> {
        let parser = self
            .output_parser
            .as_ref()
            .ok_or_else(|| ChainError::Invalid("no output parser configured".into()))?;
        let text = self.predict(inputs, context, None).await?;
        Ok(parser.parse(&text)?)
    }
}

fn resolve_stop(inputs: Option<&Record>) -> Vec<String> {
    match inputs.and_then(|inputs| inputs.get("stop")) {
        Some(Value::Array(items)) => items.iter().map(value_text).collect(),
        Some(single) => vec![value_text(single)],
        None => DEFAULT_STOP.iter().map(|s| s.to_string()).collect(),
    }
}

#[async_trait]
impl Chain for LlmChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_keys(&self) -> Vec<String> {
        self.prompt.input_variables().to_vec()
    }

    fn output_keys(&self) -> Vec<String> {
        vec![self.output_key.clone()]
    }

    fn callbacks(&self) -> &CallbackManager {
        &self.callbacks
    }

    fn memory(&self) -> Option<Arc<dyn Memory>> {
        self.memory.clone()
    }

    fn return_only_outputs(&self) -> bool {
        self.return_only_outputs
    }

    async fn call(
        &self,
        inputs: &Record,
        context: &ExecutionContext,
        sink: Option<StreamSink>,
    ) -> Result<Record> {
        // Replay: a context carrying recorded outputs short-circuits
        // the model. Child-scope outputs take precedence when this
        // chain runs nested under another.
        if context.child_chain_name.is_some() {
            if let Some(child_outputs) = &context.child_outputs {
                return Ok(child_outputs.clone());
            }
        }
        if let Some(outputs) = &context.outputs {
            return Ok(outputs.clone());
        }

        let result = self
            .generate(std::slice::from_ref(inputs), context, sink)
            .await?;
        let text = result
            .first_text()
            .ok_or_else(|| ChainError::Core(ModelError::EmptyCompletion(1).into()))?;

        let mut outputs = Record::new();
        outputs.insert(self.output_key.clone(), Value::String(text.to_string()));
        Ok(outputs)
    }
}
