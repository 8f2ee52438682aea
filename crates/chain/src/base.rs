//! Chain — the unit of composition.
//!
//! A chain takes a key/value input record, optionally merges
//! conversation memory, runs its own logic (a model call, sub-chains,
//! a whole agent loop), optionally persists memory, and returns a
//! key/value output record. `run` owns the lifecycle: memory merge,
//! callback hooks, the chain body, memory save, output shaping.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use tangle_core::{CallbackManager, ExecutionContext, Memory, Record, StreamSink};

use crate::error::{ChainError, Result};

/// Output key carrying the captured error text when a chain with
/// observers fails. The caller gets a record with this single entry
/// instead of an `Err`; without observers the error propagates.
pub const CHAIN_ERROR_KEY: &str = "chain_error";

#[async_trait]
pub trait Chain: Send + Sync {
    /// Name used for context slotting and trace attribution.
    fn name(&self) -> &str;

    /// Input variables this chain expects.
    fn input_keys(&self) -> Vec<String>;

    /// Output keys this chain produces.
    fn output_keys(&self) -> Vec<String>;

    /// The chain's observer fan-out.
    fn callbacks(&self) -> &CallbackManager;

    /// Conversation memory merged into inputs before the run and
    /// updated afterwards.
    fn memory(&self) -> Option<Arc<dyn Memory>> {
        None
    }

    /// When set, `run` returns only the produced outputs instead of
    /// merging the inputs back in.
    fn return_only_outputs(&self) -> bool {
        false
    }

    /// The chain's own logic over prepared inputs. `context` is the
    /// snapshot taken when this chain's scope started.
    async fn call(
        &self,
        inputs: &Record,
        context: &ExecutionContext,
        sink: Option<StreamSink>,
    ) -> Result<Record>;

    /// Full lifecycle run.
    async fn run(
        &self,
        inputs: Record,
        context: &ExecutionContext,
        sink: Option<StreamSink>,
    ) -> Result<Record> {
        let inputs = self.prep_inputs(inputs).await?;
        let started = context.chain_started(self.name(), &inputs);
        self.callbacks().on_chain_start(&started);

        match self.call(&inputs, &started, sink).await {
            Ok(outputs) => {
                let finished = started.chain_finished(self.name(), &inputs, Some(&outputs));
                self.callbacks().on_chain_end(&finished);
                self.prep_outputs(&inputs, outputs).await
            }
            Err(e) => {
                let failed = started.chain_failed(self.name(), &inputs, &e.to_string());
                self.callbacks().on_chain_error(&failed);
                if self.callbacks().handler_count() > 0 {
                    let mut marker = Record::new();
                    marker.insert(CHAIN_ERROR_KEY.to_string(), Value::String(e.to_string()));
                    Ok(marker)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Merge memory variables into the caller's inputs. Memory values
    /// win for their own keys.
    async fn prep_inputs(&self, mut inputs: Record) -> Result<Record> {
        if let Some(memory) = self.memory() {
            let variables = memory.load_variables(&inputs).await?;
            for (key, value) in variables {
                inputs.insert(key, value);
            }
        }
        Ok(inputs)
    }

    /// Save the run into memory and shape the returned record.
    async fn prep_outputs(&self, inputs: &Record, outputs: Record) -> Result<Record> {
        if let Some(memory) = self.memory() {
            memory.save_context(inputs, &outputs).await?;
        }
        if self.return_only_outputs() {
            Ok(outputs)
        } else {
            let mut merged = inputs.clone();
            merged.extend(outputs);
            Ok(merged)
        }
    }

    /// Run a single-input chain on bare text and return the first
    /// output key's text.
    async fn run_text(
        &self,
        text: &str,
        context: &ExecutionContext,
        sink: Option<StreamSink>,
    ) -> Result<String> {
        let input_key = self
            .input_keys()
            .into_iter()
            .next()
            .ok_or_else(|| ChainError::Invalid("chain declares no input keys".into()))?;
        let mut inputs = Record::new();
        inputs.insert(input_key, Value::String(text.to_string()));
        let outputs = self.run(inputs, context, sink).await?;

        let output_key = self
            .output_keys()
            .into_iter()
            .next()
            .ok_or_else(|| ChainError::Invalid("chain declares no output keys".into()))?;
        match outputs.get(&output_key) {
            Some(Value::String(text)) => Ok(text.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(ChainError::MissingOutput(output_key)),
        }
    }

    /// Run the chain over each input record, in order.
    async fn apply(&self, batches: Vec<Record>, context: &ExecutionContext) -> Result<Vec<Record>> {
        let mut results = Vec::with_capacity(batches.len());
        for inputs in batches {
            results.push(self.run(inputs, context, None).await?);
        }
        Ok(results)
    }
}
