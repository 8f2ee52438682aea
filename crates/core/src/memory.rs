//! Conversation memory — state carried between chain runs.
//!
//! A `Memory` contributes variables to a chain's inputs before the run
//! and records the run's inputs and outputs afterwards. The shipped
//! `BufferMemory` keeps a rolling transcript under a single variable.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::Record;
use crate::error::MemoryError;

/// State loaded into and saved out of chain runs.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Variable names this memory contributes to chain inputs.
    fn memory_keys(&self) -> Vec<String>;

    /// Variables to merge into the chain's inputs for this run.
    async fn load_variables(&self, inputs: &Record) -> std::result::Result<Record, MemoryError>;

    /// Record one completed run.
    async fn save_context(
        &self,
        inputs: &Record,
        outputs: &Record,
    ) -> std::result::Result<(), MemoryError>;

    /// Forget everything.
    async fn clear(&self) -> std::result::Result<(), MemoryError>;
}

/// Rolling transcript of human and AI turns under one variable.
#[derive(Clone)]
pub struct BufferMemory {
    memory_key: String,
    human_prefix: String,
    ai_prefix: String,
    input_key: Option<String>,
    output_key: Option<String>,
    lines: Arc<RwLock<Vec<String>>>,
}

impl BufferMemory {
    pub fn new() -> Self {
        Self {
            memory_key: "history".to_string(),
            human_prefix: "Human".to_string(),
            ai_prefix: "AI".to_string(),
            input_key: None,
            output_key: None,
            lines: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_memory_key(mut self, key: impl Into<String>) -> Self {
        self.memory_key = key.into();
        self
    }

    /// Pin which input variable holds the human turn. Without this the
    /// single non-memory, non-stop input is used.
    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = Some(key.into());
        self
    }

    /// Pin which output variable holds the AI turn.
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    fn pick_key(
        &self,
        record: &Record,
        pinned: &Option<String>,
        excluded: &[String],
    ) -> std::result::Result<String, MemoryError> {
        if let Some(key) = pinned {
            return if record.contains_key(key) {
                Ok(key.clone())
            } else {
                Err(MemoryError::MissingVariable(key.clone()))
            };
        }
        let mut candidates: Vec<&String> = record
            .keys()
            .filter(|k| !excluded.contains(k) && k.as_str() != "stop")
            .collect();
        candidates.sort();
        match candidates.as_slice() {
            [only] => Ok((*only).clone()),
            [] => Err(MemoryError::MissingVariable(
                "no candidate variable to record".to_string(),
            )),
            _ => Err(MemoryError::MissingVariable(format!(
                "ambiguous variables, pin one of: {}",
                candidates
                    .iter()
                    .map(|k| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

impl Default for BufferMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Memory for BufferMemory {
    fn memory_keys(&self) -> Vec<String> {
        vec![self.memory_key.clone()]
    }

    async fn load_variables(&self, _inputs: &Record) -> std::result::Result<Record, MemoryError> {
        let lines = self.lines.read().await;
        let mut variables = Record::new();
        variables.insert(self.memory_key.clone(), Value::String(lines.join("\n")));
        Ok(variables)
    }

    async fn save_context(
        &self,
        inputs: &Record,
        outputs: &Record,
    ) -> std::result::Result<(), MemoryError> {
        let input_key = self.pick_key(inputs, &self.input_key, &self.memory_keys())?;
        let output_key = self.pick_key(outputs, &self.output_key, &[])?;

        let human = value_text(&inputs[&input_key]);
        let ai = value_text(&outputs[&output_key]);

        let mut lines = self.lines.write().await;
        lines.push(format!("{}: {}", self.human_prefix, human));
        lines.push(format!("{}: {}", self.ai_prefix, ai));
        Ok(())
    }

    async fn clear(&self) -> std::result::Result<(), MemoryError> {
        self.lines.write().await.clear();
        Ok(())
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[tokio::test]
    async fn empty_memory_loads_empty_history() {
        let memory = BufferMemory::new();
        let vars = memory.load_variables(&Record::new()).await.unwrap();
        assert_eq!(vars["history"], json!(""));
    }

    #[tokio::test]
    async fn save_then_load_builds_transcript() {
        let memory = BufferMemory::new();
        memory
            .save_context(
                &record(&[("input", "hi there")]),
                &record(&[("text", "hello!")]),
            )
            .await
            .unwrap();

        let vars = memory.load_variables(&Record::new()).await.unwrap();
        assert_eq!(vars["history"], json!("Human: hi there\nAI: hello!"));
    }

    #[tokio::test]
    async fn stop_and_memory_variables_are_not_recorded() {
        let memory = BufferMemory::new();
        let mut inputs = record(&[("question", "2 + 2?"), ("history", "")]);
        inputs.insert("stop".to_string(), json!(["Human:"]));

        memory
            .save_context(&inputs, &record(&[("text", "4")]))
            .await
            .unwrap();

        let vars = memory.load_variables(&Record::new()).await.unwrap();
        assert_eq!(vars["history"], json!("Human: 2 + 2?\nAI: 4"));
    }

    #[tokio::test]
    async fn ambiguous_inputs_require_a_pinned_key() {
        let memory = BufferMemory::new();
        let inputs = record(&[("question", "a"), ("context", "b")]);
        let err = memory
            .save_context(&inputs, &record(&[("text", "c")]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ambiguous"));

        let pinned = BufferMemory::new().with_input_key("question");
        pinned
            .save_context(&inputs, &record(&[("text", "c")]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn clear_forgets_the_transcript() {
        let memory = BufferMemory::new();
        memory
            .save_context(&record(&[("input", "x")]), &record(&[("text", "y")]))
            .await
            .unwrap();
        memory.clear().await.unwrap();

        let vars = memory.load_variables(&Record::new()).await.unwrap();
        assert_eq!(vars["history"], json!(""));
    }
}
