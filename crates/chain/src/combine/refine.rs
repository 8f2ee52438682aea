//! Refine strategy: fold documents into a running answer.

use async_trait::async_trait;
use serde_json::Value;

use tangle_core::{CallbackManager, Document, ExecutionContext, Record, StreamSink};

use crate::base::Chain;
use crate::combine::{CombineDocumentsChain, INPUT_DOCUMENTS_KEY, QUESTION_KEY, combine_call};
use crate::error::{ChainError, Result};
use crate::llm_chain::{LlmChain, TEXT_KEY};
use crate::prompt::{PromptTemplate, format_document};

/// Output key for the collected intermediate answers.
pub const INTERMEDIATE_STEPS_KEY: &str = "intermediate_steps";

/// Seeds an answer from the first document, then refines it once per
/// remaining document: each refine call sees the running answer plus
/// the next document and produces an updated answer.
pub struct RefineDocumentChain {
    initial_chain: LlmChain,
    refine_chain: LlmChain,
    document_prompt: PromptTemplate,
    document_variable_name: String,
    initial_response_name: String,
    return_intermediate_steps: bool,
    callbacks: CallbackManager,
    name: String,
}

impl RefineDocumentChain {
    pub fn new(initial_chain: LlmChain, refine_chain: LlmChain) -> Self {
        Self {
            initial_chain,
            refine_chain,
            document_prompt: PromptTemplate::from_template("{page_content}"),
            document_variable_name: "context_str".to_string(),
            initial_response_name: "existing_answer".to_string(),
            return_intermediate_steps: false,
            callbacks: CallbackManager::new(),
            name: "refine_document_chain".to_string(),
        }
    }

    pub fn with_document_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.document_prompt = prompt;
        self
    }

    pub fn with_document_variable_name(mut self, name: impl Into<String>) -> Self {
        self.document_variable_name = name.into();
        self
    }

    /// Variable the refine prompt receives the running answer under.
    pub fn with_initial_response_name(mut self, name: impl Into<String>) -> Self {
        self.initial_response_name = name.into();
        self
    }

    pub fn with_return_intermediate_steps(mut self, on: bool) -> Self {
        self.return_intermediate_steps = on;
        self
    }

    pub fn with_callbacks(mut self, callbacks: CallbackManager) -> Self {
        self.callbacks = callbacks;
        self
    }

    fn doc_inputs(&self, doc: &Document, question: &str) -> Result<Record> {
        let mut inputs = Record::new();
        inputs.insert(
            self.document_variable_name.clone(),
            Value::String(format_document(doc, &self.document_prompt)?),
        );
        inputs.insert(
            QUESTION_KEY.to_string(),
            Value::String(question.to_string()),
        );
        Ok(inputs)
    }
}

#[async_trait]
impl CombineDocumentsChain for RefineDocumentChain {
    async fn combine(
        &self,
        docs: &[Document],
        question: &str,
        context: &ExecutionContext,
    ) -> Result<Record> {
        let Some(first) = docs.first() else {
            return Err(ChainError::Invalid("no documents to refine".into()));
        };

        let mut answer = self
            .initial_chain
            .predict(self.doc_inputs(first, question)?, context, None)
            .await?;
        let mut steps = vec![answer.clone()];

        for doc in &docs[1..] {
            let mut inputs = self.doc_inputs(doc, question)?;
            inputs.insert(
                self.initial_response_name.clone(),
                Value::String(answer.clone()),
            );
            answer = self.refine_chain.predict(inputs, context, None).await?;
            steps.push(answer.clone());
        }

        let mut outputs = Record::new();
        outputs.insert(TEXT_KEY.to_string(), Value::String(answer));
        if self.return_intermediate_steps {
            outputs.insert(
                INTERMEDIATE_STEPS_KEY.to_string(),
                Value::Array(steps.into_iter().map(Value::String).collect()),
            );
        }
        Ok(outputs)
    }
}

#[async_trait]
impl Chain for RefineDocumentChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_keys(&self) -> Vec<String> {
        vec![INPUT_DOCUMENTS_KEY.to_string()]
    }

    fn output_keys(&self) -> Vec<String> {
        let mut keys = vec![TEXT_KEY.to_string()];
        if self.return_intermediate_steps {
            keys.push(INTERMEDIATE_STEPS_KEY.to_string());
        }
        keys
    }

    fn callbacks(&self) -> &CallbackManager {
        &self.callbacks
    }

    async fn call(
        &self,
        inputs: &Record,
        context: &ExecutionContext,
        _sink: Option<StreamSink>,
    ) -> Result<Record> {
        combine_call(self, inputs, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tangle_llm::testing::SequentialMockModel;
    use tangle_llm::{LlmEngine, ModelSettings};

    fn refine_chain(replies: &[&str]) -> (RefineDocumentChain, Arc<SequentialMockModel>) {
        let model = Arc::new(SequentialMockModel::new(replies.iter().copied()));
        let engine = LlmEngine::new(model.clone()).with_settings(ModelSettings::new("mock"));
        let initial = LlmChain::new(
            engine.clone(),
            PromptTemplate::from_template("Answer {question}: {context_str}"),
        );
        let refine = LlmChain::new(
            engine,
            PromptTemplate::from_template(
                "Prior: {existing_answer}\nRefine with: {context_str}",
            ),
        );
        (RefineDocumentChain::new(initial, refine), model)
    }

    fn docs(texts: &[&str]) -> Vec<Document> {
        texts.iter().map(|t| Document::new(*t)).collect()
    }

    #[tokio::test]
    async fn refines_running_answer_across_documents() {
        let (chain, model) = refine_chain(&["draft", "final"]);

        let outputs = chain
            .combine(&docs(&["one", "two"]), "why", &ExecutionContext::new())
            .await
            .unwrap();

        assert_eq!(outputs["text"], Value::String("final".into()));
        let requests = model.requests();
        assert_eq!(requests[0].prompt, "Answer why: one");
        assert_eq!(requests[1].prompt, "Prior: draft\nRefine with: two");
    }

    #[tokio::test]
    async fn single_document_needs_no_refine_call() {
        let (chain, model) = refine_chain(&["only"]);

        let outputs = chain
            .combine(&docs(&["one"]), "q", &ExecutionContext::new())
            .await
            .unwrap();

        assert_eq!(outputs["text"], Value::String("only".into()));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn intermediate_steps_collect_every_answer() {
        let (chain, _model) = refine_chain(&["a1", "a2", "a3"]);
        let chain = chain.with_return_intermediate_steps(true);

        let outputs = chain
            .combine(&docs(&["d1", "d2", "d3"]), "q", &ExecutionContext::new())
            .await
            .unwrap();

        assert_eq!(
            outputs["intermediate_steps"],
            serde_json::json!(["a1", "a2", "a3"])
        );
        assert_eq!(outputs["text"], Value::String("a3".into()));
    }

    #[tokio::test]
    async fn empty_documents_are_rejected() {
        let (chain, _model) = refine_chain(&[]);
        let err = chain
            .combine(&[], "q", &ExecutionContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no documents to refine"));
    }
}
