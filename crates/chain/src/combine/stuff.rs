//! Stuff strategy: put every document into a single prompt.

use async_trait::async_trait;
use serde_json::Value;

use tangle_core::{CallbackManager, Document, ExecutionContext, Record, StreamSink};
use tangle_llm::estimate_tokens;

use crate::base::Chain;
use crate::combine::{CombineDocumentsChain, INPUT_DOCUMENTS_KEY, QUESTION_KEY, combine_call};
use crate::error::Result;
use crate::llm_chain::{LlmChain, TEXT_KEY};
use crate::prompt::{PromptTemplate, format_document};

/// Formats each document through a per-document template, joins the
/// results with a separator, and makes one model call with the joined
/// text injected as the context variable.
pub struct StuffDocumentChain {
    llm_chain: LlmChain,
    document_prompt: PromptTemplate,
    document_variable_name: String,
    document_separator: String,
    callbacks: CallbackManager,
    name: String,
}

impl StuffDocumentChain {
    pub fn new(llm_chain: LlmChain) -> Self {
        Self {
            llm_chain,
            document_prompt: PromptTemplate::from_template("{page_content}"),
            document_variable_name: "context".to_string(),
            document_separator: "\n\n".to_string(),
            callbacks: CallbackManager::new(),
            name: "stuff_document_chain".to_string(),
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

    pub fn with_document_separator(mut self, separator: impl Into<String>) -> Self {
        self.document_separator = separator.into();
        self
    }

    pub fn with_callbacks(mut self, callbacks: CallbackManager) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Inputs for the inner chain: formatted documents under the
    /// context variable, plus the question (possibly empty).
    fn build_inputs(&self, docs: &[Document], question: &str) -> Result<Record> {
        let mut formatted = Vec::with_capacity(docs.len());
        for doc in docs {
            formatted.push(format_document(doc, &self.document_prompt)?);
        }
        let mut inputs = Record::new();
        inputs.insert(
            self.document_variable_name.clone(),
            Value::String(formatted.join(&self.document_separator)),
        );
        inputs.insert(
            QUESTION_KEY.to_string(),
            Value::String(question.to_string()),
        );
        Ok(inputs)
    }
}

#[async_trait]
impl CombineDocumentsChain for StuffDocumentChain {
    async fn combine(
        &self,
        docs: &[Document],
        question: &str,
        context: &ExecutionContext,
    ) -> Result<Record> {
        let inputs = self.build_inputs(docs, question)?;
        let text = self.llm_chain.predict(inputs, context, None).await?;
        let mut outputs = Record::new();
        outputs.insert(TEXT_KEY.to_string(), Value::String(text));
        Ok(outputs)
    }

    fn prompt_length(&self, docs: &[Document], question: &str) -> Result<Option<usize>> {
        let inputs = self.build_inputs(docs, question)?;
        let prompt = self.llm_chain.prompt().format(&inputs)?;
        Ok(Some(estimate_tokens(&prompt)))
    }
}

#[async_trait]
impl Chain for StuffDocumentChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_keys(&self) -> Vec<String> {
        vec![INPUT_DOCUMENTS_KEY.to_string()]
    }

    fn output_keys(&self) -> Vec<String> {
        vec![TEXT_KEY.to_string()]
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
