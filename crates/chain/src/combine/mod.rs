//! Document combination strategies.
//!
//! Each strategy turns an ordered document sequence plus a question
//! into one model call or a bounded sequence of calls, producing a
//! combined answer under the `text` output key. Strategies are chains
//! themselves, so they compose: MapReduce delegates to Reduce, Reduce
//! delegates to its combine/collapse/QA chains.

mod map_reduce;
mod map_rerank;
mod reduce;
mod refine;
mod stuff;

pub use map_reduce::MapReduceDocumentChain;
pub use map_rerank::MapRerankDocumentChain;
pub use reduce::ReduceDocumentChain;
pub use refine::RefineDocumentChain;
pub use stuff::StuffDocumentChain;

use async_trait::async_trait;
use serde_json::Value;

use tangle_core::{Document, ExecutionContext, Record};

use crate::error::{ChainError, Result};
use crate::llm_chain::TEXT_KEY;
use crate::prompt::value_text;

/// Input key carrying the document sequence.
pub const INPUT_DOCUMENTS_KEY: &str = "input_documents";

/// Input key carrying the question posed over the documents.
pub const QUESTION_KEY: &str = "question";

/// A strategy for combining documents into one answer.
#[async_trait]
pub trait CombineDocumentsChain: Send + Sync {
    /// Combine `docs` into an output record keyed by `text`, plus any
    /// strategy-specific extras. `question` may be empty.
    async fn combine(
        &self,
        docs: &[Document],
        question: &str,
        context: &ExecutionContext,
    ) -> Result<Record>;

    /// Estimated token length of the prompt this strategy would send
    /// for `docs`. `None` means the length cannot be measured ahead of
    /// the call, which disables budget-driven collapsing.
    fn prompt_length(&self, docs: &[Document], question: &str) -> Result<Option<usize>> {
        let _ = (docs, question);
        Ok(None)
    }
}

/// Build the input record the combination chains consume.
pub fn document_inputs(docs: &[Document], question: Option<&str>) -> Result<Record> {
    let mut inputs = Record::new();
    inputs.insert(
        INPUT_DOCUMENTS_KEY.to_string(),
        serde_json::to_value(docs).map_err(tangle_core::Error::from)?,
    );
    if let Some(question) = question {
        inputs.insert(QUESTION_KEY.to_string(), Value::String(question.to_string()));
    }
    Ok(inputs)
}

/// Extract the document sequence from an input record.
pub fn docs_from_inputs(inputs: &Record) -> Result<Vec<Document>> {
    let value = inputs
        .get(INPUT_DOCUMENTS_KEY)
        .ok_or_else(|| ChainError::MissingInput(INPUT_DOCUMENTS_KEY.to_string()))?;
    Ok(serde_json::from_value(value.clone()).map_err(tangle_core::Error::from)?)
}

/// Extract the question, defaulting to empty when absent.
pub fn question_from_inputs(inputs: &Record) -> String {
    inputs.get(QUESTION_KEY).map(value_text).unwrap_or_default()
}

/// Shared Chain body: unpack documents and question, delegate to the
/// strategy.
pub(crate) async fn combine_call(
    strategy: &dyn CombineDocumentsChain,
    inputs: &Record,
    context: &ExecutionContext,
) -> Result<Record> {
    let docs = docs_from_inputs(inputs)?;
    let question = question_from_inputs(inputs);
    strategy.combine(&docs, &question, context).await
}

/// Pull the combined text out of a strategy's output record.
pub(crate) fn combined_text(outputs: &Record) -> Result<String> {
    outputs
        .get(TEXT_KEY)
        .map(value_text)
        .ok_or_else(|| ChainError::MissingOutput(TEXT_KEY.to_string()))
}
