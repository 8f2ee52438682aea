//! MapRerank strategy: score an answer per document, keep the best.

use async_trait::async_trait;
use serde_json::Value;

use tangle_core::{CallbackManager, Document, ExecutionContext, Record, StreamSink};

use crate::base::Chain;
use crate::combine::{CombineDocumentsChain, INPUT_DOCUMENTS_KEY, QUESTION_KEY, combine_call};
use crate::error::{ChainError, Result};
use crate::llm_chain::{LlmChain, TEXT_KEY};

/// Output key for the full scored candidate list.
pub const CANDIDATES_KEY: &str = "candidates";

/// Marker separating the answer from its confidence score in a reply.
const SCORE_MARKER: &str = "\nScore:";

/// Runs the inner chain once per document; each reply must carry an
/// answer followed by a `Score:` line. The single highest-scoring
/// answer wins, first seen winning ties. Answers are never blended
/// across documents.
pub struct MapRerankDocumentChain {
    llm_chain: LlmChain,
    document_variable_name: String,
    return_candidates: bool,
    callbacks: CallbackManager,
    name: String,
}

impl MapRerankDocumentChain {
    pub fn new(llm_chain: LlmChain) -> Self {
        Self {
            llm_chain,
            document_variable_name: "context".to_string(),
            return_candidates: false,
            callbacks: CallbackManager::new(),
            name: "map_rerank_document_chain".to_string(),
        }
    }

    pub fn with_document_variable_name(mut self, name: impl Into<String>) -> Self {
        self.document_variable_name = name.into();
        self
    }

    /// Also return every scored candidate under `candidates`.
    pub fn with_return_candidates(mut self, on: bool) -> Self {
        self.return_candidates = on;
        self
    }

    pub fn with_callbacks(mut self, callbacks: CallbackManager) -> Self {
        self.callbacks = callbacks;
        self
    }
}

/// Split a reply into its answer text and confidence score.
fn parse_scored_answer(text: &str) -> Result<(String, f64)> {
    let idx = text.find(SCORE_MARKER).ok_or_else(|| {
        ChainError::Invalid(format!("reply carries no score line: {text:?}"))
    })?;
    let answer = text[..idx].trim().to_string();
    let score_line = text[idx + SCORE_MARKER.len()..]
        .lines()
        .next()
        .unwrap_or_default()
        .trim();
    let score: f64 = score_line
        .parse()
        .map_err(|_| ChainError::Invalid(format!("unparseable score: {score_line:?}")))?;
    if !score.is_finite() {
        return Err(ChainError::Invalid(format!("non-finite score: {score_line:?}")));
    }
    Ok((answer, score))
}

#[async_trait]
impl CombineDocumentsChain for MapRerankDocumentChain {
    async fn combine(
        &self,
        docs: &[Document],
        question: &str,
        context: &ExecutionContext,
    ) -> Result<Record> {
        if docs.is_empty() {
            return Err(ChainError::Invalid("no documents to rank".into()));
        }

        let mut best: Option<(String, f64)> = None;
        let mut candidates = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut inputs = Record::new();
            inputs.insert(
                self.document_variable_name.clone(),
                Value::String(doc.page_content.clone()),
            );
            inputs.insert(
                QUESTION_KEY.to_string(),
                Value::String(question.to_string()),
            );
            let reply = self.llm_chain.predict(inputs, context, None).await?;
            let (answer, score) = parse_scored_answer(&reply)?;
            candidates.push(serde_json::json!({ "answer": answer, "score": score }));
            // Strict comparison keeps the first seen on ties.
            if best.as_ref().is_none_or(|(_, top)| score > *top) {
                best = Some((answer, score));
            }
        }

        let (answer, _score) = best.ok_or_else(|| {
            ChainError::Invalid("no candidate produced an answer".into())
        })?;
        let mut outputs = Record::new();
        outputs.insert(TEXT_KEY.to_string(), Value::String(answer));
        if self.return_candidates {
            outputs.insert(CANDIDATES_KEY.to_string(), Value::Array(candidates));
        }
        Ok(outputs)
    }
}

#[async_trait]
impl Chain for MapRerankDocumentChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_keys(&self) -> Vec<String> {
        vec![INPUT_DOCUMENTS_KEY.to_string()]
    }

    fn output_keys(&self) -> Vec<String> {
        let mut keys = vec![TEXT_KEY.to_string()];
        if self.return_candidates {
            keys.push(CANDIDATES_KEY.to_string());
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
    use crate::prompt::PromptTemplate;
    use std::sync::Arc;
    use tangle_llm::testing::SequentialMockModel;
    use tangle_llm::{LlmEngine, ModelSettings};

    fn rerank_chain(replies: &[&str]) -> MapRerankDocumentChain {
        let model = Arc::new(SequentialMockModel::new(replies.iter().copied()));
        let engine = LlmEngine::new(model).with_settings(ModelSettings::new("mock"));
        let llm_chain = LlmChain::new(
            engine,
            PromptTemplate::from_template("{question}\n{context}"),
        );
        MapRerankDocumentChain::new(llm_chain)
    }

    fn docs(texts: &[&str]) -> Vec<Document> {
        texts.iter().map(|t| Document::new(*t)).collect()
    }

    #[tokio::test]
    async fn highest_score_wins() {
        let chain = rerank_chain(&["right\nScore: 0.9", "wrong\nScore: 0.4"]);
        let outputs = chain
            .combine(&docs(&["d1", "d2"]), "q", &ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(outputs["text"], Value::String("right".into()));
    }

    #[tokio::test]
    async fn later_document_can_win() {
        let chain = rerank_chain(&["weak\nScore: 40", "strong\nScore: 90"]);
        let outputs = chain
            .combine(&docs(&["d1", "d2"]), "q", &ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(outputs["text"], Value::String("strong".into()));
    }

    #[tokio::test]
    async fn ties_keep_the_first_seen_answer() {
        let chain = rerank_chain(&["first\nScore: 50", "second\nScore: 50"]);
        let outputs = chain
            .combine(&docs(&["d1", "d2"]), "q", &ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(outputs["text"], Value::String("first".into()));
    }

    #[tokio::test]
    async fn candidates_output_lists_every_scored_answer() {
        let chain = rerank_chain(&["a\nScore: 10", "b\nScore: 20"]).with_return_candidates(true);
        let outputs = chain
            .combine(&docs(&["d1", "d2"]), "q", &ExecutionContext::new())
            .await
            .unwrap();

        assert_eq!(
            outputs["candidates"],
            serde_json::json!([
                { "answer": "a", "score": 10.0 },
                { "answer": "b", "score": 20.0 },
            ])
        );
    }

    #[tokio::test]
    async fn reply_without_score_line_is_invalid() {
        let chain = rerank_chain(&["no score here"]);
        let err = chain
            .combine(&docs(&["d1"]), "q", &ExecutionContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no score line"));
    }

    #[test]
    fn score_parsing_takes_the_first_line_after_marker() {
        let (answer, score) =
            parse_scored_answer("multi\nline answer\nScore: 72\ntrailing noise").unwrap();
        assert_eq!(answer, "multi\nline answer");
        assert_eq!(score, 72.0);
    }
}
