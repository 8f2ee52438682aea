//! Reduce strategy: collapse documents until they fit a token budget.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use tangle_core::{CallbackManager, Document, ExecutionContext, Record, StreamSink};

use crate::base::Chain;
use crate::combine::{
    CombineDocumentsChain, INPUT_DOCUMENTS_KEY, combine_call, combined_text,
};
use crate::error::{ChainError, Result};
use crate::llm_chain::TEXT_KEY;

/// Default token budget for one combine prompt.
pub const DEFAULT_TOKEN_MAX: usize = 3000;

/// Repeatedly partitions the document sequence into budget-sized
/// groups and collapses each group into one synthesized document until
/// the whole sequence fits the combine chain's prompt budget, then
/// runs the final combine. With a question present, a QA pass runs
/// over the combined text afterwards.
///
/// Collapsing needs a measurable prompt: when the combine chain cannot
/// report a prompt length, the sequence is passed through unchanged.
pub struct ReduceDocumentChain {
    combine_chain: Arc<dyn CombineDocumentsChain>,
    collapse_chain: Option<Arc<dyn CombineDocumentsChain>>,
    qa_chain: Option<Arc<dyn CombineDocumentsChain>>,
    token_max: usize,
    callbacks: CallbackManager,
    name: String,
}

impl ReduceDocumentChain {
    pub fn new(combine_chain: Arc<dyn CombineDocumentsChain>) -> Self {
        Self {
            combine_chain,
            collapse_chain: None,
            qa_chain: None,
            token_max: DEFAULT_TOKEN_MAX,
            callbacks: CallbackManager::new(),
            name: "reduce_document_chain".to_string(),
        }
    }

    /// Chain used to collapse a group. Defaults to the combine chain.
    pub fn with_collapse_chain(mut self, chain: Arc<dyn CombineDocumentsChain>) -> Self {
        self.collapse_chain = Some(chain);
        self
    }

    /// Chain for the final question-answering pass. Defaults to the
    /// combine chain.
    pub fn with_qa_chain(mut self, chain: Arc<dyn CombineDocumentsChain>) -> Self {
        self.qa_chain = Some(chain);
        self
    }

    pub fn with_token_max(mut self, token_max: usize) -> Self {
        self.token_max = token_max;
        self
    }

    pub fn with_callbacks(mut self, callbacks: CallbackManager) -> Self {
        self.callbacks = callbacks;
        self
    }

    fn collapse_chain(&self) -> &Arc<dyn CombineDocumentsChain> {
        self.collapse_chain.as_ref().unwrap_or(&self.combine_chain)
    }

    fn qa_chain(&self) -> &Arc<dyn CombineDocumentsChain> {
        self.qa_chain.as_ref().unwrap_or(&self.combine_chain)
    }

    /// Collapse until the sequence fits the budget.
    async fn collapse(
        &self,
        docs: &[Document],
        question: &str,
        context: &ExecutionContext,
    ) -> Result<Vec<Document>> {
        let Some(mut num_tokens) = self.combine_chain.prompt_length(docs, question)? else {
            return Ok(docs.to_vec());
        };

        let mut result_docs = docs.to_vec();
        while num_tokens > self.token_max {
            debug!(
                num_tokens,
                token_max = self.token_max,
                docs = result_docs.len(),
                "Collapsing document groups"
            );
            let groups = self.split_by_budget(&result_docs, question)?;
            let mut collapsed = Vec::with_capacity(groups.len());
            for group in &groups {
                collapsed.push(self.collapse_group(group, question, context).await?);
            }
            result_docs = collapsed;
            num_tokens = self
                .combine_chain
                .prompt_length(&result_docs, question)?
                .unwrap_or(0);
        }
        Ok(result_docs)
    }

    /// Greedy partition: grow a group until adding one more document
    /// would blow the budget, emit the group without that document,
    /// then slide the window forward by one. A lone document over the
    /// budget cannot be split further and is fatal.
    fn split_by_budget(&self, docs: &[Document], question: &str) -> Result<Vec<Vec<Document>>> {
        let mut groups: Vec<Vec<Document>> = Vec::new();
        let mut working: Vec<Document> = Vec::new();
        for doc in docs {
            working.push(doc.clone());
            let num_tokens = self
                .combine_chain
                .prompt_length(&working, question)?
                .unwrap_or(0);
            if num_tokens > self.token_max {
                if working.len() == 1 {
                    return Err(ChainError::DocumentOverBudget);
                }
                groups.push(working[..working.len() - 1].to_vec());
                working.remove(0);
            }
        }
        groups.push(working);
        Ok(groups)
    }

    /// Collapse one group into a single synthesized document.
    async fn collapse_group(
        &self,
        group: &[Document],
        question: &str,
        context: &ExecutionContext,
    ) -> Result<Document> {
        let outputs = self
            .collapse_chain()
            .combine(group, question, context)
            .await?;
        Ok(Document::new(combined_text(&outputs)?))
    }
}

#[async_trait]
impl CombineDocumentsChain for ReduceDocumentChain {
    async fn combine(
        &self,
        docs: &[Document],
        question: &str,
        context: &ExecutionContext,
    ) -> Result<Record> {
        let result_docs = self.collapse(docs, question, context).await?;
        let outputs = self
            .combine_chain
            .combine(&result_docs, question, context)
            .await?;
        if question.is_empty() {
            return Ok(outputs);
        }

        // Answer the question over the reduced context.
        let qa_docs = vec![Document::new(combined_text(&outputs)?)];
        self.qa_chain().combine(&qa_docs, question, context).await
    }
}

#[async_trait]
impl Chain for ReduceDocumentChain {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::Mutex;

    /// Each document costs a fixed token count; combines record the
    /// groups they were handed and return a fixed reply.
    struct FakeCombine {
        tokens_per_doc: usize,
        reply: String,
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl FakeCombine {
        fn new(tokens_per_doc: usize, reply: &str) -> Self {
            Self {
                tokens_per_doc,
                reply: reply.to_string(),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<Vec<String>> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CombineDocumentsChain for FakeCombine {
        async fn combine(
            &self,
            docs: &[Document],
            _question: &str,
            _context: &ExecutionContext,
        ) -> Result<Record> {
            let texts = docs.iter().map(|d| d.page_content.clone()).collect();
            self.seen.lock().unwrap().push(texts);
            let mut outputs = Record::new();
            outputs.insert(TEXT_KEY.to_string(), Value::String(self.reply.clone()));
            Ok(outputs)
        }

        fn prompt_length(&self, docs: &[Document], _question: &str) -> Result<Option<usize>> {
            Ok(Some(docs.len() * self.tokens_per_doc))
        }
    }

    fn docs(texts: &[&str]) -> Vec<Document> {
        texts.iter().map(|t| Document::new(*t)).collect()
    }

    #[tokio::test]
    async fn under_budget_combines_documents_unchanged() {
        let combine = Arc::new(FakeCombine::new(100, "done"));
        let chain = ReduceDocumentChain::new(combine.clone()).with_token_max(1000);

        let outputs = chain
            .combine(&docs(&["a", "b", "c"]), "", &ExecutionContext::new())
            .await
            .unwrap();

        assert_eq!(outputs["text"], Value::String("done".into()));
        // One final combine over the untouched sequence, no collapses.
        assert_eq!(combine.seen(), vec![vec!["a", "b", "c"]]);
    }

    #[tokio::test]
    async fn over_budget_collapses_sliding_groups() {
        // Three docs at 400 tokens against a 1000 budget: the split
        // yields overlapping groups [a,b] and [b,c], each collapsed to
        // "folded" (200 tokens), after which the pair fits.
        let combine = Arc::new(FakeCombine::new(400, "ignored"));
        let collapse = Arc::new(FakeCombine::new(0, "folded"));
        let chain = ReduceDocumentChain::new(combine.clone())
            .with_collapse_chain(collapse.clone())
            .with_token_max(1000);

        chain
            .combine(&docs(&["a", "b", "c"]), "", &ExecutionContext::new())
            .await
            .unwrap();

        assert_eq!(collapse.seen(), vec![vec!["a", "b"], vec!["b", "c"]]);
        assert_eq!(combine.seen(), vec![vec!["folded", "folded"]]);
    }

    #[tokio::test]
    async fn single_document_over_budget_is_fatal() {
        let combine = Arc::new(FakeCombine::new(2000, "never"));
        let chain = ReduceDocumentChain::new(combine).with_token_max(1000);

        let err = chain
            .combine(&docs(&["huge"]), "", &ExecutionContext::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "A single document was longer than the context length, we cannot handle this."
        );
    }

    #[tokio::test]
    async fn question_triggers_qa_pass_over_combined_text() {
        let combine = Arc::new(FakeCombine::new(10, "reduced context"));
        let qa = Arc::new(FakeCombine::new(10, "final answer"));
        let chain = ReduceDocumentChain::new(combine.clone()).with_qa_chain(qa.clone());

        let outputs = chain
            .combine(&docs(&["a", "b"]), "why", &ExecutionContext::new())
            .await
            .unwrap();

        assert_eq!(outputs["text"], Value::String("final answer".into()));
        assert_eq!(qa.seen(), vec![vec!["reduced context"]]);
    }

    #[tokio::test]
    async fn qa_pass_falls_back_to_combine_chain() {
        let combine = Arc::new(FakeCombine::new(10, "same text"));
        let chain = ReduceDocumentChain::new(combine.clone());

        chain
            .combine(&docs(&["a"]), "why", &ExecutionContext::new())
            .await
            .unwrap();

        // First the document combine, then the QA pass over its text.
        assert_eq!(combine.seen(), vec![vec!["a"], vec!["same text"]]);
    }

    #[tokio::test]
    async fn unmeasurable_prompts_skip_collapsing() {
        struct Opaque(FakeCombine);

        #[async_trait]
        impl CombineDocumentsChain for Opaque {
            async fn combine(
                &self,
                docs: &[Document],
                question: &str,
                context: &ExecutionContext,
            ) -> Result<Record> {
                self.0.combine(docs, question, context).await
            }
        }

        let combine = Arc::new(Opaque(FakeCombine::new(9999, "done")));
        let chain = ReduceDocumentChain::new(combine.clone()).with_token_max(10);

        let outputs = chain
            .combine(&docs(&["a", "b"]), "", &ExecutionContext::new())
            .await
            .unwrap();

        assert_eq!(outputs["text"], Value::String("done".into()));
        assert_eq!(combine.0.seen(), vec![vec!["a", "b"]]);
    }
}
