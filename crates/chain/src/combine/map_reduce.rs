//! MapReduce strategy: map every document, then reduce the results.

use async_trait::async_trait;
use futures::future;
use serde_json::Value;

use tangle_core::{CallbackManager, Document, ExecutionContext, Record, StreamSink};

use crate::base::Chain;
use crate::combine::{
    CombineDocumentsChain, INPUT_DOCUMENTS_KEY, QUESTION_KEY, ReduceDocumentChain, combine_call,
};
use crate::error::Result;
use crate::llm_chain::{LlmChain, TEXT_KEY};

/// Maps each document independently through an LLM chain (in parallel,
/// results collected in input order), turns each mapped answer into a
/// result document, and hands the sequence to a Reduce chain.
pub struct MapReduceDocumentChain {
    map_chain: LlmChain,
    reduce_chain: ReduceDocumentChain,
    document_variable_name: String,
    callbacks: CallbackManager,
    name: String,
}

impl MapReduceDocumentChain {
    pub fn new(map_chain: LlmChain, reduce_chain: ReduceDocumentChain) -> Self {
        Self {
            map_chain,
            reduce_chain,
            document_variable_name: "context".to_string(),
            callbacks: CallbackManager::new(),
            name: "map_reduce_document_chain".to_string(),
        }
    }

    pub fn with_document_variable_name(mut self, name: impl Into<String>) -> Self {
        self.document_variable_name = name.into();
        self
    }

    pub fn with_callbacks(mut self, callbacks: CallbackManager) -> Self {
        self.callbacks = callbacks;
        self
    }
}

#[async_trait]
impl CombineDocumentsChain for MapReduceDocumentChain {
    async fn combine(
        &self,
        docs: &[Document],
        question: &str,
        context: &ExecutionContext,
    ) -> Result<Record> {
        let calls = docs.iter().map(|doc| {
            let mut inputs = Record::new();
            inputs.insert(
                self.document_variable_name.clone(),
                Value::String(doc.page_content.clone()),
            );
            inputs.insert(
                QUESTION_KEY.to_string(),
                Value::String(question.to_string()),
            );
            self.map_chain.predict(inputs, context, None)
        });
        let mapped = future::try_join_all(calls).await?;

        // One result document per input document, metadata carried over.
        let result_docs: Vec<Document> = mapped
            .into_iter()
            .zip(docs)
            .map(|(text, source)| {
                let mut doc = Document::new(text);
                doc.metadata = source.metadata.clone();
                doc
            })
            .collect();

        self.reduce_chain.combine(&result_docs, question, context).await
    }
}

#[async_trait]
impl Chain for MapReduceDocumentChain {
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
    use crate::combine::StuffDocumentChain;
    use crate::prompt::PromptTemplate;
    use std::sync::{Arc, Mutex};
    use tangle_llm::testing::SequentialMockModel;
    use tangle_llm::{LlmEngine, ModelSettings};

    fn llm_chain(model: &Arc<SequentialMockModel>, template: &str) -> LlmChain {
        let engine = LlmEngine::new(model.clone()).with_settings(ModelSettings::new("mock"));
        LlmChain::new(engine, PromptTemplate::from_template(template))
    }

    #[tokio::test]
    async fn maps_each_document_then_reduces_in_order() {
        let model = Arc::new(SequentialMockModel::new(["m1", "m2", "m3", "combined"]));
        let stuff = StuffDocumentChain::new(llm_chain(&model, "{context}"));
        let reduce = ReduceDocumentChain::new(Arc::new(stuff));
        let chain = MapReduceDocumentChain::new(llm_chain(&model, "{context}"), reduce);

        let docs = vec![
            Document::new("a"),
            Document::new("b"),
            Document::new("c"),
        ];
        let outputs = chain
            .combine(&docs, "", &ExecutionContext::new())
            .await
            .unwrap();

        assert_eq!(outputs["text"], Value::String("combined".into()));
        let prompts: Vec<String> =
            model.requests().into_iter().map(|r| r.prompt).collect();
        assert_eq!(prompts, ["a", "b", "c", "m1\n\nm2\n\nm3"]);
    }

    struct RecordingCombine {
        seen: Mutex<Vec<Document>>,
    }

    #[async_trait]
    impl CombineDocumentsChain for RecordingCombine {
        async fn combine(
            &self,
            docs: &[Document],
            _question: &str,
            _context: &ExecutionContext,
        ) -> Result<Record> {
            self.seen.lock().unwrap().extend(docs.iter().cloned());
            let mut outputs = Record::new();
            outputs.insert(TEXT_KEY.to_string(), Value::String("done".into()));
            Ok(outputs)
        }
    }

    #[tokio::test]
    async fn mapped_documents_keep_source_metadata() {
        let model = Arc::new(SequentialMockModel::new(["mapped"]));
        let recorder = Arc::new(RecordingCombine {
            seen: Mutex::new(Vec::new()),
        });
        let reduce = ReduceDocumentChain::new(recorder.clone());
        let chain = MapReduceDocumentChain::new(llm_chain(&model, "{context}"), reduce);

        let doc = Document::new("body").with_metadata("source", Value::String("a.md".into()));
        chain
            .combine(&[doc], "", &ExecutionContext::new())
            .await
            .unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen[0].page_content, "mapped");
        assert_eq!(seen[0].metadata["source"], Value::String("a.md".into()));
    }
}
