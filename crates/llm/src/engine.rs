//! LlmEngine — the generate layer between chains and a model backend.
//!
//! One engine wraps one `ChatModel` with configured defaults, an
//! optional response cache, and callback emission. Resolution order for
//! a generate call: precomputed result on the context (replay), then
//! the cache, then the model itself.

use std::fmt::Display;
use std::sync::Arc;

use tracing::debug;

use tangle_core::error::{ModelError, Result};
use tangle_core::{
    CallbackManager, ChatModel, ExecutionContext, Generation, LlmResult, ResponseCache,
    StreamSink, stop_key,
};

use crate::settings::ModelSettings;

/// The generate layer. Cheap to clone; clones share the model, the
/// settings, and the cache handle.
#[derive(Clone)]
pub struct LlmEngine {
    model: Arc<dyn ChatModel>,
    settings: ModelSettings,
    cache: Option<Arc<dyn ResponseCache>>,
}

impl LlmEngine {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            settings: ModelSettings::default(),
            cache: None,
        }
    }

    pub fn with_settings(mut self, settings: ModelSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Attach a response cache. Without one every call reaches the model.
    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub fn model_name(&self) -> &str {
        &self.settings.model
    }

    /// Complete a batch of prompts.
    ///
    /// Emits `on_llm_start` before resolution and `on_llm_end` /
    /// `on_llm_error` after. Errors are returned to the caller after the
    /// error hook fires; nothing is retried here.
    pub async fn generate(
        &self,
        prompts: &[String],
        stop: &[String],
        context: &ExecutionContext,
        sink: Option<StreamSink>,
        callbacks: &CallbackManager,
    ) -> Result<LlmResult> {
        let started = context.model_started(&self.settings.model, prompts);
        callbacks.on_llm_start(&started);

        match self.produce(prompts, stop, context, sink).await {
            Ok(result) => {
                callbacks.on_llm_end(&started.with_llm_result(result.clone()));
                Ok(result)
            }
            Err(e) => {
                callbacks.on_llm_error(&started.with_error(&e.to_string()));
                Err(e)
            }
        }
    }

    /// Render prompt values to strings, then generate.
    pub async fn generate_prompt<T: Display>(
        &self,
        prompts: &[T],
        stop: &[String],
        context: &ExecutionContext,
        sink: Option<StreamSink>,
        callbacks: &CallbackManager,
    ) -> Result<LlmResult> {
        let rendered: Vec<String> = prompts.iter().map(|p| p.to_string()).collect();
        self.generate(&rendered, stop, context, sink, callbacks).await
    }

    /// Complete a single prompt and return the first generation's text.
    pub async fn predict(
        &self,
        text: &str,
        stop: &[String],
        context: &ExecutionContext,
        callbacks: &CallbackManager,
    ) -> Result<String> {
        let prompts = vec![text.to_string()];
        let result = self
            .generate(&prompts, stop, context, None, callbacks)
            .await?;
        match result.first_text() {
            Some(text) => Ok(text.to_string()),
            None => Err(ModelError::EmptyCompletion(1).into()),
        }
    }

    async fn produce(
        &self,
        prompts: &[String],
        stop: &[String],
        context: &ExecutionContext,
        sink: Option<StreamSink>,
    ) -> Result<LlmResult> {
        // A precomputed result on the context wins over cache and model.
        if let Some(precomputed) = &context.llm_result {
            debug!(model = %self.settings.model, "Replaying precomputed result");
            return Ok(precomputed.clone());
        }

        let llm_key = stop_key(stop);

        if let Some(generations) = self.probe_cache(prompts, &llm_key).await? {
            debug!(
                model = %self.settings.model,
                prompts = prompts.len(),
                "Response cache hit for full batch"
            );
            return Ok(LlmResult {
                generations,
                llm_output: serde_json::Map::new(),
            });
        }

        debug!(
            model = %self.settings.model,
            prompts = prompts.len(),
            streaming = sink.is_some(),
            "Dispatching model calls"
        );

        let mut generations = Vec::with_capacity(prompts.len());
        let mut llm_output = serde_json::Map::new();
        for prompt in prompts {
            let request = self.settings.build_request(prompt, stop, sink.is_some());
            let reply = match &sink {
                Some(sink) => self.model.invoke_streaming(request, sink.clone()).await?,
                None => self.model.invoke(request).await?,
            };
            llm_output = reply.metadata.clone();
            let group = vec![reply.into_generation()];
            if let Some(cache) = &self.cache {
                cache.update(prompt, &llm_key, group.clone()).await?;
            }
            generations.push(group);
        }

        Ok(LlmResult {
            generations,
            llm_output,
        })
    }

    /// All-or-nothing batch probe: the cached result is used only when
    /// every prompt in the batch hits.
    async fn probe_cache(
        &self,
        prompts: &[String],
        llm_key: &str,
    ) -> Result<Option<Vec<Vec<Generation>>>> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        let mut groups = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            match cache.lookup(prompt, llm_key).await? {
                Some(group) => groups.push(group),
                None => return Ok(None),
            }
        }
        Ok(Some(groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tangle_core::{CallbackHandler, CallbackOutcome, InMemoryCache, RunInfo};
    use tokio_stream::StreamExt;
    use tokio_stream::wrappers::ReceiverStream;

    use crate::testing::SequentialMockModel;

    fn engine_with(model: SequentialMockModel) -> (LlmEngine, Arc<SequentialMockModel>) {
        let model = Arc::new(model);
        let engine =
            LlmEngine::new(model.clone()).with_settings(ModelSettings::new("mock-model"));
        (engine, model)
    }

    #[tokio::test]
    async fn generate_returns_model_text_in_prompt_order() {
        let (engine, model) = engine_with(SequentialMockModel::new(["four", "six"]));
        let callbacks = CallbackManager::new();

        let prompts = vec!["2 + 2?".to_string(), "3 + 3?".to_string()];
        let result = engine
            .generate(&prompts, &[], &ExecutionContext::new(), None, &callbacks)
            .await
            .unwrap();

        assert_eq!(result.generations.len(), 2);
        assert_eq!(result.generations[0][0].text, "four");
        assert_eq!(result.generations[1][0].text, "six");
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn cache_prevents_second_model_call() {
        let (engine, model) = engine_with(SequentialMockModel::new(["four"]));
        let engine = engine.with_cache(Arc::new(InMemoryCache::new()));
        let callbacks = CallbackManager::new();
        let prompts = vec!["2 + 2?".to_string()];

        let first = engine
            .generate(&prompts, &[], &ExecutionContext::new(), None, &callbacks)
            .await
            .unwrap();
        let second = engine
            .generate(&prompts, &[], &ExecutionContext::new(), None, &callbacks)
            .await
            .unwrap();

        assert_eq!(model.calls(), 1);
        assert_eq!(first.generations, second.generations);
    }

    #[tokio::test]
    async fn distinct_stop_lists_are_distinct_cache_entries() {
        let (engine, model) = engine_with(SequentialMockModel::new(["a", "b"]));
        let engine = engine.with_cache(Arc::new(InMemoryCache::new()));
        let callbacks = CallbackManager::new();
        let prompts = vec!["same".to_string()];
        let stop = vec!["Observation:".to_string()];

        engine
            .generate(&prompts, &[], &ExecutionContext::new(), None, &callbacks)
            .await
            .unwrap();
        engine
            .generate(&prompts, &stop, &ExecutionContext::new(), None, &callbacks)
            .await
            .unwrap();

        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn precomputed_result_replays_without_model_call() {
        let (engine, model) = engine_with(SequentialMockModel::new(["never used"]));
        let callbacks = CallbackManager::new();

        let canned = LlmResult {
            generations: vec![vec![Generation::new("replayed")]],
            llm_output: serde_json::Map::new(),
        };
        let context = ExecutionContext::with_precomputed(canned.clone());

        let prompts = vec!["anything".to_string()];
        let result = engine
            .generate(&prompts, &[], &context, None, &callbacks)
            .await
            .unwrap();

        assert_eq!(result, canned);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn streaming_sink_receives_the_reply() {
        let (engine, model) = engine_with(SequentialMockModel::new(["streamed answer"]));
        let callbacks = CallbackManager::new();
        let (tx, rx) = tokio::sync::mpsc::channel(8);

        let prompts = vec!["q".to_string()];
        let result = engine
            .generate(&prompts, &[], &ExecutionContext::new(), Some(tx), &callbacks)
            .await
            .unwrap();

        let mut chunks = ReceiverStream::new(rx);
        let mut assembled = String::new();
        while let Some(chunk) = chunks.next().await {
            assembled.push_str(&chunk);
        }

        assert_eq!(assembled, "streamed answer");
        assert_eq!(result.first_text(), Some("streamed answer"));
        assert!(model.requests()[0].stream);
    }

    #[tokio::test]
    async fn predict_returns_first_text() {
        let (engine, _model) = engine_with(SequentialMockModel::new(["the answer"]));
        let callbacks = CallbackManager::new();

        let text = engine
            .predict("question", &[], &ExecutionContext::new(), &callbacks)
            .await
            .unwrap();

        assert_eq!(text, "the answer");
    }

    #[tokio::test]
    async fn generate_prompt_renders_values_first() {
        let (engine, model) = engine_with(SequentialMockModel::new(["ok"]));
        let callbacks = CallbackManager::new();

        engine
            .generate_prompt(&[42], &[], &ExecutionContext::new(), None, &callbacks)
            .await
            .unwrap();

        assert_eq!(model.requests()[0].prompt, "42");
    }

    struct HookRecorder {
        seen: Mutex<Vec<&'static str>>,
    }

    impl CallbackHandler for HookRecorder {
        fn on_llm_start(&self, _r: &RunInfo, _c: &ExecutionContext) -> CallbackOutcome {
            self.seen.lock().unwrap().push("llm_start");
            Ok(())
        }
        fn on_llm_end(&self, _r: &RunInfo, _c: &ExecutionContext) -> CallbackOutcome {
            self.seen.lock().unwrap().push("llm_end");
            Ok(())
        }
        fn on_llm_error(&self, _r: &RunInfo, _c: &ExecutionContext) -> CallbackOutcome {
            self.seen.lock().unwrap().push("llm_error");
            Ok(())
        }
    }

    #[tokio::test]
    async fn model_failure_fires_error_hook_and_propagates() {
        // Empty script: the first call fails.
        let (engine, _model) = engine_with(SequentialMockModel::new(Vec::<String>::new()));
        let recorder = Arc::new(HookRecorder {
            seen: Mutex::new(Vec::new()),
        });
        let callbacks = CallbackManager::new().with_handler(recorder.clone());

        let prompts = vec!["q".to_string()];
        let err = engine
            .generate(&prompts, &[], &ExecutionContext::new(), None, &callbacks)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("exhausted"));
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["llm_start", "llm_error"]);
    }

    #[tokio::test]
    async fn successful_call_fires_start_then_end() {
        let (engine, _model) = engine_with(SequentialMockModel::new(["fine"]));
        let recorder = Arc::new(HookRecorder {
            seen: Mutex::new(Vec::new()),
        });
        let callbacks = CallbackManager::new().with_handler(recorder.clone());

        let prompts = vec!["q".to_string()];
        engine
            .generate(&prompts, &[], &ExecutionContext::new(), None, &callbacks)
            .await
            .unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["llm_start", "llm_end"]);
    }
}
