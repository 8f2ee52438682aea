//! Response cache for model completions.
//!
//! Keyed by `(prompt, llm_key)` where the llm key is the serialized
//! stop-condition list for the call (empty when none). Caching is an
//! explicit collaborator: components that want it hold a handle,
//! nothing is process-global.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CacheError;
use crate::output::Generation;

/// Serialized form of a stop list for cache key composition.
///
/// An empty stop list contributes an empty string, so requests without
/// stops share entries with requests whose stop list was never set.
pub fn stop_key(stop: &[String]) -> String {
    if stop.is_empty() {
        String::new()
    } else {
        serde_json::to_string(stop).unwrap_or_default()
    }
}

/// Storage for previously produced generations.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Generations previously stored for this prompt and model key.
    async fn lookup(
        &self,
        prompt: &str,
        llm_key: &str,
    ) -> Result<Option<Vec<Generation>>, CacheError>;

    /// Store the generations produced for this prompt and model key.
    async fn update(
        &self,
        prompt: &str,
        llm_key: &str,
        generations: Vec<Generation>,
    ) -> Result<(), CacheError>;

    /// Drop all entries.
    async fn clear(&self) -> Result<(), CacheError>;
}

/// Process-local cache backed by a `HashMap`.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<(String, String), Vec<Generation>>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached entries. Intended for tests and diagnostics.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ResponseCache for InMemoryCache {
    async fn lookup(
        &self,
        prompt: &str,
        llm_key: &str,
    ) -> Result<Option<Vec<Generation>>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(prompt.to_string(), llm_key.to_string()))
            .cloned())
    }

    async fn update(
        &self,
        prompt: &str,
        llm_key: &str,
        generations: Vec<Generation>,
    ) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.insert((prompt.to_string(), llm_key.to_string()), generations);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_misses_then_hits_after_update() {
        let cache = InMemoryCache::new();
        assert!(cache.lookup("2 + 2?", "calc-v1").await.unwrap().is_none());

        cache
            .update("2 + 2?", "calc-v1", vec![Generation::new("4")])
            .await
            .unwrap();

        let hit = cache.lookup("2 + 2?", "calc-v1").await.unwrap().unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].text, "4");
    }

    #[tokio::test]
    async fn entries_are_keyed_by_llm_key_too() {
        let cache = InMemoryCache::new();
        cache
            .update("same prompt", r#"["Observation:"]"#, vec![Generation::new("a")])
            .await
            .unwrap();

        assert!(cache.lookup("same prompt", "").await.unwrap().is_none());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn clear_empties_the_cache() {
        let cache = InMemoryCache::new();
        cache
            .update("p", "k", vec![Generation::new("g")])
            .await
            .unwrap();
        cache.clear().await.unwrap();
        assert!(cache.is_empty().await);
    }

    #[test]
    fn stop_key_is_empty_without_stops() {
        assert_eq!(stop_key(&[]), "");
        let stops = vec!["Human:".to_string(), "AI:".to_string()];
        assert_eq!(stop_key(&stops), r#"["Human:","AI:"]"#);
    }
}
