//! Builder for assembling the cached engine.
//!
//! All components are explicit dependencies wired here at startup:
//! one inference primitive per process, shared (behind the process-wide
//! lock) by the batcher, the cache's embedding side-call, and the
//! retrieval store.

use std::sync::Arc;

use crate::batcher::{Batcher, BatcherConfig};
use crate::cache::{CacheConfig, SemanticCache, SnapshotStore};
use crate::embed::Embedder;
use crate::engine::CachedEngine;
use crate::guardrail::{Guardrail, GuardrailConfig};
use crate::inference::SharedInference;
use crate::retrieval::{DocumentStore, RetrievalConfig};
use crate::traits::InferenceEngine;
use crate::{MimirError, Result};

/// Main entry point for creating engine instances.
pub struct Mimir;

impl Mimir {
    /// Create a new builder for configuring the engine.
    pub fn builder() -> MimirBuilder {
        MimirBuilder::new()
    }
}

/// Builder for configuring engine instances.
pub struct MimirBuilder {
    inference: Option<Arc<dyn InferenceEngine>>,
    cache_config: CacheConfig,
    batcher_config: BatcherConfig,
    retrieval_config: RetrievalConfig,
    guardrail_config: GuardrailConfig,
    snapshot: Option<Arc<dyn SnapshotStore>>,
}

impl MimirBuilder {
    pub fn new() -> Self {
        Self {
            inference: None,
            cache_config: CacheConfig::default(),
            batcher_config: BatcherConfig::default(),
            retrieval_config: RetrievalConfig::default(),
            guardrail_config: GuardrailConfig::default(),
            snapshot: None,
        }
    }

    /// Set the inference primitive (required).
    pub fn inference(mut self, engine: Arc<dyn InferenceEngine>) -> Self {
        self.inference = Some(engine);
        self
    }

    /// Configure the semantic cache.
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Configure the continuous batcher.
    pub fn batcher_config(mut self, config: BatcherConfig) -> Self {
        self.batcher_config = config;
        self
    }

    /// Configure the retrieval store.
    pub fn retrieval_config(mut self, config: RetrievalConfig) -> Self {
        self.retrieval_config = config;
        self
    }

    /// Configure the guardrails.
    pub fn guardrail_config(mut self, config: GuardrailConfig) -> Self {
        self.guardrail_config = config;
        self
    }

    /// Attach an external KV store for best-effort cache snapshots.
    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot = Some(store);
        self
    }

    /// Assemble the engine.
    ///
    /// Spawns the batch scheduler, so this must run inside a tokio
    /// runtime. When the primitive reports itself unloaded, the cache
    /// and retrieval store fall back to the deterministic
    /// pseudo-embedding instead of its embedding side-call.
    pub fn build(self) -> Result<CachedEngine> {
        let engine = self
            .inference
            .ok_or_else(|| MimirError::Configuration("no inference primitive configured".into()))?;
        let shared = SharedInference::new(engine);

        let mut cache = SemanticCache::new(self.cache_config);
        let mut retrieval = DocumentStore::new(self.retrieval_config);
        if shared.is_loaded() {
            let embedder: Arc<dyn Embedder> = Arc::clone(&shared) as Arc<dyn Embedder>;
            cache = cache.with_embedder(Arc::clone(&embedder));
            retrieval = retrieval.with_embedder(embedder);
        }
        if let Some(store) = self.snapshot {
            cache = cache.with_snapshot(store);
        }

        let batcher = Batcher::start(Arc::clone(&shared), self.batcher_config);
        let guardrail = Guardrail::new(self.guardrail_config);

        Ok(CachedEngine::new(
            shared,
            Arc::new(cache),
            Arc::new(retrieval),
            guardrail,
            batcher,
        ))
    }
}

impl Default for MimirBuilder {
    fn default() -> Self {
        Self::new()
    }
}
