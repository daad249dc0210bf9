//! Cached engine — the serving core's public operation.
//!
//! [`CachedEngine::generate`] composes the subsystems in a fixed
//! sequence: input screen → semantic cache lookup (on the original
//! prompt) → retrieval augmentation → batched dispatch → output filter
//! → output screen → cache insert (original prompt, sanitized
//! response). Any step may short-circuit to a block or an error;
//! retrieval and cache-insert failures are logged and never fatal.
//!
//! Streaming uses the same pipeline with the post-processing deferred:
//! raw tokens are forwarded as they arrive, the full text is collected
//! alongside, and the filter/screen/insert steps run when the stream
//! ends. Cached hits are reshaped into a synthetic one-shot stream so
//! callers keep a single code path.

mod builder;

pub use builder::{Mimir, MimirBuilder};

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::batcher::Batcher;
use crate::cache::SemanticCache;
use crate::filter;
use crate::guardrail::Guardrail;
use crate::inference::SharedInference;
use crate::retrieval::DocumentStore;
use crate::telemetry;
use crate::types::{EngineResponse, GenerationParams, ResponseStatus, StreamEvent};
use crate::Result;

/// Boxed stream of engine events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Engine-level statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate_pct: f64,
    pub cache_entries: usize,
    pub model_loaded: bool,
}

#[derive(Default)]
struct EngineCounters {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

/// LLM engine with semantic caching, retrieval augmentation, batching,
/// and guardrails. Assembled by [`Mimir::builder`].
pub struct CachedEngine {
    inference: Arc<SharedInference>,
    cache: Arc<SemanticCache>,
    retrieval: Arc<DocumentStore>,
    guardrail: Guardrail,
    batcher: Batcher,
    counters: EngineCounters,
}

impl CachedEngine {
    pub(crate) fn new(
        inference: Arc<SharedInference>,
        cache: Arc<SemanticCache>,
        retrieval: Arc<DocumentStore>,
        guardrail: Guardrail,
        batcher: Batcher,
    ) -> Self {
        Self {
            inference,
            cache,
            retrieval,
            guardrail,
            batcher,
            counters: EngineCounters::default(),
        }
    }

    /// The semantic cache this engine serves from.
    pub fn cache(&self) -> &Arc<SemanticCache> {
        &self.cache
    }

    /// The retrieval store consulted for augmentation.
    pub fn retrieval(&self) -> &Arc<DocumentStore> {
        &self.retrieval
    }

    /// The continuous batcher in front of the primitive.
    pub fn batcher(&self) -> &Batcher {
        &self.batcher
    }

    /// Whether the inference primitive is loaded.
    pub fn model_loaded(&self) -> bool {
        self.inference.is_loaded()
    }

    /// Generate a response for `prompt`.
    ///
    /// Guardrail blocks on the input side surface as
    /// [`MimirError::GuardrailBlocked`](crate::MimirError::GuardrailBlocked);
    /// output-side blocks return a response with
    /// [`ResponseStatus::Blocked`]. Batcher and inference errors
    /// propagate verbatim.
    pub async fn generate(
        &self,
        prompt: &str,
        params: GenerationParams,
        use_cache: bool,
    ) -> Result<EngineResponse> {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);

        // 1. Input screen — a block never touches cache or batcher.
        if let Err(e) = self.guardrail.screen_input(prompt) {
            metrics::counter!(telemetry::REQUESTS_TOTAL, "status" => "error").increment(1);
            return Err(e);
        }

        // 2. Cache lookup on the original prompt.
        let mut similarity = 0.0;
        if use_cache {
            let (hit, sim) = self.cache.lookup(prompt).await;
            similarity = sim;
            if let Some(cached) = hit {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(similarity, "serving from semantic cache");
                let response = self.finish(prompt, &cached, None, true, similarity, false).await;
                metrics::counter!(telemetry::REQUESTS_TOTAL, "status" => "ok").increment(1);
                return Ok(response);
            }
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        if !self.inference.is_loaded() {
            metrics::counter!(telemetry::REQUESTS_TOTAL, "status" => "ok").increment(1);
            return Ok(self.demo_response(prompt, similarity));
        }

        // 3. Retrieval augmentation, never fatal.
        let (dispatch_prompt, context) = self.augment(prompt).await;

        // 4. Dispatch through the batcher; errors surface verbatim.
        let raw = match self.batcher.submit(&dispatch_prompt, params).await {
            Ok(raw) => raw,
            Err(e) => {
                metrics::counter!(telemetry::REQUESTS_TOTAL, "status" => "error").increment(1);
                return Err(e);
            }
        };

        // 5–8. Filter, screen, insert, respond.
        let response = self
            .finish(prompt, &raw, context, false, similarity, use_cache)
            .await;
        metrics::counter!(telemetry::REQUESTS_TOTAL, "status" => "ok").increment(1);
        Ok(response)
    }

    /// Streaming variant of [`generate`](Self::generate).
    ///
    /// Yields raw tokens as they arrive, then one
    /// [`StreamEvent::Done`] carrying the sanitized response and
    /// metadata. Cached hits yield a synthetic whitespace-split stream.
    pub async fn generate_stream(
        &self,
        prompt: &str,
        params: GenerationParams,
        use_cache: bool,
    ) -> Result<EventStream> {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        self.guardrail.screen_input(prompt)?;

        let mut similarity = 0.0;
        if use_cache {
            let (hit, sim) = self.cache.lookup(prompt).await;
            similarity = sim;
            if let Some(cached) = hit {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                let response = self.finish(prompt, &cached, None, true, similarity, false).await;
                return Ok(synthetic_stream(response));
            }
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        if !self.inference.is_loaded() {
            return Ok(synthetic_stream(self.demo_response(prompt, similarity)));
        }

        let (dispatch_prompt, context) = self.augment(prompt).await;

        // Streaming holds the primitive for its full duration, so it
        // serializes on the shared inference lock directly instead of
        // the collection window.
        let mut inner = self
            .inference
            .generate_stream(&dispatch_prompt, &params)
            .await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let cache = Arc::clone(&self.cache);
        let guardrail = self.guardrail.clone();
        let prompt = prompt.to_string();
        tokio::spawn(async move {
            let mut full = String::new();
            while let Some(item) = inner.next().await {
                match item {
                    Ok(chunk) => {
                        full.push_str(&chunk);
                        if tx.send(Ok(StreamEvent::Token(chunk))).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }

            // End of stream: filter, screen, insert, report.
            let filtered = filter::format_response(&full);
            let report = guardrail.screen_output(&prompt, &filtered, context.as_deref());
            let status = if report.blocked {
                ResponseStatus::Blocked
            } else {
                ResponseStatus::Success
            };
            if !report.blocked && use_cache {
                if let Err(e) = cache.insert(&prompt, &report.response).await {
                    warn!(error = %e, "cache insert after stream failed");
                }
            }
            let response = EngineResponse {
                response: report.response,
                status,
                cache_hit: false,
                similarity,
                warnings: report.warnings,
                confidence: report.confidence,
                asvs_compliance: report.asvs,
            };
            let _ = tx.send(Ok(StreamEvent::Done(Box::new(response)))).await;
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    /// Filter, screen, and (on the miss path) cache the response.
    async fn finish(
        &self,
        prompt: &str,
        raw: &str,
        context: Option<Vec<String>>,
        cache_hit: bool,
        similarity: f32,
        insert: bool,
    ) -> EngineResponse {
        let filtered = filter::format_response(raw);
        let report = self
            .guardrail
            .screen_output(prompt, &filtered, context.as_deref());

        if report.blocked {
            return EngineResponse {
                response: report.response,
                status: ResponseStatus::Blocked,
                cache_hit,
                similarity,
                warnings: report.warnings,
                confidence: report.confidence,
                asvs_compliance: report.asvs,
            };
        }

        if insert {
            if let Err(e) = self.cache.insert(prompt, &report.response).await {
                warn!(error = %e, "cache insert failed");
            }
        }

        EngineResponse {
            response: report.response,
            status: ResponseStatus::Success,
            cache_hit,
            similarity,
            warnings: report.warnings,
            confidence: report.confidence,
            asvs_compliance: report.asvs,
        }
    }

    /// Prepend retrieved context when the store has qualifying chunks.
    async fn augment(&self, prompt: &str) -> (String, Option<Vec<String>>) {
        if self.retrieval.is_empty() {
            return (prompt.to_string(), None);
        }
        match self.retrieval.search(prompt).await {
            Ok(chunks) if !chunks.is_empty() => {
                metrics::counter!(telemetry::RETRIEVAL_AUGMENTED_TOTAL).increment(1);
                let texts: Vec<String> = chunks.into_iter().map(|s| s.chunk.text).collect();
                let augmented = format!(
                    "Context:\n{}\n\nQuestion:\n{prompt}\n\nAnswer:",
                    texts.join("\n\n")
                );
                (augmented, Some(texts))
            }
            Ok(_) => (prompt.to_string(), None),
            Err(e) => {
                warn!(error = %e, "retrieval failed, continuing without augmentation");
                (prompt.to_string(), None)
            }
        }
    }

    fn demo_response(&self, prompt: &str, similarity: f32) -> EngineResponse {
        let reason = self
            .inference
            .load_error()
            .unwrap_or_else(|| "model not initialized".into());
        let preview: String = prompt.chars().take(100).collect();
        let text = format!(
            "[DEMO MODE]\n\nReason: {reason}\n\nYour query: \"{preview}\"\n\n\
             The inference runtime is not loaded, so this is a canned response. \
             Check the model path and the startup log, then restart the service."
        );
        EngineResponse {
            response: text,
            status: ResponseStatus::Demo,
            cache_hit: false,
            similarity,
            warnings: Vec::new(),
            confidence: 0.0,
            asvs_compliance: Vec::new(),
        }
    }

    /// Engine-level statistics.
    pub fn stats(&self) -> EngineStats {
        let hits = self.counters.cache_hits.load(Ordering::Relaxed);
        let misses = self.counters.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        EngineStats {
            total_requests: self.counters.total_requests.load(Ordering::Relaxed),
            cache_hits: hits,
            cache_misses: misses,
            hit_rate_pct: (hit_rate * 100.0).round() / 100.0,
            cache_entries: self.cache.len(),
            model_loaded: self.inference.is_loaded(),
        }
    }

    /// Drop every cached entry and reset hit/miss counters. Returns the
    /// number of entries removed.
    pub fn clear_cache(&self) -> usize {
        let removed = self.cache.invalidate_all();
        self.cache.reset_counters();
        self.counters.cache_hits.store(0, Ordering::Relaxed);
        self.counters.cache_misses.store(0, Ordering::Relaxed);
        debug!(removed, "semantic cache cleared");
        removed
    }
}

/// One-shot synthetic stream over an already-finished response.
fn synthetic_stream(response: EngineResponse) -> EventStream {
    let mut events: Vec<Result<StreamEvent>> = response
        .response
        .split_whitespace()
        .map(|word| Ok(StreamEvent::Token(format!("{word} "))))
        .collect();
    events.push(Ok(StreamEvent::Done(Box::new(response))));
    Box::pin(tokio_stream::iter(events))
}
