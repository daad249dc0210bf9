//! Serialized access to the inference primitive.
//!
//! There is exactly one inference primitive per process and it is not
//! re-entrant, so every path into it — batch workers, streaming calls,
//! the embedding side-call — goes through one [`SharedInference`]
//! handle holding a process-wide mutex. The batcher therefore provides
//! concurrency (many waiters) but not parallel inference; a later
//! migration to a truly batched primitive changes only the scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::embed::Embedder;
use crate::traits::{InferenceEngine, TokenStream};
use crate::types::GenerationParams;
use crate::{MimirError, Result};

/// Items buffered between a streaming producer and its consumer.
///
/// Bounded so a fast model cannot fill unbounded memory behind a slow
/// consumer; the producer blocks when the consumer falls behind.
const STREAM_BUFFER: usize = 64;

/// Mutex-guarded handle over the process's single inference primitive.
pub struct SharedInference {
    engine: Arc<dyn InferenceEngine>,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl SharedInference {
    /// Wrap an inference primitive in the shared process-wide lock.
    pub fn new(engine: Arc<dyn InferenceEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Whether the underlying model loaded.
    pub fn is_loaded(&self) -> bool {
        self.engine.is_loaded()
    }

    /// Load-failure reason, if the model is not loaded.
    pub fn load_error(&self) -> Option<String> {
        self.engine.load_error()
    }

    /// One-shot generation, serialized on the inference lock.
    pub async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let _guard = self.lock.lock().await;
        self.engine.generate(prompt, params).await
    }

    /// Streaming generation.
    ///
    /// The inference lock is held for the whole life of the stream —
    /// the primitive stays occupied until its last token — and released
    /// by the forwarding task when the inner stream ends or the
    /// consumer goes away.
    pub async fn generate_stream(
        self: &Arc<Self>,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream> {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        let mut inner = match self.engine.generate_stream(prompt, params).await {
            Ok(stream) => stream,
            Err(e) => {
                drop(guard);
                return Err(e);
            }
        };

        let (tx, rx) = tokio::sync::mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            while let Some(item) = inner.next().await {
                if tx.send(item).await.is_err() {
                    debug!("stream consumer dropped, abandoning generation");
                    break;
                }
            }
            drop(guard);
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[async_trait]
impl Embedder for SharedInference {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let _guard = self.lock.lock().await;
        self.engine.embed(text).await
    }
}

/// Placeholder primitive for processes whose model failed to load.
///
/// The engine answers such processes with a structured demo response
/// and never reaches these methods in normal operation.
pub struct UnloadedInference {
    reason: String,
}

impl UnloadedInference {
    /// Record why the model is unavailable.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl InferenceEngine for UnloadedInference {
    fn is_loaded(&self) -> bool {
        false
    }

    fn load_error(&self) -> Option<String> {
        Some(self.reason.clone())
    }

    async fn generate(&self, _prompt: &str, _params: &GenerationParams) -> Result<String> {
        Err(MimirError::InferenceFailed(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEngine {
        in_flight: AtomicUsize,
        observed_overlap: AtomicUsize,
    }

    #[async_trait]
    impl InferenceEngine for CountingEngine {
        fn is_loaded(&self) -> bool {
            true
        }

        async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst);
            if now > 0 {
                self.observed_overlap.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("echo: {prompt}"))
        }
    }

    #[tokio::test]
    async fn concurrent_calls_never_overlap() {
        let engine = Arc::new(CountingEngine {
            in_flight: AtomicUsize::new(0),
            observed_overlap: AtomicUsize::new(0),
        });
        let shared = SharedInference::new(engine.clone());

        let params = GenerationParams::default();
        let mut handles = Vec::new();
        for i in 0..8 {
            let shared = Arc::clone(&shared);
            handles.push(tokio::spawn(async move {
                shared.generate(&format!("p{i}"), &params).await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }
        assert_eq!(engine.observed_overlap.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unloaded_engine_reports_reason() {
        let engine = UnloadedInference::new("model file missing");
        assert!(!engine.is_loaded());
        assert_eq!(engine.load_error().as_deref(), Some("model file missing"));
        let err = engine
            .generate("p", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MimirError::InferenceFailed(_)));
    }
}
