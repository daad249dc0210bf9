//! Core InferenceEngine trait

use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;

use crate::types::GenerationParams;
use crate::{MimirError, Result};

/// Boxed stream of raw generated text chunks.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// The text-in/text-out inference primitive the serving core drives.
///
/// Implementations wrap an opaque single-threaded model runtime and are
/// NOT re-entrant: the core guarantees at most one in-flight call per
/// process via a shared mutex (see
/// [`SharedInference`](crate::inference::SharedInference)). Implementors do
/// not need their own locking.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Whether the underlying model loaded successfully.
    ///
    /// When `false`, the engine answers with a structured demo response
    /// and never populates the cache.
    fn is_loaded(&self) -> bool;

    /// Human-readable reason the model failed to load, if it did.
    fn load_error(&self) -> Option<String> {
        None
    }

    /// Non-streaming text generation.
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;

    /// Streaming text generation.
    ///
    /// The default implementation degrades to a one-chunk stream over
    /// the non-streaming result.
    async fn generate_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream> {
        let text = self.generate(prompt, params).await?;
        Ok(Box::pin(tokio_stream::once(Ok(text))))
    }

    /// Embedding side-call.
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(MimirError::NotImplemented("embed".into()))
    }
}
