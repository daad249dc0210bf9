//! Mimir - serving core for an on-premise LLM inference gateway
//!
//! This crate provides the subsystem between a chat endpoint and a
//! single bounded inference runtime: a Struct-of-Arrays semantic
//! response cache with cosine lookup and hit-weighted eviction, a
//! continuous batcher that aggregates concurrent requests over a short
//! window, retrieval augmentation, guardrail screens, and the cached
//! engine that composes them behind one `generate` operation.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mimir::{GenerationParams, Mimir};
//! # use mimir::inference::UnloadedInference;
//!
//! #[tokio::main]
//! async fn main() -> mimir::Result<()> {
//!     let engine = Mimir::builder()
//!         .inference(Arc::new(UnloadedInference::new("demo")))
//!         .build()?;
//!
//!     let reply = engine
//!         .generate("What is machine learning?", GenerationParams::default(), true)
//!         .await?;
//!
//!     println!("{} (cache hit: {})", reply.response, reply.cache_hit);
//!     Ok(())
//! }
//! ```

pub mod batcher;
pub mod cache;
pub mod embed;
pub mod engine;
pub mod error;
pub mod filter;
pub mod guardrail;
pub mod inference;
pub mod retrieval;
#[cfg(feature = "server")]
pub mod server;
pub mod telemetry;
pub mod traits;
pub mod types;

// Re-export main types at crate root
pub use error::{MimirError, Result};
pub use engine::{CachedEngine, EngineStats, Mimir, MimirBuilder};
pub use traits::InferenceEngine;

// Re-export the commonly used types
pub use batcher::{BatcherConfig, BatcherStats};
pub use cache::{CacheConfig, CacheStats, SemanticCache};
pub use guardrail::{Guardrail, GuardrailConfig, OutputReport};
pub use retrieval::{DocumentStore, RetrievalChunk, RetrievalConfig, ScoredChunk};
pub use types::{EngineResponse, GenerationParams, ResponseStatus, StreamEvent};
