//! In-memory vector store for retrieval-augmented generation.
//!
//! Append-only rows of `{text, source, chunk_id}` with their embeddings
//! kept in one row-major f32 matrix (row `i` is chunk `i`). Search is a
//! full cosine sweep — fine for the on-premise scale this serves.
//!
//! The store shares the cache's [`Embedder`] seam so both subsystems
//! ride the same inference handle (or the same pseudo-embedding
//! fallback). Chunks whose embedding fails are dropped with a log line,
//! never an error.
//!
//! Persistence is a paired file: chunk metadata as JSON next to the raw
//! matrix with a shape header. The pair is rewritten after every `add`
//! and `clear`; a missing or mis-shaped half at startup discards both.

mod persist;

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::embed::{Embedder, dot, l2_norm, pseudo_embedding};
use crate::{MimirError, Result};

/// Norms at or below this floor are degenerate and score 0.
const NORM_FLOOR: f32 = 1e-8;

/// Configuration for the retrieval store.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Embedding dimension. Default: 768.
    pub dimension: usize,
    /// Number of chunks returned per search. Default: 2.
    pub top_k: usize,
    /// Minimum cosine similarity for a chunk to qualify. Default: 0.3.
    pub threshold: f32,
    /// Base path for the persisted `{.json, .vec}` pair. `None`
    /// disables persistence.
    pub storage_path: Option<PathBuf>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            dimension: 768,
            top_k: 2,
            threshold: 0.3,
            storage_path: None,
        }
    }
}

impl RetrievalConfig {
    /// Create a config with the defaults above.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the embedding dimension.
    pub fn dimension(mut self, dim: usize) -> Self {
        self.dimension = dim;
        self
    }

    /// Set the search result count.
    pub fn top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    /// Set the similarity threshold.
    pub fn threshold(mut self, t: f32) -> Self {
        self.threshold = t;
        self
    }

    /// Enable persistence under the given base path.
    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }
}

/// One retrievable document chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalChunk {
    /// Chunk text, as fed to the embedder.
    pub text: String,
    /// Originating document name.
    pub source: String,
    /// Position of this chunk within its document.
    pub chunk_id: usize,
}

/// A chunk plus its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: RetrievalChunk,
    pub score: f32,
}

struct StoreState {
    chunks: Vec<RetrievalChunk>,
    /// Row-major `len × dimension` embedding matrix.
    embeddings: Vec<f32>,
}

/// Append-only vector store over document chunks.
pub struct DocumentStore {
    config: RetrievalConfig,
    embedder: Option<Arc<dyn Embedder>>,
    state: RwLock<StoreState>,
}

impl DocumentStore {
    /// Create a store, loading any persisted pair found under the
    /// configured storage path.
    pub fn new(config: RetrievalConfig) -> Self {
        let state = match &config.storage_path {
            Some(path) => match persist::load(path, config.dimension) {
                Ok(Some((chunks, embeddings))) => {
                    debug!(chunks = chunks.len(), "retrieval store loaded");
                    StoreState { chunks, embeddings }
                }
                Ok(None) => StoreState {
                    chunks: Vec::new(),
                    embeddings: Vec::new(),
                },
                Err(e) => {
                    warn!(error = %e, "retrieval store load failed, starting empty");
                    StoreState {
                        chunks: Vec::new(),
                        embeddings: Vec::new(),
                    }
                }
            },
            None => StoreState {
                chunks: Vec::new(),
                embeddings: Vec::new(),
            },
        };
        Self {
            config,
            embedder: None,
            state: RwLock::new(state),
        }
    }

    /// Attach a real embedding source.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.state.read().expect("store lock poisoned").chunks.len()
    }

    /// Whether the store holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = match &self.embedder {
            Some(embedder) => embedder.embed(text).await?,
            None => pseudo_embedding(text, self.config.dimension),
        };
        if embedding.len() != self.config.dimension {
            return Err(MimirError::EmbeddingFailed(format!(
                "expected {} dimensions, got {}",
                self.config.dimension,
                embedding.len()
            )));
        }
        Ok(embedding)
    }

    /// Add chunks to the store, returning how many were actually kept.
    ///
    /// Chunks with empty text or a failed embedding are dropped (with a
    /// log line for the latter). The persisted pair is rewritten
    /// afterwards; persistence failures are logged, never propagated.
    pub async fn add(&self, chunks: Vec<RetrievalChunk>) -> Result<usize> {
        let mut kept = Vec::new();
        let mut rows = Vec::new();
        for chunk in chunks {
            if chunk.text.is_empty() {
                continue;
            }
            match self.embed(&chunk.text).await {
                Ok(embedding) => {
                    rows.push(embedding);
                    kept.push(chunk);
                }
                Err(e) => {
                    warn!(source = %chunk.source, chunk_id = chunk.chunk_id, error = %e,
                        "dropping chunk with failed embedding");
                }
            }
        }
        if kept.is_empty() {
            return Ok(0);
        }

        let added = kept.len();
        {
            let mut state = self.state.write().expect("store lock poisoned");
            for row in &rows {
                state.embeddings.extend_from_slice(row);
            }
            state.chunks.extend(kept);
        }
        debug!(added, total = self.len(), "retrieval chunks added");
        self.persist();
        Ok(added)
    }

    /// Top-k chunks whose cosine similarity to `query` reaches the
    /// configured threshold, best first.
    pub async fn search(&self, query: &str) -> Result<Vec<ScoredChunk>> {
        self.search_with(query, self.config.top_k, self.config.threshold)
            .await
    }

    /// [`search`](Self::search) with explicit cutoffs.
    pub async fn search_with(&self, query: &str, k: usize, threshold: f32) -> Result<Vec<ScoredChunk>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embed(query).await?;
        let query_norm = l2_norm(&query_embedding);

        let state = self.state.read().expect("store lock poisoned");
        let dim = self.config.dimension;
        let mut scored: Vec<(usize, f32)> = state
            .chunks
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let row = &state.embeddings[i * dim..(i + 1) * dim];
                let row_norm = l2_norm(row);
                let score = if query_norm > NORM_FLOOR && row_norm > NORM_FLOOR {
                    (dot(&query_embedding, row) / (query_norm * row_norm)).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                (i, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0)));

        Ok(scored
            .into_iter()
            .take(k)
            .filter(|(_, score)| *score >= threshold)
            .map(|(i, score)| ScoredChunk {
                chunk: state.chunks[i].clone(),
                score,
            })
            .collect())
    }

    /// Drop every chunk and rewrite the (now empty) persisted pair.
    pub fn clear(&self) {
        {
            let mut state = self.state.write().expect("store lock poisoned");
            state.chunks.clear();
            state.embeddings.clear();
        }
        debug!("retrieval store cleared");
        self.persist();
    }

    fn persist(&self) {
        let Some(path) = &self.config.storage_path else {
            return;
        };
        let state = self.state.read().expect("store lock poisoned");
        if let Err(e) = persist::save(path, self.config.dimension, &state.chunks, &state.embeddings)
        {
            warn!(error = %e, "retrieval store save failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, id: usize) -> RetrievalChunk {
        RetrievalChunk {
            text: text.into(),
            source: "test.txt".into(),
            chunk_id: id,
        }
    }

    #[tokio::test]
    async fn empty_store_returns_nothing() {
        let store = DocumentStore::new(RetrievalConfig::new().dimension(32));
        assert!(store.search("anything").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn identical_text_scores_top() {
        let store = DocumentStore::new(RetrievalConfig::new().dimension(64));
        store
            .add(vec![chunk("rust ownership rules", 0), chunk("tokio runtime internals", 1)])
            .await
            .unwrap();

        let results = store.search_with("rust ownership rules", 2, 0.3).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk.chunk_id, 0);
        assert!(results[0].score > 0.99);
    }

    #[tokio::test]
    async fn threshold_filters_unrelated_chunks() {
        let store = DocumentStore::new(RetrievalConfig::new().dimension(64));
        store.add(vec![chunk("completely unrelated text", 0)]).await.unwrap();

        // Pseudo-embeddings of unrelated strings are near-orthogonal,
        // far below the 0.9 cutoff used here.
        let results = store.search_with("quarterly revenue table", 1, 0.9).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn empty_text_chunks_are_skipped() {
        let store = DocumentStore::new(RetrievalConfig::new().dimension(32));
        let added = store.add(vec![chunk("", 0), chunk("real text", 1)]).await.unwrap();
        assert_eq!(added, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn clear_empties_store() {
        let store = DocumentStore::new(RetrievalConfig::new().dimension(32));
        store.add(vec![chunk("text", 0)]).await.unwrap();
        store.clear();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn failed_embeddings_drop_only_their_chunk() {
        struct FlakyEmbedder;
        #[async_trait::async_trait]
        impl Embedder for FlakyEmbedder {
            async fn embed(&self, text: &str) -> Result<Vec<f32>> {
                if text.contains("bad") {
                    Err(MimirError::EmbeddingFailed("flaky".into()))
                } else {
                    Ok(pseudo_embedding(text, 32))
                }
            }
        }

        let store = DocumentStore::new(RetrievalConfig::new().dimension(32))
            .with_embedder(Arc::new(FlakyEmbedder));
        let added = store
            .add(vec![chunk("good one", 0), chunk("bad one", 1), chunk("good two", 2)])
            .await
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(store.len(), 2);
    }
}
