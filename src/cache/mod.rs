//! SoA semantic response cache.
//!
//! Embeddings live in one dense `dim × max_entries` f32 matrix laid out
//! column-major: slot `i`'s embedding is the contiguous column
//! `matrix[i*dim .. (i+1)*dim]`, so a similarity lookup is a sequential
//! matrix–vector sweep over the active prefix. Per-column L2 norms are
//! precomputed at insert time; entry metadata (hash, preview, response,
//! timestamps) is stored separately in a parallel slot vector.
//!
//! # Hit criteria
//!
//! A lookup embeds the query once, computes clamped cosine similarity
//! against every active column, and returns the stored response iff the
//! best score reaches the configured threshold. The best score is
//! reported even on a miss so callers can log near-misses. A degenerate
//! query embedding (norm below `1e-8`) scores 0 everywhere and can
//! never hit; degenerate columns likewise never match.
//!
//! # Exact-match shortcut
//!
//! A bounded [`moka`] map from truncated prompt hash to slot index sits
//! in front of the embedding step. It is purely an optimization: every
//! shortcut hit is verified against the slot metadata before use, and
//! the embedding path would find the same entry at similarity 1.0.
//!
//! # Eviction
//!
//! Hit-weighted recency: the victim minimizes
//! `created_at + hit_count · H` (ties to the lowest index), so an old
//! entry that keeps getting served outlives a fresh entry nobody asks
//! for again. Deterministic given the same state.

pub mod snapshot;

pub use snapshot::{FsSnapshotStore, MemorySnapshotStore, SnapshotStore};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embed::{Embedder, dot, l2_norm, prompt_hash, pseudo_embedding};
use crate::telemetry;
use crate::{MimirError, Result};

/// Norms at or below this floor are degenerate and never match.
const NORM_FLOOR: f32 = 1e-8;

/// Bytes of the original prompt kept as a debugging preview.
const PREVIEW_BYTES: usize = 200;

/// Configuration for the semantic cache.
///
/// ```rust
/// # use mimir::cache::CacheConfig;
/// let config = CacheConfig::new()
///     .dimension(384)
///     .max_entries(1_000)
///     .similarity_threshold(0.9);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Embedding dimension. Default: 768.
    pub dimension: usize,
    /// Maximum number of cached entries before eviction. Default: 10,000.
    pub max_entries: usize,
    /// Cosine similarity threshold for a hit. Default: 0.95.
    pub similarity_threshold: f32,
    /// Eviction protection per hit, in seconds. Default: 3600.
    pub hit_protection_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dimension: 768,
            max_entries: 10_000,
            similarity_threshold: 0.95,
            hit_protection_seconds: 3_600,
        }
    }
}

impl CacheConfig {
    /// Create a config with the defaults above.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the embedding dimension.
    pub fn dimension(mut self, dim: usize) -> Self {
        self.dimension = dim;
        self
    }

    /// Set the maximum entry count.
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the cosine similarity hit threshold.
    pub fn similarity_threshold(mut self, t: f32) -> Self {
        self.similarity_threshold = t;
        self
    }

    /// Set the per-hit eviction protection in seconds.
    pub fn hit_protection_seconds(mut self, secs: u64) -> Self {
        self.hit_protection_seconds = secs;
        self
    }
}

/// Metadata for one cached response, stored apart from its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// 16-hex truncated SHA-256 of the full original prompt.
    pub prompt_hash: String,
    /// First 200 bytes of the prompt. Debugging and eviction heuristics
    /// only — never consulted for matching.
    pub prompt_preview: String,
    /// Cached response text.
    pub response: String,
    /// Seconds since the epoch at insert time.
    pub created_at: f64,
    /// Times this entry has been served.
    pub hit_count: u64,
}

/// Cache statistics, as reported by `/api/model/info`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub dimension: usize,
    pub max_entries: usize,
    pub current_entries: usize,
    pub similarity_threshold: f32,
    pub total_hits: u64,
    pub total_misses: u64,
    pub hit_rate_pct: f64,
    pub embedding_memory_mb: f64,
}

struct CacheState {
    /// Column-major `dimension × max_entries` embedding matrix.
    matrix: Vec<f32>,
    /// Precomputed L2 norm of each column.
    norms: Vec<f32>,
    /// Slot metadata; `Some` exactly for slots below `n_entries`.
    entries: Vec<Option<CacheEntry>>,
    n_entries: usize,
}

impl CacheState {
    fn new(config: &CacheConfig) -> Self {
        Self {
            matrix: vec![0.0; config.dimension * config.max_entries],
            norms: vec![0.0; config.max_entries],
            entries: (0..config.max_entries).map(|_| None).collect(),
            n_entries: 0,
        }
    }

    fn column(&self, dim: usize, i: usize) -> &[f32] {
        &self.matrix[i * dim..(i + 1) * dim]
    }

    fn write_column(&mut self, dim: usize, i: usize, embedding: &[f32]) {
        self.matrix[i * dim..(i + 1) * dim].copy_from_slice(embedding);
        self.norms[i] = l2_norm(embedding);
    }
}

/// Semantic response cache with SoA embedding storage.
pub struct SemanticCache {
    config: CacheConfig,
    state: RwLock<CacheState>,
    embedder: Option<Arc<dyn Embedder>>,
    snapshot: Option<Arc<dyn SnapshotStore>>,
    /// Exact-hash shortcut: prompt hash → slot index, verified on use.
    exact: moka::sync::Cache<String, usize>,
    total_hits: AtomicU64,
    total_misses: AtomicU64,
}

impl SemanticCache {
    /// Create an empty cache. Without an embedder, queries fall back to
    /// the deterministic hash-seeded pseudo-embedding.
    pub fn new(config: CacheConfig) -> Self {
        let exact = moka::sync::Cache::new(config.max_entries as u64);
        let state = CacheState::new(&config);
        Self {
            config,
            state: RwLock::new(state),
            embedder: None,
            snapshot: None,
            exact,
            total_hits: AtomicU64::new(0),
            total_misses: AtomicU64::new(0),
        }
    }

    /// Attach a real embedding source.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Attach a snapshot store and attempt a restore from it.
    ///
    /// A partial or mis-shaped snapshot leaves the cache empty.
    pub fn with_snapshot(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot = Some(store);
        if let Err(e) = self.try_restore() {
            warn!(error = %e, "cache snapshot restore failed, starting empty");
            self.reset_state();
        }
        self
    }

    /// Number of active entries.
    pub fn len(&self) -> usize {
        self.state.read().expect("cache lock poisoned").n_entries
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn query_embedding(&self, prompt: &str) -> Result<Vec<f32>> {
        let embedding = match &self.embedder {
            Some(embedder) => embedder.embed(prompt).await?,
            None => pseudo_embedding(prompt, self.config.dimension),
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

    /// Look up a semantically similar cached response.
    ///
    /// Returns the stored response iff the best cosine similarity
    /// reaches the threshold, plus the best similarity itself (reported
    /// on misses too). An embedding failure degrades to a plain miss.
    pub async fn lookup(&self, prompt: &str) -> (Option<String>, f32) {
        if self.is_empty() {
            self.record_miss();
            return (None, 0.0);
        }

        // Exact-hash shortcut before paying for an embedding.
        let hash = prompt_hash(prompt);
        if let Some(idx) = self.exact.get(&hash) {
            if let Some(response) = self.serve_slot(idx, &hash) {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "operation" => "exact")
                    .increment(1);
                self.total_hits.fetch_add(1, Ordering::Relaxed);
                return (Some(response), 1.0);
            }
            // Stale mapping; fall through to the similarity sweep.
            self.exact.invalidate(&hash);
        }

        let query = match self.query_embedding(prompt).await {
            Ok(q) => q,
            Err(e) => {
                warn!(error = %e, "query embedding failed, treating as miss");
                self.record_miss();
                return (None, 0.0);
            }
        };

        let (best_idx, best_sim, best_hash, response) = {
            let state = self.state.read().expect("cache lock poisoned");
            match self.best_match(&state, &query) {
                Some((idx, sim)) => {
                    let entry = state.entries[idx].as_ref().expect("active slot has entry");
                    (idx, sim, entry.prompt_hash.clone(), entry.response.clone())
                }
                None => {
                    drop(state);
                    self.record_miss();
                    return (None, 0.0);
                }
            }
        };

        if best_sim >= self.config.similarity_threshold {
            // Bump the hit count, re-verifying the slot in case a
            // concurrent invalidation moved entries around.
            self.bump_hit(best_idx, &best_hash);
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "operation" => "lookup").increment(1);
            self.total_hits.fetch_add(1, Ordering::Relaxed);
            debug!(similarity = best_sim, "semantic cache hit");
            (Some(response), best_sim)
        } else {
            self.record_miss();
            (None, best_sim)
        }
    }

    /// Cosine similarity argmax over the active prefix.
    ///
    /// Returns `None` when nothing is cached or the query is degenerate.
    fn best_match(&self, state: &CacheState, query: &[f32]) -> Option<(usize, f32)> {
        if state.n_entries == 0 {
            return None;
        }
        let query_norm = l2_norm(query);
        if query_norm <= NORM_FLOOR {
            // Degenerate query: every similarity is 0, never a hit.
            return None;
        }

        let dim = self.config.dimension;
        let mut best_idx = 0usize;
        let mut best_sim = f32::NEG_INFINITY;
        for i in 0..state.n_entries {
            let sim = if state.norms[i] > NORM_FLOOR {
                let d = dot(query, state.column(dim, i));
                (d / (query_norm * state.norms[i])).clamp(0.0, 1.0)
            } else {
                0.0
            };
            if sim > best_sim {
                best_sim = sim;
                best_idx = i;
            }
        }
        Some((best_idx, best_sim))
    }

    /// Serve a response directly from a slot if its hash still matches.
    fn serve_slot(&self, idx: usize, hash: &str) -> Option<String> {
        let mut state = self.state.write().expect("cache lock poisoned");
        if idx >= state.n_entries {
            return None;
        }
        let entry = state.entries[idx].as_mut()?;
        if entry.prompt_hash != hash {
            return None;
        }
        entry.hit_count += 1;
        Some(entry.response.clone())
    }

    fn bump_hit(&self, idx: usize, hash: &str) {
        let mut state = self.state.write().expect("cache lock poisoned");
        if idx < state.n_entries {
            if let Some(entry) = state.entries[idx].as_mut() {
                if entry.prompt_hash == hash {
                    entry.hit_count += 1;
                }
            }
        }
    }

    fn record_miss(&self) {
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
        self.total_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Insert a prompt/response pair, returning the slot index used.
    ///
    /// Re-inserting a prompt that is already cached overwrites its slot
    /// in place (last writer wins). When the cache is full, the
    /// hit-weighted recency victim is evicted first.
    pub async fn insert(&self, prompt: &str, response: &str) -> Result<usize> {
        let embedding = self.query_embedding(prompt).await?;
        let hash = prompt_hash(prompt);

        let (idx, snapshot_data) = {
            let mut state = self.state.write().expect("cache lock poisoned");

            let idx = if let Some(existing) = self.slot_for_hash(&state, &hash) {
                existing
            } else if state.n_entries >= self.config.max_entries {
                let victim = eviction_candidate(&state, self.config.hit_protection_seconds);
                if let Some(old) = state.entries[victim].as_ref() {
                    self.exact.invalidate(&old.prompt_hash);
                }
                metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL).increment(1);
                victim
            } else {
                let next = state.n_entries;
                state.n_entries += 1;
                next
            };

            state.write_column(self.config.dimension, idx, &embedding);
            let entry = CacheEntry {
                prompt_hash: hash.clone(),
                prompt_preview: byte_preview(prompt, PREVIEW_BYTES),
                response: response.to_string(),
                created_at: now_secs(),
                hit_count: 0,
            };
            state.entries[idx] = Some(entry.clone());
            self.exact.insert(hash, idx);

            let snapshot_data = self.snapshot.as_ref().map(|_| {
                (state.n_entries, entry, snapshot::encode_matrix(&state.matrix))
            });
            (idx, snapshot_data)
        };

        debug!(idx, entries = self.len(), "semantic cache insert");

        // Best-effort snapshot outside the state lock.
        if let (Some(store), Some((count, entry, blob))) = (&self.snapshot, snapshot_data) {
            if let Err(e) = save_snapshot(store.as_ref(), count, idx, &entry, &blob) {
                warn!(error = %e, "cache snapshot write failed");
            }
        }

        Ok(idx)
    }

    fn slot_for_hash(&self, state: &CacheState, hash: &str) -> Option<usize> {
        if let Some(idx) = self.exact.get(hash) {
            if idx < state.n_entries {
                if let Some(entry) = state.entries[idx].as_ref() {
                    if entry.prompt_hash == hash {
                        return Some(idx);
                    }
                }
            }
        }
        // The shortcut map is bounded and may have dropped the mapping;
        // a linear sweep keeps slots unique per hash regardless.
        (0..state.n_entries).find(|&i| {
            state.entries[i]
                .as_ref()
                .is_some_and(|e| e.prompt_hash == hash)
        })
    }

    /// Remove the entries matching `prompt` (by hash). Returns the
    /// number of entries removed.
    pub fn invalidate(&self, prompt: &str) -> usize {
        let hash = prompt_hash(prompt);
        let mut state = self.state.write().expect("cache lock poisoned");
        let dim = self.config.dimension;
        let mut removed = 0;

        let mut i = 0;
        while i < state.n_entries {
            let matches = state.entries[i]
                .as_ref()
                .is_some_and(|e| e.prompt_hash == hash);
            if !matches {
                i += 1;
                continue;
            }

            self.exact.invalidate(&hash);
            let last = state.n_entries - 1;
            if i != last {
                // Fill the hole with the last active slot so the active
                // prefix stays dense.
                let moved = state.entries[last].take().expect("active slot has entry");
                let moved_col = state.column(dim, last).to_vec();
                self.exact.insert(moved.prompt_hash.clone(), i);
                state.write_column(dim, i, &moved_col);
                state.entries[i] = Some(moved);
            } else {
                state.entries[i] = None;
            }
            state.norms[last] = 0.0;
            state.n_entries -= 1;
            removed += 1;
            // Re-examine slot i: it now holds the moved entry.
        }

        removed
    }

    /// Remove every entry. Returns the number removed.
    pub fn invalidate_all(&self) -> usize {
        let mut state = self.state.write().expect("cache lock poisoned");
        let count = state.n_entries;
        for entry in state.entries.iter_mut() {
            *entry = None;
        }
        state.norms.fill(0.0);
        state.n_entries = 0;
        self.exact.invalidate_all();
        count
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        let hits = self.total_hits.load(Ordering::Relaxed);
        let misses = self.total_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        CacheStats {
            dimension: self.config.dimension,
            max_entries: self.config.max_entries,
            current_entries: self.len(),
            similarity_threshold: self.config.similarity_threshold,
            total_hits: hits,
            total_misses: misses,
            hit_rate_pct: (hit_rate * 100.0).round() / 100.0,
            embedding_memory_mb: (self.config.dimension * self.config.max_entries * 4) as f64
                / (1024.0 * 1024.0),
        }
    }

    /// Reset hit/miss counters (used by the engine's cache clear).
    pub fn reset_counters(&self) {
        self.total_hits.store(0, Ordering::Relaxed);
        self.total_misses.store(0, Ordering::Relaxed);
    }

    fn reset_state(&mut self) {
        let state = self.state.get_mut().expect("cache lock poisoned");
        *state = CacheState::new(&self.config);
        self.exact.invalidate_all();
    }

    /// Restore count, matrix blob, and per-entry metadata, in that
    /// order of dependence. Any inconsistency aborts to empty.
    fn try_restore(&mut self) -> Result<()> {
        let store = match &self.snapshot {
            Some(s) => Arc::clone(s),
            None => return Ok(()),
        };

        let count = match store.get(snapshot::COUNT_KEY)? {
            Some(bytes) => {
                let text = String::from_utf8(bytes)
                    .map_err(|e| MimirError::SnapshotIo(e.to_string()))?;
                text.trim()
                    .parse::<usize>()
                    .map_err(|e| MimirError::SnapshotIo(e.to_string()))?
            }
            None => return Ok(()),
        };
        if count == 0 {
            return Ok(());
        }
        if count > self.config.max_entries {
            return Err(MimirError::SnapshotIo(format!(
                "snapshot count {count} exceeds max_entries {}",
                self.config.max_entries
            )));
        }

        let blob = store
            .get(snapshot::EMBEDDINGS_KEY)?
            .ok_or_else(|| MimirError::SnapshotIo("count present but blob missing".into()))?;
        let expected = self.config.dimension * self.config.max_entries;
        let matrix = snapshot::decode_matrix(&blob, expected)
            .ok_or_else(|| MimirError::SnapshotIo("embedding blob has wrong shape".into()))?;

        let mut entries: Vec<Option<CacheEntry>> =
            (0..self.config.max_entries).map(|_| None).collect();
        for i in 0..count {
            let bytes = store.get(&snapshot::entry_key(i))?.ok_or_else(|| {
                MimirError::SnapshotIo(format!("entry {i} missing from snapshot"))
            })?;
            let entry: CacheEntry = serde_json::from_slice(&bytes)?;
            entries[i] = Some(entry);
        }

        let dim = self.config.dimension;
        let mut norms = vec![0.0f32; self.config.max_entries];
        for (i, norm) in norms.iter_mut().enumerate().take(count) {
            *norm = l2_norm(&matrix[i * dim..(i + 1) * dim]);
        }

        self.exact.invalidate_all();
        for (i, entry) in entries.iter().enumerate().take(count) {
            if let Some(e) = entry {
                self.exact.insert(e.prompt_hash.clone(), i);
            }
        }

        let state = self.state.get_mut().expect("cache lock poisoned");
        *state = CacheState {
            matrix,
            norms,
            entries,
            n_entries: count,
        };
        debug!(entries = count, "cache restored from snapshot");
        Ok(())
    }
}

/// Slot minimizing `created_at + hit_count · H`, ties to lowest index.
fn eviction_candidate(state: &CacheState, hit_protection_seconds: u64) -> usize {
    let mut victim = 0usize;
    let mut victim_score = f64::INFINITY;
    for i in 0..state.n_entries {
        if let Some(entry) = state.entries[i].as_ref() {
            let score = entry.created_at + (entry.hit_count * hit_protection_seconds) as f64;
            if score < victim_score {
                victim_score = score;
                victim = i;
            }
        }
    }
    victim
}

fn save_snapshot(
    store: &dyn SnapshotStore,
    count: usize,
    idx: usize,
    entry: &CacheEntry,
    blob: &[u8],
) -> Result<()> {
    store.put(snapshot::COUNT_KEY, count.to_string().as_bytes())?;
    store.put(&snapshot::entry_key(idx), &serde_json::to_vec(entry)?)?;
    store.put(snapshot::EMBEDDINGS_KEY, blob)?;
    Ok(())
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// First `max` bytes of `s`, cut back to a char boundary.
fn byte_preview(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
