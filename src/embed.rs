//! Embedding seam shared by the semantic cache and the retrieval store.
//!
//! Both subsystems consume text embeddings through the [`Embedder`]
//! trait so they can share a single handle onto the inference
//! primitive's embedding side-call. When no embedder is configured,
//! [`pseudo_embedding`] provides a deterministic hash-seeded fallback:
//! identical prompts still collide at similarity 1.0, preserving the
//! exact-match behaviour of the cache without a real model.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use crate::Result;

/// Text-to-vector embedding source.
///
/// Implemented by the shared inference handle; also implementable by
/// tests with a canned function.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text into a dense f32 vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// SHA-256 of `text`, truncated to the first 16 hex characters.
///
/// Used as the cache entry key for exact invalidation and as the seed
/// source for [`pseudo_embedding`].
pub fn prompt_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// Deterministic pseudo-embedding derived from the text's SHA-256.
///
/// Seeds a `StdRng` from the first 8 digest bytes and samples `dim`
/// uniform values in [-1, 1). Not semantically meaningful — it exists
/// so that equal texts map to equal vectors (cosine similarity 1.0)
/// when no real embedder is available.
pub fn pseudo_embedding(text: &str, dim: usize) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    let mut seed_bytes = [0u8; 8];
    seed_bytes.copy_from_slice(&digest[..8]);
    let mut rng = StdRng::seed_from_u64(u64::from_be_bytes(seed_bytes));
    (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

/// L2 norm of a vector, in f32 throughout.
pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Dot product of two equal-length slices.
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_hash_is_16_hex() {
        let h = prompt_hash("What is ML?");
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn prompt_hash_deterministic() {
        assert_eq!(prompt_hash("hello"), prompt_hash("hello"));
        assert_ne!(prompt_hash("hello"), prompt_hash("world"));
    }

    #[test]
    fn pseudo_embedding_deterministic() {
        let a = pseudo_embedding("same prompt", 64);
        let b = pseudo_embedding("same prompt", 64);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn pseudo_embedding_differs_on_text() {
        let a = pseudo_embedding("prompt a", 64);
        let b = pseudo_embedding("prompt b", 64);
        assert_ne!(a, b);
    }

    #[test]
    fn pseudo_embedding_nonzero_norm() {
        let v = pseudo_embedding("anything", 32);
        assert!(l2_norm(&v) > 1e-8);
    }
}
