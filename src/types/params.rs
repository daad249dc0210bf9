//! Generation parameters and the batcher's grouping key.

use serde::{Deserialize, Serialize};

/// Sampling parameters for a single generation request.
///
/// Also the grouping key inside the continuous batcher: two requests
/// land in the same partition iff their tuples are exactly equal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Maximum number of tokens to generate.
    pub max_tokens: usize,

    /// Sampling temperature.
    pub temperature: f32,

    /// Nucleus sampling threshold.
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

impl GenerationParams {
    /// Create params with default sampling settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max tokens.
    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set top_p.
    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    /// Exact-equality grouping key.
    ///
    /// Float fields compare by bit pattern so the key is `Eq + Hash`
    /// without inventing a tolerance; partitioning is exact on the
    /// tuple.
    pub fn key(&self) -> ParamsKey {
        ParamsKey {
            max_tokens: self.max_tokens,
            temperature_bits: self.temperature.to_bits(),
            top_p_bits: self.top_p.to_bits(),
        }
    }
}

/// Bit-exact partition key derived from [`GenerationParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamsKey {
    max_tokens: usize,
    temperature_bits: u32,
    top_p_bits: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_params_share_a_key() {
        let a = GenerationParams::new().max_tokens(128).temperature(0.7);
        let b = GenerationParams::new().max_tokens(128).temperature(0.7);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn differing_temperature_splits_keys() {
        let a = GenerationParams::new().temperature(0.7);
        let b = GenerationParams::new().temperature(0.8);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn differing_max_tokens_splits_keys() {
        let a = GenerationParams::new().max_tokens(64);
        let b = GenerationParams::new().max_tokens(128);
        assert_ne!(a.key(), b.key());
    }
}
