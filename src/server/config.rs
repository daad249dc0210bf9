//! Configuration loading for mimird.
//!
//! Configuration is loaded from a TOML file passed via `--config`;
//! every section and field falls back to the documented default, so an
//! absent file yields a fully usable demo configuration.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batcher::BatcherConfig;
use crate::cache::CacheConfig;
use crate::guardrail::GuardrailConfig;
use crate::retrieval::RetrievalConfig;
use crate::{MimirError, Result};

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheTomlConfig,
    #[serde(default)]
    pub batcher: BatcherTomlConfig,
    #[serde(default)]
    pub retrieval: RetrievalTomlConfig,
    #[serde(default)]
    pub guardrail: GuardrailTomlConfig,
}

impl Config {
    /// Load from `path`, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .map_err(|e| MimirError::Configuration(format!("{}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| MimirError::Configuration(format!("{}: {e}", path.display())))
    }
}

/// Server network configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1:8390).
    #[serde(default = "default_address")]
    pub address: String,
    /// Static bearer token required on API routes. `None` disables
    /// authentication (credential issuance is an external concern).
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Hard cap applied to requested `max_tokens` (default: 256).
    #[serde(default = "default_max_tokens_cap")]
    pub max_tokens_cap: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            auth_token: None,
            max_tokens_cap: default_max_tokens_cap(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:8390".to_string()
}

fn default_max_tokens_cap() -> usize {
    256
}

/// Semantic cache configuration (TOML section).
///
/// ```toml
/// [cache]
/// dimension = 768
/// max_entries = 10000
/// similarity_threshold = 0.95
/// hit_protection_seconds = 3600
/// snapshot_dir = "data/cache"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CacheTomlConfig {
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_hit_protection")]
    pub hit_protection_seconds: u64,
    /// Directory for best-effort snapshots. `None` disables them.
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for CacheTomlConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            max_entries: default_max_entries(),
            similarity_threshold: default_similarity_threshold(),
            hit_protection_seconds: default_hit_protection(),
            snapshot_dir: None,
        }
    }
}

fn default_dimension() -> usize {
    768
}

fn default_max_entries() -> usize {
    10_000
}

fn default_similarity_threshold() -> f32 {
    0.95
}

fn default_hit_protection() -> u64 {
    3_600
}

impl From<&CacheTomlConfig> for CacheConfig {
    fn from(toml: &CacheTomlConfig) -> Self {
        CacheConfig::new()
            .dimension(toml.dimension)
            .max_entries(toml.max_entries)
            .similarity_threshold(toml.similarity_threshold)
            .hit_protection_seconds(toml.hit_protection_seconds)
    }
}

/// Continuous batcher configuration (TOML section).
#[derive(Debug, Clone, Deserialize)]
pub struct BatcherTomlConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_request_timeout_s")]
    pub request_timeout_s: u64,
}

impl Default for BatcherTomlConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            window_ms: default_window_ms(),
            request_timeout_s: default_request_timeout_s(),
        }
    }
}

fn default_max_batch_size() -> usize {
    4
}

fn default_window_ms() -> u64 {
    100
}

fn default_request_timeout_s() -> u64 {
    30
}

impl From<&BatcherTomlConfig> for BatcherConfig {
    fn from(toml: &BatcherTomlConfig) -> Self {
        BatcherConfig::new()
            .max_batch_size(toml.max_batch_size)
            .window(Duration::from_millis(toml.window_ms))
            .request_timeout(Duration::from_secs(toml.request_timeout_s))
    }
}

/// Retrieval store configuration (TOML section).
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalTomlConfig {
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_retrieval_threshold")]
    pub threshold: f32,
    /// Base path for the persisted `{.json, .vec}` pair.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
}

impl Default for RetrievalTomlConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            top_k: default_top_k(),
            threshold: default_retrieval_threshold(),
            storage_path: None,
        }
    }
}

fn default_top_k() -> usize {
    2
}

fn default_retrieval_threshold() -> f32 {
    0.3
}

impl From<&RetrievalTomlConfig> for RetrievalConfig {
    fn from(toml: &RetrievalTomlConfig) -> Self {
        let mut config = RetrievalConfig::new()
            .dimension(toml.dimension)
            .top_k(toml.top_k)
            .threshold(toml.threshold);
        if let Some(path) = &toml.storage_path {
            config = config.storage_path(path.clone());
        }
        config
    }
}

/// Guardrail configuration (TOML section).
#[derive(Debug, Clone, Deserialize)]
pub struct GuardrailTomlConfig {
    #[serde(default = "default_true")]
    pub strict_mode: bool,
    #[serde(default = "default_true")]
    pub mask_pii: bool,
    #[serde(default = "default_toxicity_threshold")]
    pub toxicity_threshold: f32,
    #[serde(default = "default_hallucination_threshold")]
    pub hallucination_threshold: f32,
}

impl Default for GuardrailTomlConfig {
    fn default() -> Self {
        Self {
            strict_mode: true,
            mask_pii: true,
            toxicity_threshold: default_toxicity_threshold(),
            hallucination_threshold: default_hallucination_threshold(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_toxicity_threshold() -> f32 {
    0.7
}

fn default_hallucination_threshold() -> f32 {
    0.8
}

impl From<&GuardrailTomlConfig> for GuardrailConfig {
    fn from(toml: &GuardrailTomlConfig) -> Self {
        GuardrailConfig::new()
            .strict_mode(toml.strict_mode)
            .mask_pii(toml.mask_pii)
            .toxicity_threshold(toml.toxicity_threshold)
            .hallucination_threshold(toml.hallucination_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.cache.dimension, 768);
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.cache.similarity_threshold, 0.95);
        assert_eq!(config.batcher.max_batch_size, 4);
        assert_eq!(config.batcher.window_ms, 100);
        assert_eq!(config.batcher.request_timeout_s, 30);
        assert_eq!(config.retrieval.top_k, 2);
        assert_eq!(config.retrieval.threshold, 0.3);
        assert!(config.guardrail.strict_mode);
        assert!(config.guardrail.mask_pii);
        assert_eq!(config.server.max_tokens_cap, 256);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [cache]
            max_entries = 50

            [batcher]
            window_ms = 10
            "#,
        )
        .unwrap();
        assert_eq!(parsed.cache.max_entries, 50);
        assert_eq!(parsed.cache.dimension, 768);
        assert_eq!(parsed.batcher.window_ms, 10);
        assert_eq!(parsed.batcher.max_batch_size, 4);
    }
}
