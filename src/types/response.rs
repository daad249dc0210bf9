//! Engine response types.

use serde::{Deserialize, Serialize};

/// Terminal status of a generate call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Normal completion.
    Success,
    /// The output screen rejected the generated text.
    Blocked,
    /// The inference primitive is not loaded; canned demo answer.
    Demo,
}

/// Response from the cached engine, with generation metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResponse {
    /// Sanitized response text (or the block notice when blocked).
    pub response: String,

    /// How the request terminated.
    pub status: ResponseStatus,

    /// Whether the response came from the semantic cache.
    pub cache_hit: bool,

    /// Best cosine similarity observed during cache lookup, reported on
    /// hits and misses alike so callers can log near-misses.
    pub similarity: f32,

    /// Non-fatal guardrail findings (masked PII, hallucination risk, …).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// Aggregate guardrail confidence score in [0, 1].
    pub confidence: f32,

    /// OWASP ASVS requirement tags touched by the screens.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub asvs_compliance: Vec<String>,
}

impl EngineResponse {
    /// Approximate generated token count (whitespace-delimited words).
    pub fn tokens_generated(&self) -> usize {
        self.response.split_whitespace().count()
    }

    /// Whether the output screen blocked this response.
    pub fn is_blocked(&self) -> bool {
        self.status == ResponseStatus::Blocked
    }
}

/// Events emitted during streaming generation.
///
/// Cached hits are reshaped into the same event sequence (one `Token`
/// per whitespace-delimited chunk, then `Done`) so callers have a
/// single code path for streamed and cached responses.
#[derive(Debug)]
pub enum StreamEvent {
    /// Raw text chunk, yielded as it arrives from the primitive.
    Token(String),

    /// End of stream, carrying the sanitized response and metadata
    /// produced by the post-stream filter/screen/insert steps.
    Done(Box<EngineResponse>),
}
