//! Telemetry metric name constants.
//!
//! Centralised metric names for mimir operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `mimir_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `operation` — subsystem operation (e.g. "lookup", "generate")
//! - `status` — outcome: "ok" or "error"
//! - `threat` — guardrail block category (e.g. "prompt_injection")

/// Total generate requests handled by the cached engine.
///
/// Labels: `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "mimir_requests_total";

/// Total semantic cache hits.
///
/// Labels: `operation` ("lookup" | "exact").
pub const CACHE_HITS_TOTAL: &str = "mimir_cache_hits_total";

/// Total semantic cache misses.
pub const CACHE_MISSES_TOTAL: &str = "mimir_cache_misses_total";

/// Total cache evictions (hit-weighted recency policy).
pub const CACHE_EVICTIONS_TOTAL: &str = "mimir_cache_evictions_total";

/// Total requests enqueued into the continuous batcher.
pub const BATCH_REQUESTS_TOTAL: &str = "mimir_batch_requests_total";

/// Total batches dispatched by the scheduler.
pub const BATCHES_TOTAL: &str = "mimir_batches_total";

/// Batch processing duration in seconds.
pub const BATCH_DURATION_SECONDS: &str = "mimir_batch_duration_seconds";

/// Total requests blocked by a guardrail screen.
///
/// Labels: `threat`.
pub const GUARDRAIL_BLOCKS_TOTAL: &str = "mimir_guardrail_blocks_total";

/// Total retrieval searches that augmented a prompt.
pub const RETRIEVAL_AUGMENTED_TOTAL: &str = "mimir_retrieval_augmented_total";
