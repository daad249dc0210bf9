//! Pattern-based guardrails around the inference primitive.
//!
//! Two stateless entry points wrap every generation:
//!
//! - [`Guardrail::screen_input`] — a regex battery over the incoming
//!   prompt for prompt-injection idioms (instruction overrides,
//!   developer-mode invocations, jailbreak handles). One positive match
//!   blocks the request before it touches the cache or the batcher.
//! - [`Guardrail::screen_output`] — ordered checks over the generated
//!   text: XSS vectors, PII (masked in place or blocked), leaked
//!   secrets (always blocked), keyword-weighted toxicity, hallucination
//!   cues, and an aggregate confidence score. See [`output`].
//!
//! Both are pure text transforms; neither mutates caller state. Screens
//! map to the OWASP ASVS requirements they enforce (`V5.3.1` input
//! handling, `V14.4.1` sensitive-data leakage).

mod output;

pub use output::OutputReport;

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::telemetry;
use crate::{MimirError, Result};

/// ASVS tag for injection/output-encoding screens.
pub(crate) const ASVS_INJECTION: &str = "V5.3.1";
/// ASVS tag for PII/secrets leakage screens.
pub(crate) const ASVS_LEAKAGE: &str = "V14.4.1";

static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)ignore\s+(all\s+)?previous\s+instructions?",
        r"(?i)ignore\s+(all\s+)?above",
        r"(?i)disregard\s+(all\s+)?previous",
        r"(?i)forget\s+(all\s+)?previous",
        r"(?i)new\s+instructions?:",
        r"(?i)system\s*:\s*you\s+are",
        r"(?i)you\s+are\s+now\s+(a\s+)?DAN",
        r"(?i)developer\s+mode",
        r"(?i)jailbreak",
        r"(?i)chatgpt\s+with\s+developer\s+mode",
        r"(?i)reveal\s+(your\s+)?system\s+prompt",
        r"(?i)what\s+(are|is)\s+your\s+(initial\s+)?instructions?",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

/// Guardrail configuration.
#[derive(Debug, Clone)]
pub struct GuardrailConfig {
    /// Toxicity score at or above which strict mode blocks. Default: 0.7.
    pub toxicity_threshold: f32,
    /// Hallucination score at or above which a warning is attached.
    /// Default: 0.8.
    pub hallucination_threshold: f32,
    /// Block on suspicious output instead of warn-only. Default: true.
    pub strict_mode: bool,
    /// Mask detected PII in place instead of blocking. Default: true.
    pub mask_pii: bool,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            toxicity_threshold: 0.7,
            hallucination_threshold: 0.8,
            strict_mode: true,
            mask_pii: true,
        }
    }
}

impl GuardrailConfig {
    /// Create a config with the defaults above.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the toxicity blocking threshold.
    pub fn toxicity_threshold(mut self, t: f32) -> Self {
        self.toxicity_threshold = t;
        self
    }

    /// Set the hallucination warning threshold.
    pub fn hallucination_threshold(mut self, t: f32) -> Self {
        self.hallucination_threshold = t;
        self
    }

    /// Enable or disable strict (blocking) mode.
    pub fn strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    /// Mask PII instead of blocking on it.
    pub fn mask_pii(mut self, mask: bool) -> Self {
        self.mask_pii = mask;
        self
    }
}

/// Stateless guardrail filter with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct Guardrail {
    config: GuardrailConfig,
}

impl Guardrail {
    /// Create a guardrail with the given configuration.
    pub fn new(config: GuardrailConfig) -> Self {
        Self { config }
    }

    pub(crate) fn config(&self) -> &GuardrailConfig {
        &self.config
    }

    /// Screen an incoming prompt for injection idioms.
    ///
    /// A single pattern match blocks the request; the error carries the
    /// matched rule sources and the ASVS tag.
    pub fn screen_input(&self, prompt: &str) -> Result<()> {
        let matched: Vec<String> = INJECTION_PATTERNS
            .iter()
            .filter(|re| re.is_match(prompt))
            .map(|re| re.as_str().to_string())
            .collect();
        if matched.is_empty() {
            return Ok(());
        }
        warn!(patterns = matched.len(), "prompt injection blocked");
        metrics::counter!(telemetry::GUARDRAIL_BLOCKS_TOTAL, "threat" => "prompt_injection")
            .increment(1);
        Err(MimirError::GuardrailBlocked {
            threat: "prompt_injection".into(),
            patterns: matched,
            asvs: vec![ASVS_INJECTION.into()],
        })
    }

    /// Screen a generated response. See [`OutputReport`].
    pub fn screen_output(
        &self,
        prompt: &str,
        response: &str,
        context: Option<&[String]>,
    ) -> OutputReport {
        output::screen(self, prompt, response, context)
    }
}
