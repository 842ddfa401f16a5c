//! Content-safety guardrails
//!
//! Pure classification of content as safe or blocked. No I/O, no state:
//! identical inputs always yield identical verdicts, which keeps this the
//! most exhaustively table-testable unit in the crate.

use crate::config::{GuardrailConfig, RiskLevel};
use crate::types::GuardrailVerdict;

/// Pressure-selling phrases checked only at the conservative risk level.
const CONSERVATIVE_PATTERNS: &[&str] = &["urgent", "act now", "limited time", "last chance"];

/// Guardrail engine for a fixed banned-term configuration.
pub struct Guardrail {
    banned_words: Vec<String>,
    banned_tags: Vec<String>,
    risk_level: RiskLevel,
}

impl Guardrail {
    pub fn new(config: &GuardrailConfig) -> Self {
        Self {
            banned_words: config
                .banned_words
                .iter()
                .map(|w| w.to_lowercase())
                .collect(),
            banned_tags: config.banned_tags.iter().map(|t| t.to_lowercase()).collect(),
            risk_level: config.risk_level,
        }
    }

    /// Classify content. First match wins; scanning order is banned words,
    /// then banned tags, then (conservative only) pressure patterns.
    pub fn evaluate(&self, title: &str, body: &str) -> GuardrailVerdict {
        let haystack = format!("{} {}", title, body).to_lowercase();

        for word in &self.banned_words {
            if !word.is_empty() && haystack.contains(word.as_str()) {
                return GuardrailVerdict::blocked(
                    format!("contains banned word: '{}'", word),
                    word.clone(),
                );
            }
        }

        for tag in &self.banned_tags {
            if !tag.is_empty() && haystack.contains(tag.as_str()) {
                return GuardrailVerdict::blocked(
                    format!("contains banned tag: '{}'", tag),
                    tag.clone(),
                );
            }
        }

        if self.risk_level == RiskLevel::Conservative {
            for pattern in CONSERVATIVE_PATTERNS {
                if haystack.contains(pattern) {
                    return GuardrailVerdict::blocked(
                        format!("contains high-pressure phrase: '{}'", pattern),
                        (*pattern).to_string(),
                    );
                }
            }
        }

        GuardrailVerdict::clean()
    }
}
