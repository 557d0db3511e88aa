//! Guardrail validation of draft answers
//!
//! Structural, domain-aware checks on generator output: citation markers in
//! the configured format, non-empty text, length ceiling. A violation asks
//! the orchestrator for a bounded regeneration with an explicit fix
//! instruction; it never fails the request by itself.

use crate::domain::{Citation, Domain, Draft};
use deskwise_common::config::GuardrailConfig;
use tracing::warn;

/// One failed rule with the instruction a regeneration should follow
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// Stable rule name, recorded on the workflow state
    pub rule: String,

    /// Instruction handed to the generator on retry
    pub fix_instruction: String,
}

/// Domain-aware structural validator
pub struct GuardrailValidator {
    config: GuardrailConfig,
    citation_pattern: regex_lite::Regex,
}

impl GuardrailValidator {
    pub fn new(config: GuardrailConfig) -> Self {
        let citation_pattern = regex_lite::Regex::new(&config.citation_pattern)
            .unwrap_or_else(|e| {
                warn!(
                    pattern = %config.citation_pattern,
                    error = %e,
                    "Invalid citation pattern in config, using default"
                );
                regex_lite::Regex::new(r"\[(\d+)\]").expect("default marker pattern")
            });

        Self {
            config,
            citation_pattern,
        }
    }

    /// Check a draft; an empty result means the draft passes.
    pub fn validate(&self, draft: &Draft, domain: Domain, citations: &[Citation]) -> Vec<Violation> {
        let mut violations = Vec::new();

        if draft.text.trim().is_empty() {
            violations.push(Violation {
                rule: "non_empty_answer".to_string(),
                fix_instruction: "produce a non-empty answer".to_string(),
            });
            // Nothing else to check on an empty draft
            return violations;
        }

        let exempt = self
            .config
            .exempt_domains
            .iter()
            .any(|d| d == domain.as_str());

        // The citation rule only applies when there is evidence to cite
        if self.config.require_citation
            && !exempt
            && !citations.is_empty()
            && !self.citation_pattern.is_match(&draft.text)
        {
            violations.push(Violation {
                rule: "citation_marker_required".to_string(),
                fix_instruction: format!(
                    "reference at least one of the {} provided sources inline using \
                    markers like [1]",
                    citations.len()
                ),
            });
        }

        if draft.text.chars().count() > self.config.max_answer_chars {
            violations.push(Violation {
                rule: "answer_too_long".to_string(),
                fix_instruction: format!(
                    "shorten the answer to at most {} characters",
                    self.config.max_answer_chars
                ),
            });
        }

        violations
    }
}
