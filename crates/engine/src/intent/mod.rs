//! Intent classification
//!
//! Maps a query to a knowledge domain. A fast keyword pass against the
//! configured per-domain vocabularies handles the common case; queries the
//! keywords cannot place confidently fall back to a single constrained
//! model call. Always returns exactly one domain; anything unresolvable
//! lands in `Domain::General`.

use crate::domain::Domain;
use deskwise_common::config::IntentConfig;
use deskwise_common::llm::LanguageModel;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Keyword-first classifier with model fallback
pub struct IntentClassifier {
    llm: Arc<dyn LanguageModel>,
    config: IntentConfig,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LanguageModel>, config: IntentConfig) -> Self {
        Self { llm, config }
    }

    /// Classify a query into a domain. Total: never fails.
    pub async fn classify(&self, query_text: &str) -> Domain {
        if let Some(domain) = self.classify_lexical(query_text) {
            debug!(domain = %domain, "Intent classified lexically");
            return domain;
        }

        let domain = self.classify_with_model(query_text).await;
        debug!(domain = %domain, "Intent classified via model fallback");
        domain
    }

    /// Keyword pass; None when no unique domain clears the threshold
    fn classify_lexical(&self, query_text: &str) -> Option<Domain> {
        let tokens = query_tokens(query_text);
        if tokens.is_empty() {
            return None;
        }

        let mut best: Option<(Domain, usize)> = None;
        let mut tied = false;

        for domain in [Domain::Hr, Domain::It, Domain::Finance] {
            let Some(keywords) = self.config.keywords.get(domain.as_str()) else {
                continue;
            };
            let hits = keywords
                .iter()
                .filter(|keyword| tokens.contains(&keyword.to_lowercase()))
                .count();

            match best {
                Some((_, best_hits)) if hits == best_hits && hits > 0 => tied = true,
                Some((_, best_hits)) if hits > best_hits => {
                    best = Some((domain, hits));
                    tied = false;
                }
                None => best = Some((domain, hits)),
                _ => {}
            }
        }

        let (domain, hits) = best?;
        if hits == 0 || tied {
            return None;
        }

        let confidence = hits as f32 / tokens.len() as f32;
        if confidence >= self.config.confidence_threshold {
            Some(domain)
        } else {
            None
        }
    }

    /// Single constrained model call; unparseable output means General
    async fn classify_with_model(&self, query_text: &str) -> Domain {
        let prompt = format!(
            "Classify the following employee question into a support domain. \
            Respond with exactly one of: hr, it, finance, general.\n\n\
            Question: {}\n\nDomain:",
            query_text
        );

        match self.llm.complete(&prompt, 0.0, 8).await {
            Ok(reply) => {
                let name = reply
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .trim_matches(|c: char| !c.is_alphanumeric());
                Domain::parse(name).unwrap_or(Domain::General)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Model classification failed, using general");
                Domain::General
            }
        }
    }
}

/// Lowercased alphanumeric query tokens
fn query_tokens(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|token| !token.is_empty())
        .collect()
}
