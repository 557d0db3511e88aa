//! Deduplication and feedback-adjusted ranking
//!
//! A pure function over the input citations plus a read-only feedback
//! snapshot: no hidden randomness, identical inputs give identical output
//! ordering. That keeps the query cache and the property tests honest.
//!
//! Dedup: two citations are duplicates when their normalized-title
//! signatures match or their token-set similarity reaches the configured
//! threshold; the higher-scored one survives.
//!
//! Ranking: `adjusted = similarity * (1 + lexical_boost) * feedback_mult`
//! where the lexical boost rewards exact-token overlap with the query
//! (codes and IDs that semantic search misses) and the feedback multiplier
//! is tiered by like-ratio.

use crate::domain::Citation;
use crate::feedback::FeedbackSnapshot;
use deskwise_common::config::RankingConfig;
use std::collections::HashSet;

/// Deduplicating, feedback-aware ranker
#[derive(Debug, Clone)]
pub struct Ranker {
    config: RankingConfig,
}

impl Ranker {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    /// Dedup, score, and order citations; truncates to `limit`
    pub fn rank(
        &self,
        query_text: &str,
        citations: Vec<Citation>,
        feedback: &FeedbackSnapshot,
        limit: usize,
    ) -> Vec<Citation> {
        let deduped = self.dedup(citations);
        let query_tokens = tokenize(query_text);

        let mut ranked: Vec<Citation> = deduped
            .into_iter()
            .map(|mut citation| {
                let boost = self.lexical_boost(&query_tokens, &citation.content);
                let multiplier = self.feedback_multiplier(feedback, &citation);
                citation.adjusted_score = citation.similarity_score * (1.0 + boost) * multiplier;
                citation
            })
            .collect();

        // chunk_id tie-break keeps the ordering total and deterministic
        ranked.sort_by(|a, b| {
            b.adjusted_score
                .partial_cmp(&a.adjusted_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        ranked.truncate(limit);

        for (index, citation) in ranked.iter_mut().enumerate() {
            citation.rank = index + 1;
        }

        ranked
    }

    /// Drop near-duplicates, keeping the higher similarity score
    fn dedup(&self, citations: Vec<Citation>) -> Vec<Citation> {
        let mut ordered = citations;
        // Process best-first so the survivor of a duplicate pair is the
        // higher-scored one
        ordered.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        let mut kept: Vec<(Citation, String, HashSet<String>)> = Vec::new();

        for citation in ordered {
            let signature = title_signature(&citation.source_title);
            let tokens = tokenize(&citation.content);

            let duplicate = kept.iter().any(|(_, kept_sig, kept_tokens)| {
                (!signature.is_empty() && *kept_sig == signature)
                    || jaccard(&tokens, kept_tokens) >= self.config.dedup_similarity_threshold
            });

            if !duplicate {
                kept.push((citation, signature, tokens));
            }
        }

        kept.into_iter().map(|(citation, _, _)| citation).collect()
    }

    /// Exact-token overlap boost in [0, max_lexical_boost]
    fn lexical_boost(&self, query_tokens: &HashSet<String>, content: &str) -> f32 {
        if query_tokens.is_empty() {
            return 0.0;
        }
        let content_tokens = tokenize(content);
        let overlap = query_tokens
            .iter()
            .filter(|t| content_tokens.contains(*t))
            .count();
        self.config.max_lexical_boost * (overlap as f32 / query_tokens.len() as f32)
    }

    /// Tiered multiplier from the citation's like-ratio
    fn feedback_multiplier(&self, feedback: &FeedbackSnapshot, citation: &Citation) -> f32 {
        match feedback.stats_for(citation.chunk_id).like_ratio() {
            Some(ratio) if ratio > self.config.like_boost_threshold => {
                self.config.boost_multiplier
            }
            Some(ratio) if ratio < self.config.like_penalty_threshold => {
                self.config.penalty_multiplier
            }
            _ => 1.0,
        }
    }
}

/// Lowercased alphanumeric tokens, minimum two characters
fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|token| token.len() >= 2)
        .collect()
}

/// Normalized title signature for duplicate detection
fn title_signature(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Token-set Jaccard similarity
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}
