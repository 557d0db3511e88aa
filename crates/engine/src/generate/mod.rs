//! Draft answer generation
//!
//! Assembles a bounded-size prompt from ranked evidence and tool results,
//! calls the language model, and reports which citations the draft actually
//! references. Model failures are retried with backoff up to a small
//! ceiling, then degrade to a fixed fallback message; generation never
//! fails the request.

use crate::domain::{Citation, Draft, ToolResult};
use deskwise_common::config::GeneratorConfig;
use deskwise_common::llm::LanguageModel;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Fixed degradation message when the model stays unreachable
pub const FALLBACK_MESSAGE: &str =
    "I could not produce a reliable answer right now. Please try again shortly \
    or contact your support desk directly.";

/// Evidence-grounded answer generator
pub struct Generator {
    llm: Arc<dyn LanguageModel>,
    config: GeneratorConfig,
    temperature: f32,
    max_tokens: usize,
}

impl Generator {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        config: GeneratorConfig,
        temperature: f32,
        max_tokens: usize,
    ) -> Self {
        Self {
            llm,
            config,
            temperature,
            max_tokens,
        }
    }

    /// Produce a draft answer. Total: degrades to the fallback message
    /// instead of failing.
    pub async fn generate(
        &self,
        query_text: &str,
        citations: &[Citation],
        tool_results: &[ToolResult],
        fix_instructions: &[String],
    ) -> Draft {
        let prompt = self.build_prompt(query_text, citations, tool_results, fix_instructions);

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(100 * 2_u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
            }

            match self
                .llm
                .complete(&prompt, self.temperature, self.max_tokens)
                .await
            {
                Ok(text) => {
                    let referenced = extract_references(&text, citations.len());
                    return Draft { text, referenced };
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "Generation failed, retrying"
                    );
                    last_error = Some(e);
                }
                Err(e) => {
                    warn!(error = %e, "Generation rejected, degrading to fallback");
                    last_error = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = last_error {
            warn!(error = %e, "Generation exhausted retries, using fallback message");
        }

        Draft {
            text: FALLBACK_MESSAGE.to_string(),
            referenced: Vec::new(),
        }
    }

    /// Build the generation prompt under the fixed truncation policy:
    /// the top `full_citations` go in verbatim, the rest are cut to
    /// `truncate_chars` characters.
    fn build_prompt(
        &self,
        query_text: &str,
        citations: &[Citation],
        tool_results: &[ToolResult],
        fix_instructions: &[String],
    ) -> String {
        let mut prompt = String::from(
            "You are an internal support assistant. Answer the question using ONLY \
            the provided sources and tool results. If they do not contain the answer, \
            say so. Reference sources inline with markers like [1], [2].\n",
        );

        for instruction in fix_instructions {
            prompt.push_str("Revision required: ");
            prompt.push_str(instruction);
            prompt.push('\n');
        }

        if !citations.is_empty() {
            prompt.push_str("\nSources:\n");
            for (index, citation) in citations.iter().enumerate() {
                let content: String = if index < self.config.full_citations {
                    citation.content.clone()
                } else {
                    citation.content.chars().take(self.config.truncate_chars).collect()
                };
                prompt.push_str(&format!(
                    "[{}] {} (score: {:.2})\n{}\n",
                    index + 1,
                    citation.source_title,
                    citation.adjusted_score,
                    content
                ));
            }
        }

        let successful: Vec<&ToolResult> = tool_results.iter().filter(|r| r.is_success()).collect();
        if !successful.is_empty() {
            prompt.push_str("\nTool results:\n");
            for result in successful {
                let payload = result
                    .payload
                    .as_ref()
                    .map(|p| p.to_string())
                    .unwrap_or_default();
                prompt.push_str(&format!("- {}: {}\n", result.tool_name, payload));
            }
        }

        prompt.push_str(&format!("\nQuestion: {}\n\nAnswer:", query_text));
        prompt
    }
}

/// Extract the distinct, in-range `[n]` markers from a draft
fn extract_references(text: &str, citation_count: usize) -> Vec<usize> {
    let pattern = regex_lite::Regex::new(r"\[(\d+)\]").expect("valid marker pattern");
    let mut referenced: Vec<usize> = pattern
        .captures_iter(text)
        .filter_map(|cap| cap.get(1)?.as_str().parse::<usize>().ok())
        .filter(|idx| *idx >= 1 && *idx <= citation_count)
        .collect();
    referenced.sort_unstable();
    referenced.dedup();
    referenced
}
