//! Sufficiency evaluation and replanning
//!
//! Judges whether the gathered evidence answers the query, and when it does
//! not, produces the revised plan for the next iteration. The check is a
//! pluggable policy behind a single `evaluate` seam; the shipped heuristic
//! needs no model call and is fully deterministic.

use crate::domain::{Plan, ToolCall, WorkflowState};
use std::collections::HashMap;
use tracing::debug;

/// Outcome of a sufficiency check
#[derive(Debug, Clone)]
pub enum Verdict {
    /// The evidence answers the query; finalize
    Sufficient,
    /// More work needed; run the revised plan
    Insufficient { revised_plan: Plan },
}

/// Pluggable sufficiency policy
pub trait SufficiencyPolicy: Send + Sync {
    fn evaluate(&self, state: &WorkflowState) -> Verdict;
}

/// Default heuristic: sufficient when above-threshold evidence or a
/// successful, non-empty tool result exists.
pub struct HeuristicPolicy {
    /// Adjusted-score threshold evidence must clear
    threshold: f32,

    /// Factor applied to min_score on replan
    relax_factor: f32,

    /// Follow-up tools per domain name
    replan_tools: HashMap<String, Vec<String>>,
}

/// Cap on how far the replanner widens a retrieval pass
const MAX_REPLAN_TOP_K: usize = 32;

/// Interrogative boilerplate stripped when broadening a query
const QUESTION_WORDS: &[&str] = &[
    "what", "how", "why", "where", "when", "who", "which", "is", "are", "do",
    "does", "can", "the", "mi", "mit", "hogyan", "miért", "hol", "mikor", "a", "az",
];

impl HeuristicPolicy {
    pub fn new(
        threshold: f32,
        relax_factor: f32,
        replan_tools: HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            threshold,
            relax_factor,
            replan_tools,
        }
    }

    /// Build the next iteration's plan: broaden the query, relax the score
    /// floor, widen the candidate pool, and request the domain's follow-up
    /// tools that have not run yet.
    fn replan(&self, state: &WorkflowState) -> Plan {
        let broadened = broaden_query(&state.plan.query);

        let already_ran: Vec<&str> = state
            .tool_results
            .iter()
            .map(|r| r.tool_name.as_str())
            .collect();

        let tool_calls: Vec<ToolCall> = self
            .replan_tools
            .get(state.domain.as_str())
            .map(|names| {
                names
                    .iter()
                    .filter(|name| !already_ran.contains(&name.as_str()))
                    .map(|name| ToolCall {
                        tool_name: name.clone(),
                        arguments: serde_json::json!({ "query": state.request.query_text }),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Plan {
            query: broadened,
            top_k: (state.plan.top_k * 2).min(MAX_REPLAN_TOP_K),
            min_score: (state.plan.min_score * self.relax_factor).max(0.0),
            tool_calls,
        }
    }
}

impl SufficiencyPolicy for HeuristicPolicy {
    fn evaluate(&self, state: &WorkflowState) -> Verdict {
        let strong_evidence = state
            .evidence
            .iter()
            .any(|c| c.adjusted_score >= self.threshold);

        let useful_tool_result = state
            .tool_results
            .iter()
            .any(|r| r.is_success() && r.payload.as_ref().is_some_and(|p| !p.is_null()));

        if strong_evidence || useful_tool_result {
            debug!(
                evidence = state.evidence.len(),
                tool_results = state.tool_results.len(),
                "Evidence judged sufficient"
            );
            return Verdict::Sufficient;
        }

        let revised_plan = self.replan(state);
        debug!(
            query = %revised_plan.query,
            min_score = revised_plan.min_score,
            top_k = revised_plan.top_k,
            tools = revised_plan.tool_calls.len(),
            "Evidence judged insufficient, replanning"
        );
        Verdict::Insufficient { revised_plan }
    }
}

/// Strip interrogative boilerplate; falls back to the original query when
/// stripping would leave nothing
fn broaden_query(query: &str) -> String {
    let kept: Vec<&str> = query
        .split_whitespace()
        .filter(|word| {
            let normalized: String = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            !normalized.is_empty() && !QUESTION_WORDS.contains(&normalized.as_str())
        })
        .collect();

    if kept.is_empty() {
        query.to_string()
    } else {
        kept.join(" ").replace(['?', '!'], "")
    }
}
