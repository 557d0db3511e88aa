//! Core domain model for the answer engine
//!
//! Defines the request/response surface, the per-request `WorkflowState`
//! aggregate, citations, tool calls, and plans. The state is threaded by
//! value through stage functions; nothing here is shared across requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Knowledge domain used to partition the corpus and restrict retrieval
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Human resources
    Hr,
    /// IT support
    It,
    /// Finance
    Finance,
    /// Catch-all for queries outside the named domains
    General,
}

impl Domain {
    /// All domains, catch-all last
    pub const ALL: [Domain; 4] = [Domain::Hr, Domain::It, Domain::Finance, Domain::General];

    /// Stable lowercase name, matching config keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Hr => "hr",
            Domain::It => "it",
            Domain::Finance => "finance",
            Domain::General => "general",
        }
    }

    /// Parse a domain name; unknown names map to None
    pub fn parse(name: &str) -> Option<Domain> {
        match name.trim().to_lowercase().as_str() {
            "hr" => Some(Domain::Hr),
            "it" => Some(Domain::It),
            "finance" => Some(Domain::Finance),
            "general" => Some(Domain::General),
            _ => None,
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An accepted answer request. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
    /// Client-supplied idempotency key
    pub id: Option<String>,

    /// Tenant the knowledge base is scoped to
    pub tenant_id: Uuid,

    /// Requesting user, when known
    pub user_id: Option<Uuid>,

    /// Conversation session, when known
    pub session_id: Option<Uuid>,

    /// The natural-language question
    pub query_text: String,

    /// Submission timestamp
    pub submitted_at: DateTime<Utc>,
}

impl AnswerRequest {
    pub fn new(tenant_id: Uuid, query_text: impl Into<String>) -> Self {
        Self {
            id: None,
            tenant_id,
            user_id: None,
            session_id: None,
            query_text: query_text.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// A scored reference to a retrieved chunk, surfaced as evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Chunk ID
    pub chunk_id: Uuid,

    /// Source document ID
    pub document_id: Uuid,

    /// Tenant the chunk belongs to
    pub tenant_id: Uuid,

    /// Domain the chunk was indexed under
    pub domain: Domain,

    /// Chunk content
    pub content: String,

    /// Title of the source document
    pub source_title: String,

    /// Raw similarity score from the vector store (0.0 - 1.0)
    pub similarity_score: f32,

    /// Score after lexical-overlap and feedback adjustments
    pub adjusted_score: f32,

    /// Position after ranking (1-based; 0 before ranking)
    pub rank: usize,
}

/// Status of a finished tool call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
    Timeout,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Success => "success",
            ToolStatus::Error => "error",
            ToolStatus::Timeout => "timeout",
        }
    }
}

/// A requested tool invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Registered tool name
    pub tool_name: String,

    /// Arguments, matching the tool's input schema
    pub arguments: serde_json::Value,
}

/// The outcome of one tool invocation. Append-only; never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool that was invoked
    pub tool_name: String,

    /// Arguments it was invoked with
    pub arguments: serde_json::Value,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// When execution finished (or timed out)
    pub completed_at: DateTime<Utc>,

    /// Outcome status
    pub status: ToolStatus,

    /// Payload on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Error description on failure or timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

/// The execution plan for one retrieval/tool pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Query text to retrieve with
    pub query: String,

    /// Candidates to request
    pub top_k: usize,

    /// Minimum similarity score
    pub min_score: f32,

    /// Tool calls to execute before the next retrieval
    pub tool_calls: Vec<ToolCall>,
}

/// Generator output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    /// Draft answer text
    pub text: String,

    /// 1-based indices of the citations the draft references
    pub referenced: Vec<usize>,
}

/// Workflow lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Finalized,
    Failed,
}

/// The single mutable aggregate threaded through every stage.
///
/// Owned exclusively by the orchestrator for the lifetime of one request.
/// Stage functions take the state by value and return the updated value;
/// no other component mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// The immutable request
    pub request: AnswerRequest,

    /// Classified domain; General until classification runs
    pub domain: Domain,

    /// Current execution plan
    pub plan: Plan,

    /// Replan iterations consumed so far
    pub iteration_count: u32,

    /// Hard iteration ceiling
    pub max_iterations: u32,

    /// Ranked evidence, replaced wholesale on each retrieval pass
    pub evidence: Vec<Citation>,

    /// Append-only tool result log
    pub tool_results: Vec<ToolResult>,

    /// Latest draft answer
    pub draft: Option<Draft>,

    /// Guardrail regenerations consumed
    pub guardrail_failures: u32,

    /// Rules the latest draft violated; cleared when validation passes
    pub unmet_rules: Vec<String>,

    /// Set when a budget forced a best-effort finalize
    pub partial: bool,

    /// Lifecycle status
    pub status: WorkflowStatus,
}

impl WorkflowState {
    pub fn new(request: AnswerRequest, max_iterations: u32, top_k: usize, min_score: f32) -> Self {
        let plan = Plan {
            query: request.query_text.clone(),
            top_k,
            min_score,
            tool_calls: Vec::new(),
        };
        Self {
            request,
            domain: Domain::General,
            plan,
            iteration_count: 0,
            max_iterations,
            evidence: Vec::new(),
            tool_results: Vec::new(),
            draft: None,
            guardrail_failures: 0,
            unmet_rules: Vec::new(),
            partial: false,
            status: WorkflowStatus::Running,
        }
    }
}

/// User feedback on a citation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Like,
    Dislike,
}

/// One recorded feedback event. Append-only; the latest record per
/// (user, citation, session) wins logically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// Citation (chunk) the feedback applies to
    pub citation_id: Uuid,

    /// Domain of the cited chunk
    pub domain: Domain,

    /// Like or dislike
    pub feedback_type: FeedbackType,

    /// User who gave the feedback
    pub user_id: Uuid,

    /// Session the feedback was given in
    pub session_id: Option<Uuid>,

    /// When it was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Outcome status surfaced to the caller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Fully answered within budget
    Ok,
    /// Best-effort answer: a budget was hit or a guardrail stayed unmet
    Partial,
    /// The request could not be served
    Failed,
}

/// A citation as surfaced to the caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CitedSource {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub source_title: String,
    pub domain: Domain,
    pub adjusted_score: f32,
    pub rank: usize,
}

/// Summary of one tool invocation, surfaced to the caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSummary {
    pub tool_name: String,
    pub status: ToolStatus,
    pub duration_ms: u64,
}

/// The structured response every caller receives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    /// The answer text (or fallback message)
    pub answer: String,

    /// Evidence backing the answer
    pub citations: Vec<CitedSource>,

    /// Tool invocations performed while answering
    pub tool_summary: Vec<ToolSummary>,

    /// Replan iterations consumed
    pub iterations_used: u32,

    /// Outcome classification
    pub status: ResponseStatus,

    /// Classified error code when status is failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    /// Human-readable note on partial or failed outcomes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_parse_roundtrip() {
        for domain in Domain::ALL {
            assert_eq!(Domain::parse(domain.as_str()), Some(domain));
        }
        assert_eq!(Domain::parse("legal"), None);
        assert_eq!(Domain::parse("  HR "), Some(Domain::Hr));
    }

    #[test]
    fn test_new_state_defaults() {
        let request = AnswerRequest::new(Uuid::new_v4(), "How do I reset my password?");
        let state = WorkflowState::new(request, 3, 8, 0.5);

        assert_eq!(state.iteration_count, 0);
        assert_eq!(state.max_iterations, 3);
        assert_eq!(state.status, WorkflowStatus::Running);
        assert!(state.evidence.is_empty());
        assert!(state.plan.tool_calls.is_empty());
        assert_eq!(state.plan.query, "How do I reset my password?");
    }

    #[test]
    fn test_domain_serde_snake_case() {
        let json = serde_json::to_string(&Domain::Finance).unwrap();
        assert_eq!(json, "\"finance\"");
    }
}
