//! Audit trail for workflow execution
//!
//! One `WorkflowExecutionRecord` per request and one `NodeExecutionRecord`
//! per stage transition, emitted fire-and-forget to an `AuditSink`. The
//! records are write-once observability data; the control loop never reads
//! them back. A sink must never block or fail the main path, so the trait
//! is infallible by construction.

use crate::domain::WorkflowState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use uuid::Uuid;

/// Parent record, one per request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionRecord {
    /// Engine-generated run identifier
    pub workflow_id: Uuid,

    /// Tenant the request belonged to
    pub tenant_id: Uuid,

    /// Final status: finalized or failed
    pub status: String,

    /// Replan iterations consumed
    pub iterations: u32,

    /// End-to-end duration
    pub duration_ms: u64,

    /// When the run started
    pub started_at: DateTime<Utc>,
}

/// Child record, one per stage transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecutionRecord {
    /// Run this transition belongs to
    pub workflow_id: Uuid,

    /// Stage name
    pub stage: String,

    /// Digest of the state entering the stage
    pub state_before_digest: String,

    /// Digest of the state leaving the stage
    pub state_after_digest: String,

    /// Stage duration
    pub duration_ms: u64,

    /// "ok" or "error"
    pub status: String,

    /// Classified error, when the stage failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fire-and-forget audit sink
pub trait AuditSink: Send + Sync {
    fn record_workflow(&self, record: WorkflowExecutionRecord);
    fn record_node(&self, record: NodeExecutionRecord);
}

/// Truncated digest over the observable shape of a state.
///
/// Content hashes stay out on purpose; the digest identifies transitions,
/// it does not reproduce them.
pub fn state_digest(state: &WorkflowState) -> String {
    let summary = format!(
        "{:?}|{}|{}|{}|{}|{}|{}",
        state.status,
        state.domain,
        state.iteration_count,
        state.evidence.len(),
        state.tool_results.len(),
        state.guardrail_failures,
        state.draft.as_ref().map(|d| d.text.len()).unwrap_or(0),
    );
    let mut hasher = Sha256::new();
    hasher.update(summary.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// Sink that emits structured log events
#[derive(Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record_workflow(&self, record: WorkflowExecutionRecord) {
        tracing::info!(
            workflow_id = %record.workflow_id,
            tenant_id = %record.tenant_id,
            status = %record.status,
            iterations = record.iterations,
            duration_ms = record.duration_ms,
            "Workflow finished"
        );
    }

    fn record_node(&self, record: NodeExecutionRecord) {
        tracing::info!(
            workflow_id = %record.workflow_id,
            stage = %record.stage,
            before = %record.state_before_digest,
            after = %record.state_after_digest,
            duration_ms = record.duration_ms,
            status = %record.status,
            error = record.error.as_deref().unwrap_or(""),
            "Stage transition"
        );
    }
}

/// Collecting sink for tests
#[derive(Default)]
pub struct MemoryAuditSink {
    workflows: Mutex<Vec<WorkflowExecutionRecord>>,
    nodes: Mutex<Vec<NodeExecutionRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workflows(&self) -> Vec<WorkflowExecutionRecord> {
        self.workflows.lock().expect("audit lock poisoned").clone()
    }

    pub fn nodes(&self) -> Vec<NodeExecutionRecord> {
        self.nodes.lock().expect("audit lock poisoned").clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record_workflow(&self, record: WorkflowExecutionRecord) {
        self.workflows.lock().expect("audit lock poisoned").push(record);
    }

    fn record_node(&self, record: NodeExecutionRecord) {
        self.nodes.lock().expect("audit lock poisoned").push(record);
    }
}
