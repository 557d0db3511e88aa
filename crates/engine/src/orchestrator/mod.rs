//! The orchestrator state machine
//!
//! Drives one request through
//! `Classify -> Retrieve -> Generate -> Guardrail -> Evaluate`, looping back
//! through `Tools`/`Retrieve` on replan, under a hard iteration ceiling and
//! a wall-clock budget. Exceeding a budget forces a best-effort finalize
//! with a partial flag; only validation and authorization failures fail the
//! request outright.
//!
//! The orchestrator owns the `WorkflowState` exclusively: every stage
//! receives the state by value and returns the updated value. Audit records
//! are emitted fire-and-forget around every transition.

use crate::audit::{state_digest, AuditSink, NodeExecutionRecord, WorkflowExecutionRecord};
use crate::domain::{
    AnswerRequest, AnswerResponse, CitedSource, ResponseStatus, ToolSummary, WorkflowState,
    WorkflowStatus,
};
use crate::feedback::FeedbackStore;
use crate::generate::{Generator, FALLBACK_MESSAGE};
use crate::guardrail::GuardrailValidator;
use crate::intent::IntentClassifier;
use crate::retrieval::{Ranker, VectorRetriever};
use crate::sufficiency::{HeuristicPolicy, SufficiencyPolicy, Verdict};
use crate::tools::{ToolExecutor, ToolRegistry};
use chrono::Utc;
use deskwise_common::cache::{keys, Cache};
use deskwise_common::config::{AppConfig, OrchestratorConfig};
use deskwise_common::errors::{AppError, Result};
use deskwise_common::llm::LanguageModel;
use deskwise_common::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::Instant as TokioInstant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Closed set of pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Classify,
    Tools,
    Retrieve,
    Generate,
    Guardrail,
    Evaluate,
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Classify => "classify",
            Stage::Tools => "tools",
            Stage::Retrieve => "retrieve",
            Stage::Generate => "generate",
            Stage::Guardrail => "guardrail",
            Stage::Evaluate => "evaluate",
        }
    }
}

/// Where the driver goes after a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Tools,
    Retrieve,
    Generate,
    Guardrail,
    Evaluate,
    Finalize,
}

/// The per-request control loop and its injected collaborators
pub struct Orchestrator {
    classifier: IntentClassifier,
    retriever: VectorRetriever,
    ranker: Ranker,
    executor: ToolExecutor,
    generator: Generator,
    guardrail: GuardrailValidator,
    policy: Arc<dyn SufficiencyPolicy>,
    feedback: Arc<FeedbackStore>,
    audit: Arc<dyn AuditSink>,
    cache: Cache,
    config: OrchestratorConfig,
    guardrail_max_regenerations: u32,
    initial_top_k: usize,
    initial_min_score: f32,
}

impl Orchestrator {
    /// Construct from explicit components
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &AppConfig,
        classifier: IntentClassifier,
        retriever: VectorRetriever,
        executor: ToolExecutor,
        generator: Generator,
        guardrail: GuardrailValidator,
        policy: Arc<dyn SufficiencyPolicy>,
        feedback: Arc<FeedbackStore>,
        audit: Arc<dyn AuditSink>,
        cache: Cache,
    ) -> Self {
        Self {
            classifier,
            retriever,
            ranker: Ranker::new(config.ranking.clone()),
            executor,
            generator,
            guardrail,
            policy,
            feedback,
            audit,
            cache,
            config: config.orchestrator.clone(),
            guardrail_max_regenerations: config.guardrail.max_regenerations,
            initial_top_k: config.retrieval.top_k,
            initial_min_score: config.retrieval.min_score,
        }
    }

    /// Wire the default component set around the given providers
    pub fn assemble(
        config: &AppConfig,
        llm: Arc<dyn LanguageModel>,
        store: Arc<dyn crate::retrieval::VectorStore>,
        registry: Arc<ToolRegistry>,
        feedback: Arc<FeedbackStore>,
        audit: Arc<dyn AuditSink>,
        cache: Cache,
    ) -> Self {
        let classifier = IntentClassifier::new(llm.clone(), config.intent.clone());
        let retriever = VectorRetriever::new(
            store,
            llm.clone(),
            cache.clone(),
            config.model.embedding_model.clone(),
            config.retrieval.clone(),
        );
        let executor = ToolExecutor::new(
            registry,
            config.tools.max_concurrency,
            Duration::from_secs(config.tools.default_timeout_secs),
        );
        let generator = Generator::new(
            llm,
            config.generator.clone(),
            config.model.temperature,
            config.model.max_tokens,
        );
        let guardrail = GuardrailValidator::new(config.guardrail.clone());
        let policy: Arc<dyn SufficiencyPolicy> = Arc::new(HeuristicPolicy::new(
            config.orchestrator.sufficiency_threshold,
            config.orchestrator.replan_relax_factor,
            config.tools.replan_tools.clone(),
        ));

        Self::new(
            config, classifier, retriever, executor, generator, guardrail, policy, feedback,
            audit, cache,
        )
    }

    /// Public entry point. With a client idempotency key and a live cache
    /// entry, returns the cached response unchanged with zero upstream
    /// calls; otherwise runs the pipeline and publishes the result under
    /// atomic first-writer-wins semantics.
    pub async fn handle(&self, request: AnswerRequest) -> AnswerResponse {
        let idempotency_key = request
            .id
            .as_deref()
            .map(|key| keys::idempotency(request.tenant_id, key));

        if let Some(key) = &idempotency_key {
            if let Ok(Some(cached)) = self.cache.get::<AnswerResponse>(key).await {
                metrics::record_idempotency_hit();
                info!(key = %key, "Idempotency cache hit, replaying response");
                return cached;
            }
        }

        let response = self.run(request).await;

        if let Some(key) = &idempotency_key {
            let ttl = Duration::from_secs(self.config.idempotency_ttl_secs);
            match self.cache.set_if_absent(key, &response, ttl).await {
                Ok(true) => {}
                Ok(false) => {
                    // A concurrent duplicate won the write; serve its copy so
                    // both callers observe byte-identical bodies
                    if let Ok(Some(winner)) = self.cache.get::<AnswerResponse>(key).await {
                        return winner;
                    }
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Idempotency cache write failed");
                }
            }
        }

        response
    }

    /// Run one request through the state machine
    pub async fn run(&self, request: AnswerRequest) -> AnswerResponse {
        let workflow_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let tenant_id = request.tenant_id;

        if let Err(e) = validate_request(&request) {
            let response = self.failure_response(&e);
            self.audit.record_workflow(WorkflowExecutionRecord {
                workflow_id,
                tenant_id,
                status: "failed".to_string(),
                iterations: 0,
                duration_ms: start.elapsed().as_millis() as u64,
                started_at,
            });
            return response;
        }

        let deadline = TokioInstant::now() + Duration::from_millis(self.config.request_budget_ms);
        let state = WorkflowState::new(
            request,
            self.config.max_iterations,
            self.initial_top_k,
            self.initial_min_score,
        );

        match self.drive(workflow_id, state, deadline).await {
            Ok(state) => {
                let response = build_response(&state);
                metrics::record_request(
                    state.domain.as_str(),
                    status_label(response.status),
                    start.elapsed().as_secs_f64(),
                );
                self.audit.record_workflow(WorkflowExecutionRecord {
                    workflow_id,
                    tenant_id,
                    status: "finalized".to_string(),
                    iterations: state.iteration_count,
                    duration_ms: start.elapsed().as_millis() as u64,
                    started_at,
                });
                response
            }
            Err(e) => {
                error!(workflow_id = %workflow_id, error = %e, "Workflow failed");
                metrics::record_request("unknown", "failed", start.elapsed().as_secs_f64());
                self.audit.record_workflow(WorkflowExecutionRecord {
                    workflow_id,
                    tenant_id,
                    status: "failed".to_string(),
                    iterations: 0,
                    duration_ms: start.elapsed().as_millis() as u64,
                    started_at,
                });
                self.failure_response(&e)
            }
        }
    }

    /// The stage loop. Returns the finalized state, or the fatal error that
    /// sent the workflow to FAILED.
    async fn drive(
        &self,
        workflow_id: Uuid,
        mut state: WorkflowState,
        deadline: TokioInstant,
    ) -> Result<WorkflowState> {
        let mut stage = Stage::Classify;

        loop {
            let before_digest = state_digest(&state);
            let stage_start = Instant::now();

            let (next_state, outcome) = match stage {
                Stage::Classify => self.stage_classify(state, deadline).await,
                Stage::Tools => self.stage_tools(state, deadline).await,
                Stage::Retrieve => self.stage_retrieve(state, deadline).await,
                Stage::Generate => self.stage_generate(state, deadline).await,
                Stage::Guardrail => self.stage_guardrail(state),
                Stage::Evaluate => self.stage_evaluate(state),
            };
            state = next_state;

            let duration = stage_start.elapsed();
            let stage_status = if outcome.is_ok() { "ok" } else { "error" };
            metrics::record_stage(stage.name(), duration.as_secs_f64(), stage_status);
            self.audit.record_node(NodeExecutionRecord {
                workflow_id,
                stage: stage.name().to_string(),
                state_before_digest: before_digest,
                state_after_digest: state_digest(&state),
                duration_ms: duration.as_millis() as u64,
                status: stage_status.to_string(),
                error: outcome.as_ref().err().map(|e| format!("{:?}", e.code())),
            });

            match outcome {
                Ok(Next::Finalize) => {
                    state.status = WorkflowStatus::Finalized;
                    return Ok(state);
                }
                Ok(Next::Tools) => stage = Stage::Tools,
                Ok(Next::Retrieve) => stage = Stage::Retrieve,
                Ok(Next::Generate) => stage = Stage::Generate,
                Ok(Next::Guardrail) => stage = Stage::Guardrail,
                Ok(Next::Evaluate) => stage = Stage::Evaluate,
                Err(AppError::DeadlineExceeded { stage: at }) => {
                    // Not an error: the budget ran out mid-flight, so finalize
                    // best-effort with whatever evidence and draft exist
                    warn!(
                        workflow_id = %workflow_id,
                        stage = %at,
                        "Request budget exceeded, finalizing best effort"
                    );
                    state.partial = true;
                    state.status = WorkflowStatus::Finalized;
                    return Ok(state);
                }
                Err(e) => {
                    state.status = WorkflowStatus::Failed;
                    return Err(e);
                }
            }
        }
    }

    async fn stage_classify(
        &self,
        mut state: WorkflowState,
        deadline: TokioInstant,
    ) -> (WorkflowState, Result<Next>) {
        let classified = tokio::time::timeout_at(
            deadline,
            self.classifier.classify(&state.request.query_text),
        )
        .await;

        match classified {
            Ok(domain) => {
                debug!(domain = %domain, "Query classified");
                state.domain = domain;
                (state, Ok(Next::Retrieve))
            }
            Err(_) => (
                state,
                Err(AppError::DeadlineExceeded {
                    stage: "classify".to_string(),
                }),
            ),
        }
    }

    async fn stage_tools(
        &self,
        mut state: WorkflowState,
        deadline: TokioInstant,
    ) -> (WorkflowState, Result<Next>) {
        let calls = std::mem::take(&mut state.plan.tool_calls);
        if calls.is_empty() {
            return (state, Ok(Next::Retrieve));
        }

        match tokio::time::timeout_at(deadline, self.executor.execute_all(calls)).await {
            Ok(results) => {
                // Append-only: results are added, never rewritten
                state.tool_results.extend(results);
                (state, Ok(Next::Retrieve))
            }
            Err(_) => (
                state,
                Err(AppError::DeadlineExceeded {
                    stage: "tools".to_string(),
                }),
            ),
        }
    }

    async fn stage_retrieve(
        &self,
        mut state: WorkflowState,
        deadline: TokioInstant,
    ) -> (WorkflowState, Result<Next>) {
        let plan = state.plan.clone();
        let tenant_id = state.request.tenant_id;
        let domain = state.domain;

        let retrieved = self
            .with_retries("retrieve", deadline, || {
                self.retriever
                    .retrieve(&plan.query, tenant_id, domain, plan.top_k, plan.min_score)
            })
            .await;

        match retrieved {
            Ok(citations) => {
                let snapshot = self.feedback.snapshot();
                state.evidence = self.ranker.rank(&plan.query, citations, &snapshot, plan.top_k);
                (state, Ok(Next::Generate))
            }
            Err(e @ AppError::DeadlineExceeded { .. }) => (state, Err(e)),
            Err(e) if is_request_fatal(&e) => (state, Err(e)),
            Err(e) => {
                // Fatal for this iteration only; the evaluator decides
                // whether the missing evidence matters
                warn!(error = %e, "Retrieval failed for this iteration");
                (state, Ok(Next::Evaluate))
            }
        }
    }

    async fn stage_generate(
        &self,
        mut state: WorkflowState,
        deadline: TokioInstant,
    ) -> (WorkflowState, Result<Next>) {
        let generated = tokio::time::timeout_at(
            deadline,
            self.generator.generate(
                &state.request.query_text,
                &state.evidence,
                &state.tool_results,
                &state.unmet_rules,
            ),
        )
        .await;

        match generated {
            Ok(draft) => {
                state.draft = Some(draft);
                (state, Ok(Next::Guardrail))
            }
            Err(_) => (
                state,
                Err(AppError::DeadlineExceeded {
                    stage: "generate".to_string(),
                }),
            ),
        }
    }

    fn stage_guardrail(&self, mut state: WorkflowState) -> (WorkflowState, Result<Next>) {
        let Some(draft) = state.draft.clone() else {
            return (state, Ok(Next::Generate));
        };

        let violations = self.guardrail.validate(&draft, state.domain, &state.evidence);

        if violations.is_empty() {
            state.unmet_rules.clear();
            return (state, Ok(Next::Evaluate));
        }

        let rules: Vec<String> = violations.iter().map(|v| v.rule.clone()).collect();
        if state.guardrail_failures < self.guardrail_max_regenerations {
            state.guardrail_failures += 1;
            state.unmet_rules = violations.into_iter().map(|v| v.fix_instruction).collect();
            info!(
                rules = ?rules,
                attempt = state.guardrail_failures,
                "Guardrail violation, regenerating"
            );
            (state, Ok(Next::Generate))
        } else {
            warn!(rules = ?rules, "Guardrail still violated after regeneration budget");
            state.partial = true;
            (state, Ok(Next::Finalize))
        }
    }

    fn stage_evaluate(&self, mut state: WorkflowState) -> (WorkflowState, Result<Next>) {
        // Refuse to loop once the ceiling is reached
        if state.iteration_count >= state.max_iterations {
            state.partial = true;
            return (state, Ok(Next::Finalize));
        }

        match self.policy.evaluate(&state) {
            Verdict::Sufficient => (state, Ok(Next::Finalize)),
            Verdict::Insufficient { revised_plan } => {
                state.iteration_count += 1;
                if state.iteration_count >= state.max_iterations {
                    debug!(
                        iterations = state.iteration_count,
                        "Iteration ceiling reached, finalizing best effort"
                    );
                    state.partial = true;
                    return (state, Ok(Next::Finalize));
                }

                let next = if revised_plan.tool_calls.is_empty() {
                    Next::Retrieve
                } else {
                    Next::Tools
                };
                state.plan = revised_plan;
                (state, Ok(next))
            }
        }
    }

    /// Retry a retryable stage call with exponential backoff, bounded by
    /// the remaining request deadline
    async fn with_retries<T, F, Fut>(
        &self,
        stage: &str,
        deadline: TokioInstant,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match tokio::time::timeout_at(deadline, call()).await {
                Err(_) => {
                    return Err(AppError::DeadlineExceeded {
                        stage: stage.to_string(),
                    })
                }
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_retryable() && attempt < self.config.stage_max_retries => {
                    attempt += 1;
                    metrics::record_stage_retry(stage);
                    warn!(
                        stage = stage,
                        attempt = attempt,
                        error = %e,
                        "Retryable stage error, backing off"
                    );
                    let delay = Duration::from_millis(
                        self.config.retry_backoff_ms * 2_u64.pow(attempt - 1),
                    );
                    if tokio::time::timeout_at(deadline, tokio::time::sleep(delay))
                        .await
                        .is_err()
                    {
                        return Err(AppError::DeadlineExceeded {
                            stage: stage.to_string(),
                        });
                    }
                }
                Ok(Err(e)) => return Err(e),
            }
        }
    }

    /// Structured failure response; only the classified code is exposed
    fn failure_response(&self, error: &AppError) -> AnswerResponse {
        let code = error.code();
        let error_code = serde_json::to_value(code)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{:?}", code));

        let message = match error {
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidFormat { .. } => error.to_string(),
            _ => "The request could not be completed.".to_string(),
        };

        AnswerResponse {
            answer: String::new(),
            citations: Vec::new(),
            tool_summary: Vec::new(),
            iterations_used: 0,
            status: ResponseStatus::Failed,
            error_code: Some(error_code),
            message: Some(message),
        }
    }
}

/// Errors that fail the whole request instead of one iteration
fn is_request_fatal(error: &AppError) -> bool {
    matches!(
        error,
        AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidFormat { .. }
            | AppError::Unauthorized { .. }
            | AppError::InvalidApiKey
            | AppError::Forbidden { .. }
            | AppError::TenantMismatch
    )
}

/// Reject malformed requests before any upstream work
fn validate_request(request: &AnswerRequest) -> Result<()> {
    if request.tenant_id.is_nil() {
        return Err(AppError::Validation {
            message: "tenant_id must be set".to_string(),
            field: Some("tenant_id".to_string()),
        });
    }
    if request.query_text.trim().is_empty() {
        return Err(AppError::Validation {
            message: "query_text must not be empty".to_string(),
            field: Some("query_text".to_string()),
        });
    }
    if request.query_text.chars().count() > 4000 {
        return Err(AppError::Validation {
            message: "query_text exceeds 4000 characters".to_string(),
            field: Some("query_text".to_string()),
        });
    }
    Ok(())
}

fn status_label(status: ResponseStatus) -> &'static str {
    match status {
        ResponseStatus::Ok => "ok",
        ResponseStatus::Partial => "partial",
        ResponseStatus::Failed => "failed",
    }
}

/// Project the finalized state into the caller-facing response
fn build_response(state: &WorkflowState) -> AnswerResponse {
    let answer = state
        .draft
        .as_ref()
        .map(|d| d.text.clone())
        .unwrap_or_else(|| FALLBACK_MESSAGE.to_string());

    let citations = state
        .evidence
        .iter()
        .map(|c| CitedSource {
            chunk_id: c.chunk_id,
            document_id: c.document_id,
            source_title: c.source_title.clone(),
            domain: c.domain,
            adjusted_score: c.adjusted_score,
            rank: c.rank,
        })
        .collect();

    let tool_summary = state
        .tool_results
        .iter()
        .map(|r| ToolSummary {
            tool_name: r.tool_name.clone(),
            status: r.status,
            duration_ms: (r.completed_at - r.started_at).num_milliseconds().max(0) as u64,
        })
        .collect();

    let status = if state.partial {
        ResponseStatus::Partial
    } else {
        ResponseStatus::Ok
    };

    AnswerResponse {
        answer,
        citations,
        tool_summary,
        iterations_used: state.iteration_count,
        status,
        error_code: None,
        message: state
            .partial
            .then(|| "Best-effort answer: a budget or guardrail limit was reached.".to_string()),
    }
}

#[cfg(test)]
mod tests;
