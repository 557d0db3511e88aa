//! Orchestrator behavior tests over in-memory collaborators

use super::*;
use crate::audit::MemoryAuditSink;
use crate::domain::{Domain, Plan, ToolStatus};
use crate::retrieval::{MemoryVectorStore, ScoredChunk, VectorStore};
use crate::sufficiency::Verdict;
use crate::tools::Tool;
use deskwise_common::llm::MockLanguageModel;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.orchestrator.request_budget_ms = 5_000;
    config.orchestrator.retry_backoff_ms = 5;
    config
}

fn chunk(domain: Domain, tenant_id: Uuid, title: &str, content: &str, score: f32) -> ScoredChunk {
    ScoredChunk {
        chunk_id: Uuid::new_v4(),
        document_id: Uuid::new_v4(),
        tenant_id,
        domain,
        content: content.to_string(),
        source_title: title.to_string(),
        score,
    }
}

struct Harness {
    config: AppConfig,
    llm: Arc<dyn LanguageModel>,
    store: Arc<dyn VectorStore>,
    registry: Arc<ToolRegistry>,
    policy: Option<Arc<dyn SufficiencyPolicy>>,
    audit: Arc<MemoryAuditSink>,
    cache: Cache,
}

impl Harness {
    fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            config: config(),
            llm: Arc::new(MockLanguageModel::new(64)),
            store,
            registry: Arc::new(ToolRegistry::new()),
            policy: None,
            audit: Arc::new(MemoryAuditSink::new()),
            cache: Cache::in_memory(),
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        let classifier = IntentClassifier::new(self.llm.clone(), self.config.intent.clone());
        let retriever = VectorRetriever::new(
            self.store.clone(),
            self.llm.clone(),
            self.cache.clone(),
            "mock-embedding".to_string(),
            self.config.retrieval.clone(),
        );
        let executor = ToolExecutor::new(
            self.registry.clone(),
            self.config.tools.max_concurrency,
            Duration::from_secs(self.config.tools.default_timeout_secs),
        );
        let generator = Generator::new(self.llm.clone(), self.config.generator.clone(), 0.2, 512);
        let guardrail = GuardrailValidator::new(self.config.guardrail.clone());
        let policy = self.policy.clone().unwrap_or_else(|| {
            Arc::new(HeuristicPolicy::new(
                self.config.orchestrator.sufficiency_threshold,
                self.config.orchestrator.replan_relax_factor,
                self.config.tools.replan_tools.clone(),
            ))
        });

        Orchestrator::new(
            &self.config,
            classifier,
            retriever,
            executor,
            generator,
            guardrail,
            policy,
            Arc::new(FeedbackStore::new()),
            self.audit.clone(),
            self.cache.clone(),
        )
    }
}

#[tokio::test]
async fn test_happy_path_finalizes_ok() {
    let store = Arc::new(MemoryVectorStore::new());
    let tenant = Uuid::new_v4();
    store.insert(
        chunk(Domain::Hr, tenant, "Szabadság szabályzat", "Évi 25 nap szabadság jár.", 0.91),
        vec![],
    );

    let harness = Harness::new(store);
    let response = harness
        .orchestrator()
        .run(AnswerRequest::new(tenant, "Mi a szabadság politika?"))
        .await;

    assert_eq!(response.status, ResponseStatus::Ok);
    assert!(response.answer.contains("[1]"));
    assert_eq!(response.citations.len(), 1);
    assert_eq!(response.citations[0].domain, Domain::Hr);
    assert_eq!(response.citations[0].rank, 1);
    assert_eq!(response.iterations_used, 0);
    assert!(response.error_code.is_none());
}

#[tokio::test]
async fn test_empty_query_fails_with_validation_code() {
    let harness = Harness::new(Arc::new(MemoryVectorStore::new()));
    let response = harness
        .orchestrator()
        .run(AnswerRequest::new(Uuid::new_v4(), "   "))
        .await;

    assert_eq!(response.status, ResponseStatus::Failed);
    assert_eq!(response.error_code.as_deref(), Some("VALIDATION_ERROR"));
    assert!(response.message.is_some());
}

#[tokio::test]
async fn test_nil_tenant_fails() {
    let harness = Harness::new(Arc::new(MemoryVectorStore::new()));
    let response = harness
        .orchestrator()
        .run(AnswerRequest::new(Uuid::nil(), "valid question"))
        .await;

    assert_eq!(response.status, ResponseStatus::Failed);
}

/// Model that never emits citation markers
struct NoCitationModel {
    inner: MockLanguageModel,
    completions: AtomicU32,
}

impl NoCitationModel {
    fn new() -> Self {
        Self {
            inner: MockLanguageModel::new(64),
            completions: AtomicU32::new(0),
        }
    }
}

#[async_trait::async_trait]
impl LanguageModel for NoCitationModel {
    async fn complete(&self, _: &str, _: f32, _: usize) -> deskwise_common::Result<String> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        Ok("The policy grants twenty-five days.".to_string())
    }
    async fn embed(&self, text: &str) -> deskwise_common::Result<Vec<f32>> {
        self.inner.embed(text).await
    }
    fn model_name(&self) -> &str {
        "no-citation"
    }
    fn dimension(&self) -> usize {
        64
    }
}

#[tokio::test]
async fn test_guardrail_regenerates_then_finalizes_partial() {
    let store = Arc::new(MemoryVectorStore::new());
    let tenant = Uuid::new_v4();
    store.insert(
        chunk(Domain::Hr, tenant, "Leave Policy", "25 vacation days per year.", 0.9),
        vec![],
    );

    let model = Arc::new(NoCitationModel::new());
    let mut harness = Harness::new(store);
    harness.llm = model.clone();

    let response = harness
        .orchestrator()
        .run(AnswerRequest::new(tenant, "How many vacation days do I get?"))
        .await;

    // One initial generation plus two bounded regenerations
    assert_eq!(model.completions.load(Ordering::SeqCst), 3);
    assert_eq!(response.status, ResponseStatus::Partial);
    assert_eq!(response.answer, "The policy grants twenty-five days.");
    assert!(response.message.is_some());
}

/// Policy that counts evaluations and always asks for another pass
struct AlwaysInsufficient {
    evaluations: AtomicU32,
}

impl SufficiencyPolicy for AlwaysInsufficient {
    fn evaluate(&self, state: &WorkflowState) -> Verdict {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        Verdict::Insufficient {
            revised_plan: Plan {
                query: state.plan.query.clone(),
                top_k: state.plan.top_k,
                min_score: state.plan.min_score,
                tool_calls: Vec::new(),
            },
        }
    }
}

#[tokio::test]
async fn test_iteration_ceiling_skips_third_evaluation() {
    let policy = Arc::new(AlwaysInsufficient {
        evaluations: AtomicU32::new(0),
    });

    let mut harness = Harness::new(Arc::new(MemoryVectorStore::new()));
    harness.config.orchestrator.max_iterations = 2;
    harness.policy = Some(policy.clone());

    let response = harness
        .orchestrator()
        .run(AnswerRequest::new(Uuid::new_v4(), "unanswerable question"))
        .await;

    assert_eq!(policy.evaluations.load(Ordering::SeqCst), 2);
    assert_eq!(response.iterations_used, 2);
    assert_eq!(response.status, ResponseStatus::Partial);
}

#[tokio::test]
async fn test_iteration_count_never_exceeds_ceiling() {
    for max_iterations in [1u32, 2, 3] {
        let policy = Arc::new(AlwaysInsufficient {
            evaluations: AtomicU32::new(0),
        });
        let mut harness = Harness::new(Arc::new(MemoryVectorStore::new()));
        harness.config.orchestrator.max_iterations = max_iterations;
        harness.policy = Some(policy);

        let response = harness
            .orchestrator()
            .run(AnswerRequest::new(Uuid::new_v4(), "anything at all"))
            .await;

        assert!(response.iterations_used <= max_iterations);
    }
}

struct LookupTool;

#[async_trait::async_trait]
impl Tool for LookupTool {
    fn name(&self) -> &str {
        "lookup"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": { "query": { "type": "string" } } })
    }
    async fn execute(&self, _: &serde_json::Value) -> deskwise_common::Result<serde_json::Value> {
        Ok(json!({ "answer": "EUR 1 = HUF 395" }))
    }
}

/// Insufficient once (requesting a tool), then sufficient
struct ToolOnce {
    evaluations: AtomicU32,
}

impl SufficiencyPolicy for ToolOnce {
    fn evaluate(&self, state: &WorkflowState) -> Verdict {
        if self.evaluations.fetch_add(1, Ordering::SeqCst) == 0 {
            Verdict::Insufficient {
                revised_plan: Plan {
                    query: state.plan.query.clone(),
                    top_k: state.plan.top_k,
                    min_score: state.plan.min_score,
                    tool_calls: vec![crate::domain::ToolCall {
                        tool_name: "lookup".to_string(),
                        arguments: json!({ "query": state.request.query_text }),
                    }],
                },
            }
        } else {
            Verdict::Sufficient
        }
    }
}

#[tokio::test]
async fn test_replan_runs_tools_then_finalizes() {
    let mut harness = Harness::new(Arc::new(MemoryVectorStore::new()));
    harness.registry = Arc::new(ToolRegistry::new().register(Arc::new(LookupTool)));
    harness.policy = Some(Arc::new(ToolOnce {
        evaluations: AtomicU32::new(0),
    }));

    let response = harness
        .orchestrator()
        .run(AnswerRequest::new(Uuid::new_v4(), "What is the euro exchange rate?"))
        .await;

    assert_eq!(response.status, ResponseStatus::Ok);
    assert_eq!(response.iterations_used, 1);
    assert_eq!(response.tool_summary.len(), 1);
    assert_eq!(response.tool_summary[0].tool_name, "lookup");
    assert_eq!(response.tool_summary[0].status, ToolStatus::Success);
}

/// Counting wrappers used to prove the idempotent path makes no upstream calls
struct CountingModel {
    inner: MockLanguageModel,
    calls: AtomicU32,
}

#[async_trait::async_trait]
impl LanguageModel for CountingModel {
    async fn complete(&self, prompt: &str, t: f32, m: usize) -> deskwise_common::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.complete(prompt, t, m).await
    }
    async fn embed(&self, text: &str) -> deskwise_common::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }
    fn model_name(&self) -> &str {
        "counting"
    }
    fn dimension(&self) -> usize {
        64
    }
}

struct CountingStore {
    inner: MemoryVectorStore,
    calls: AtomicU32,
}

#[async_trait::async_trait]
impl VectorStore for CountingStore {
    async fn search(
        &self,
        tenant_id: Uuid,
        query_vector: &[f32],
        domain: Domain,
        top_k: usize,
        min_score: f32,
    ) -> deskwise_common::Result<Vec<ScoredChunk>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .search(tenant_id, query_vector, domain, top_k, min_score)
            .await
    }

    async fn fetch(&self, tenant_id: Uuid, ids: &[Uuid]) -> deskwise_common::Result<Vec<ScoredChunk>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(tenant_id, ids).await
    }
}

#[tokio::test]
async fn test_idempotent_replay_is_byte_identical_with_zero_upstream_calls() {
    let tenant = Uuid::new_v4();
    let inner = MemoryVectorStore::new();
    inner.insert(
        chunk(Domain::It, tenant, "VPN Guide", "Connect via vpn.example.com.", 0.9),
        vec![],
    );
    let store = Arc::new(CountingStore {
        inner,
        calls: AtomicU32::new(0),
    });
    let model = Arc::new(CountingModel {
        inner: MockLanguageModel::new(64),
        calls: AtomicU32::new(0),
    });

    let mut harness = Harness::new(store.clone());
    harness.llm = model.clone();
    let orchestrator = harness.orchestrator();

    let mut request = AnswerRequest::new(tenant, "How do I connect to the VPN?");
    request.id = Some("req-42".to_string());

    let first = orchestrator.handle(request.clone()).await;
    let store_calls = store.calls.load(Ordering::SeqCst);
    let model_calls = model.calls.load(Ordering::SeqCst);
    assert!(store_calls > 0);
    assert!(model_calls > 0);

    let second = orchestrator.handle(request).await;

    // Byte-identical body, no new upstream work
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(store.calls.load(Ordering::SeqCst), store_calls);
    assert_eq!(model.calls.load(Ordering::SeqCst), model_calls);
}

/// Model whose completions hang long enough to blow the request budget
struct SlowModel {
    inner: MockLanguageModel,
}

#[async_trait::async_trait]
impl LanguageModel for SlowModel {
    async fn complete(&self, _: &str, _: f32, _: usize) -> deskwise_common::Result<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("too late".to_string())
    }
    async fn embed(&self, text: &str) -> deskwise_common::Result<Vec<f32>> {
        self.inner.embed(text).await
    }
    fn model_name(&self) -> &str {
        "slow"
    }
    fn dimension(&self) -> usize {
        64
    }
}

#[tokio::test]
async fn test_wall_clock_budget_forces_partial_finalize() {
    let mut harness = Harness::new(Arc::new(MemoryVectorStore::new()));
    harness.config.orchestrator.request_budget_ms = 100;
    harness.llm = Arc::new(SlowModel {
        inner: MockLanguageModel::new(64),
    });

    let start = Instant::now();
    let response = harness
        .orchestrator()
        // The HR keyword keeps classification lexical, so only the
        // generation stage hits the slow model
        .run(AnswerRequest::new(Uuid::new_v4(), "szabadság question"))
        .await;

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(response.status, ResponseStatus::Partial);
    assert_eq!(response.answer, FALLBACK_MESSAGE);
}

#[tokio::test]
async fn test_audit_trail_records_every_stage() {
    let store = Arc::new(MemoryVectorStore::new());
    let tenant = Uuid::new_v4();
    store.insert(
        chunk(Domain::Finance, tenant, "Expenses", "Submit invoices monthly.", 0.9),
        vec![],
    );

    let harness = Harness::new(store);
    let orchestrator = harness.orchestrator();
    let response = orchestrator
        .run(AnswerRequest::new(tenant, "Where do I submit an invoice?"))
        .await;
    assert_eq!(response.status, ResponseStatus::Ok);

    let workflows = harness.audit.workflows();
    assert_eq!(workflows.len(), 1);
    assert_eq!(workflows[0].status, "finalized");
    assert_eq!(workflows[0].tenant_id, tenant);

    let nodes = harness.audit.nodes();
    let stages: Vec<&str> = nodes.iter().map(|n| n.stage.as_str()).collect();
    assert_eq!(
        stages,
        vec!["classify", "retrieve", "generate", "guardrail", "evaluate"]
    );
    assert!(nodes.iter().all(|n| n.status == "ok"));
}

#[tokio::test]
async fn test_citations_never_cross_domains() {
    let store = Arc::new(MemoryVectorStore::new());
    let tenant = Uuid::new_v4();
    for domain in Domain::ALL {
        for i in 0..3 {
            store.insert(
                chunk(domain, tenant, &format!("{} doc {}", domain, i), "policy content", 0.9),
                vec![],
            );
        }
    }

    let harness = Harness::new(store);
    let response = harness
        .orchestrator()
        .run(AnswerRequest::new(tenant, "How many vacation days do I get?"))
        .await;

    assert!(!response.citations.is_empty());
    assert!(response.citations.iter().all(|c| c.domain == Domain::Hr));
}
