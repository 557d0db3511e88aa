//! DeskWise Answer Engine
//!
//! The stateful control loop that turns a natural-language question into a
//! cited, guardrail-checked answer:
//! - Intent classification into a knowledge domain
//! - Domain-isolated vector retrieval with deduplicating, feedback-adjusted
//!   ranking
//! - Concurrent tool execution with per-call timeouts
//! - Bounded generation, guardrail validation, and replanning
//! - An orchestrator state machine enforcing iteration and wall-clock budgets
//!
//! The orchestrator owns one `WorkflowState` per request; stages receive the
//! state by value and return the updated value, never sharing it across
//! requests.

pub mod audit;
pub mod domain;
pub mod feedback;
pub mod generate;
pub mod guardrail;
pub mod intent;
pub mod orchestrator;
pub mod retrieval;
pub mod sufficiency;
pub mod tools;

pub use domain::{AnswerRequest, AnswerResponse, Citation, Domain, ResponseStatus};
pub use feedback::FeedbackStore;
pub use orchestrator::Orchestrator;
pub use retrieval::{VectorRetriever, VectorStore};
pub use tools::{Tool, ToolExecutor, ToolRegistry};
