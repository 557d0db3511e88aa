//! DeskWise Common Library
//!
//! Shared code for the DeskWise services including:
//! - Error types and handling
//! - Configuration management
//! - Cache store abstraction (Redis + in-memory)
//! - Language model client abstraction
//! - Authentication utilities
//! - Metrics and observability

pub mod auth;
pub mod cache;
pub mod config;
pub mod errors;
pub mod llm;
pub mod metrics;

// Re-export commonly used types
pub use cache::{Cache, CacheStore};
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use llm::LanguageModel;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default chat model
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
