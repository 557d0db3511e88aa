//! Configuration management for DeskWise services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values
//!
//! Every tuned constant of the answer pipeline (feedback tiers, dedup
//! threshold, truncation policy, iteration and wall-clock budgets) lives
//! here rather than in code.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Redis configuration
    pub redis: RedisConfig,

    /// Language model configuration
    pub model: ModelConfig,

    /// Vector store configuration
    pub vector_store: VectorStoreConfig,

    /// Retrieval configuration
    pub retrieval: RetrievalConfig,

    /// Deduplication and ranking configuration
    pub ranking: RankingConfig,

    /// Intent classification configuration
    pub intent: IntentConfig,

    /// Tool execution configuration
    pub tools: ToolsConfig,

    /// Answer generation configuration
    pub generator: GeneratorConfig,

    /// Guardrail configuration
    pub guardrail: GuardrailConfig,

    /// Orchestrator budgets and retry policy
    pub orchestrator: OrchestratorConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Default TTL in seconds
    #[serde(default = "default_redis_ttl")]
    pub default_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// Provider: openai, mock
    #[serde(default = "default_model_provider")]
    pub provider: String,

    /// API key for the model service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Chat model to use
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Embedding model to use
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries inside the client
    #[serde(default = "default_model_retries")]
    pub max_retries: u32,

    /// Sampling temperature for answer generation
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum completion tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    /// Provider: http, memory
    #[serde(default = "default_store_provider")]
    pub provider: String,

    /// Search API base URL
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Collection holding the embedded chunks
    #[serde(default = "default_collection")]
    pub collection: String,

    /// API key, if the store requires one
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Candidates requested per retrieval pass
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum similarity score for a candidate
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// TTL for cached query embeddings, in seconds
    #[serde(default = "default_embedding_cache_ttl")]
    pub embedding_cache_ttl_secs: u64,

    /// TTL for cached query results, in seconds
    #[serde(default = "default_query_cache_ttl")]
    pub query_cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RankingConfig {
    /// Content similarity at or above which two citations are duplicates
    #[serde(default = "default_dedup_threshold")]
    pub dedup_similarity_threshold: f32,

    /// Upper bound of the exact-token overlap boost
    #[serde(default = "default_max_lexical_boost")]
    pub max_lexical_boost: f32,

    /// Like-ratio above which the boost multiplier applies
    #[serde(default = "default_like_boost_threshold")]
    pub like_boost_threshold: f32,

    /// Like-ratio below which the penalty multiplier applies
    #[serde(default = "default_like_penalty_threshold")]
    pub like_penalty_threshold: f32,

    /// Multiplier for well-liked citations
    #[serde(default = "default_boost_multiplier")]
    pub boost_multiplier: f32,

    /// Multiplier for disliked citations
    #[serde(default = "default_penalty_multiplier")]
    pub penalty_multiplier: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IntentConfig {
    /// Keyword-hit ratio required to classify without a model call
    #[serde(default = "default_intent_threshold")]
    pub confidence_threshold: f32,

    /// Per-domain keyword sets; keys are domain names
    #[serde(default = "default_domain_keywords")]
    pub keywords: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    /// Maximum tool calls in flight at once
    #[serde(default = "default_tool_concurrency")]
    pub max_concurrency: usize,

    /// Default per-call timeout in seconds
    #[serde(default = "default_tool_timeout")]
    pub default_timeout_secs: u64,

    /// Follow-up tools the replanner may request, per domain
    #[serde(default)]
    pub replan_tools: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneratorConfig {
    /// Citations included verbatim in the prompt
    #[serde(default = "default_full_citations")]
    pub full_citations: usize,

    /// Character budget for each remaining citation
    #[serde(default = "default_truncate_chars")]
    pub truncate_chars: usize,

    /// Retries for the model call before degrading to the fallback message
    #[serde(default = "default_generator_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuardrailConfig {
    /// Citation marker pattern an answer must contain
    #[serde(default = "default_citation_pattern")]
    pub citation_pattern: String,

    /// Require at least one citation marker when evidence exists
    #[serde(default = "default_require_citation")]
    pub require_citation: bool,

    /// Maximum answer length in characters
    #[serde(default = "default_max_answer_chars")]
    pub max_answer_chars: usize,

    /// Domains exempt from the citation rule
    #[serde(default = "default_exempt_domains")]
    pub exempt_domains: Vec<String>,

    /// Bounded regenerations before finalizing unverified
    #[serde(default = "default_max_regenerations")]
    pub max_regenerations: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Hard ceiling on replan iterations
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Wall-clock budget for a whole request, in milliseconds
    #[serde(default = "default_request_budget")]
    pub request_budget_ms: u64,

    /// Per-stage retry ceiling for retryable upstream errors
    #[serde(default = "default_stage_retries")]
    pub stage_max_retries: u32,

    /// Base backoff delay between stage retries, in milliseconds
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// TTL for idempotency cache entries, in seconds
    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl_secs: u64,

    /// When the replanner relaxes min_score, multiply by this factor
    #[serde(default = "default_replan_relax_factor")]
    pub replan_relax_factor: f32,

    /// Adjusted-score threshold the sufficiency heuristic requires
    #[serde(default = "default_sufficiency_threshold")]
    pub sufficiency_threshold: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_key_prefix() -> String { "deskwise".to_string() }
fn default_redis_ttl() -> u64 { 300 }
fn default_model_provider() -> String { "openai".to_string() }
fn default_chat_model() -> String { crate::DEFAULT_CHAT_MODEL.to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_model_timeout() -> u64 { 30 }
fn default_model_retries() -> u32 { 3 }
fn default_temperature() -> f32 { 0.2 }
fn default_max_tokens() -> usize { 1000 }
fn default_store_provider() -> String { "http".to_string() }
fn default_store_url() -> String { "http://localhost:6333".to_string() }
fn default_collection() -> String { "knowledge_chunks".to_string() }
fn default_store_timeout() -> u64 { 10 }
fn default_top_k() -> usize { 8 }
fn default_min_score() -> f32 { 0.5 }
fn default_embedding_cache_ttl() -> u64 { 86_400 }
fn default_query_cache_ttl() -> u64 { 300 }
fn default_dedup_threshold() -> f32 { 0.97 }
fn default_max_lexical_boost() -> f32 { 0.20 }
fn default_like_boost_threshold() -> f32 { 0.70 }
fn default_like_penalty_threshold() -> f32 { 0.40 }
fn default_boost_multiplier() -> f32 { 1.30 }
fn default_penalty_multiplier() -> f32 { 0.80 }
fn default_intent_threshold() -> f32 { 0.10 }
fn default_tool_concurrency() -> usize { 4 }
fn default_tool_timeout() -> u64 { 10 }
fn default_full_citations() -> usize { 3 }
fn default_truncate_chars() -> usize { 300 }
fn default_generator_retries() -> u32 { 2 }
fn default_citation_pattern() -> String { r"\[(\d+)\]".to_string() }
fn default_require_citation() -> bool { true }
fn default_max_answer_chars() -> usize { 6000 }
fn default_exempt_domains() -> Vec<String> { vec!["general".to_string()] }
fn default_max_regenerations() -> u32 { 2 }
fn default_max_iterations() -> u32 { 3 }
fn default_request_budget() -> u64 { 30_000 }
fn default_stage_retries() -> u32 { 2 }
fn default_retry_backoff() -> u64 { 100 }
fn default_idempotency_ttl() -> u64 { 600 }
fn default_replan_relax_factor() -> f32 { 0.8 }
fn default_sufficiency_threshold() -> f32 { 0.55 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "deskwise".to_string() }

fn default_domain_keywords() -> HashMap<String, Vec<String>> {
    let mut keywords = HashMap::new();
    keywords.insert(
        "hr".to_string(),
        [
            "vacation", "leave", "holiday", "sick", "benefits", "salary", "payroll",
            "onboarding", "policy", "szabadság", "fizetés", "juttatás", "munkaidő",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    );
    keywords.insert(
        "it".to_string(),
        [
            "password", "laptop", "vpn", "email", "login", "network", "printer",
            "software", "jelszó", "hálózat", "nyomtató",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    );
    keywords.insert(
        "finance".to_string(),
        [
            "invoice", "expense", "budget", "reimbursement", "tax", "currency",
            "számla", "költség", "adó",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    );
    keywords
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get the request wall-clock budget as Duration
    pub fn request_budget(&self) -> Duration {
        Duration::from_millis(self.orchestrator.request_budget_ms)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                shutdown_timeout_secs: default_shutdown_timeout(),
            },
            redis: RedisConfig {
                url: default_redis_url(),
                key_prefix: default_key_prefix(),
                default_ttl_secs: default_redis_ttl(),
            },
            model: ModelConfig {
                provider: default_model_provider(),
                api_key: None,
                api_base: None,
                chat_model: default_chat_model(),
                embedding_model: default_embedding_model(),
                dimension: default_embedding_dimension(),
                timeout_secs: default_model_timeout(),
                max_retries: default_model_retries(),
                temperature: default_temperature(),
                max_tokens: default_max_tokens(),
            },
            vector_store: VectorStoreConfig {
                provider: default_store_provider(),
                url: default_store_url(),
                collection: default_collection(),
                api_key: None,
                timeout_secs: default_store_timeout(),
            },
            retrieval: RetrievalConfig {
                top_k: default_top_k(),
                min_score: default_min_score(),
                embedding_cache_ttl_secs: default_embedding_cache_ttl(),
                query_cache_ttl_secs: default_query_cache_ttl(),
            },
            ranking: RankingConfig {
                dedup_similarity_threshold: default_dedup_threshold(),
                max_lexical_boost: default_max_lexical_boost(),
                like_boost_threshold: default_like_boost_threshold(),
                like_penalty_threshold: default_like_penalty_threshold(),
                boost_multiplier: default_boost_multiplier(),
                penalty_multiplier: default_penalty_multiplier(),
            },
            intent: IntentConfig {
                confidence_threshold: default_intent_threshold(),
                keywords: default_domain_keywords(),
            },
            tools: ToolsConfig {
                max_concurrency: default_tool_concurrency(),
                default_timeout_secs: default_tool_timeout(),
                replan_tools: HashMap::new(),
            },
            generator: GeneratorConfig {
                full_citations: default_full_citations(),
                truncate_chars: default_truncate_chars(),
                max_retries: default_generator_retries(),
            },
            guardrail: GuardrailConfig {
                citation_pattern: default_citation_pattern(),
                require_citation: default_require_citation(),
                max_answer_chars: default_max_answer_chars(),
                exempt_domains: default_exempt_domains(),
                max_regenerations: default_max_regenerations(),
            },
            orchestrator: OrchestratorConfig {
                max_iterations: default_max_iterations(),
                request_budget_ms: default_request_budget(),
                stage_max_retries: default_stage_retries(),
                retry_backoff_ms: default_retry_backoff(),
                idempotency_ttl_secs: default_idempotency_ttl(),
                replan_relax_factor: default_replan_relax_factor(),
                sufficiency_threshold: default_sufficiency_threshold(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.orchestrator.max_iterations, 3);
        assert_eq!(config.generator.full_citations, 3);
        assert_eq!(config.generator.truncate_chars, 300);
    }

    #[test]
    fn test_feedback_tiers_are_config() {
        let config = AppConfig::default();
        assert!(config.ranking.like_boost_threshold > config.ranking.like_penalty_threshold);
        assert!(config.ranking.boost_multiplier > 1.0);
        assert!(config.ranking.penalty_multiplier < 1.0);
    }

    #[test]
    fn test_default_keywords_cover_domains() {
        let keywords = default_domain_keywords();
        assert!(keywords.contains_key("hr"));
        assert!(keywords.contains_key("it"));
        assert!(keywords.contains_key("finance"));
        assert!(keywords["hr"].iter().any(|k| k == "szabadság"));
    }

    #[test]
    fn test_request_budget_duration() {
        let config = AppConfig::default();
        assert_eq!(config.request_budget(), Duration::from_millis(30_000));
    }
}
