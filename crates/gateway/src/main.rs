//! DeskWise API Gateway
//!
//! The external entry point for answer requests.
//! Handles:
//! - Authentication context extraction
//! - Request routing
//! - Engine wiring (providers chosen from configuration)
//! - Observability (logging, metrics, tracing)

mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use deskwise_common::{
    cache::{Cache, CacheStore, MemoryStore, RedisStore},
    config::AppConfig,
    llm::create_language_model,
    metrics,
};
use deskwise_engine::{
    audit::TracingAuditSink,
    retrieval::{HttpVectorStore, MemoryVectorStore},
    FeedbackStore, Orchestrator, ToolRegistry, VectorStore,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub feedback: Arc<FeedbackStore>,
    pub cache: Cache,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.observability.log_level.clone()));
    if config.observability.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    info!("Starting DeskWise API Gateway v{}", deskwise_common::VERSION);

    let config = Arc::new(config);

    // Initialize metrics
    metrics::register_metrics();
    if config.observability.metrics_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!("Prometheus exporter listening on {}", addr);
    }

    // Build the engine from configured providers
    let state = build_state(config.clone()).await?;

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Construct the shared state: cache, model, store, registry, orchestrator
async fn build_state(config: Arc<AppConfig>) -> Result<AppState, Box<dyn std::error::Error>> {
    // Cache: Redis when reachable, in-process otherwise. The engine treats
    // the cache as an optimization plus idempotency store; a degraded
    // single-node cache keeps the gateway serviceable.
    let store: Arc<dyn CacheStore> =
        match RedisStore::connect(&config.redis.url, &config.redis.key_prefix).await {
            Ok(store) => {
                info!(url = %config.redis.url, "Connected to Redis");
                Arc::new(store)
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, using in-process cache");
                Arc::new(MemoryStore::new())
            }
        };
    let cache = Cache::new(store);

    let llm = create_language_model(&config.model)?;
    info!(
        provider = %config.model.provider,
        model = llm.model_name(),
        "Language model ready"
    );

    let vector_store: Arc<dyn VectorStore> = match config.vector_store.provider.as_str() {
        "memory" => Arc::new(MemoryVectorStore::new()),
        _ => Arc::new(HttpVectorStore::new(
            config.vector_store.url.clone(),
            config.vector_store.collection.clone(),
            config.vector_store.api_key.clone(),
            config.vector_store.timeout_secs,
        )?),
    };

    // Tools are registered here, once, and injected; deployments add their
    // own capabilities to this registry
    let registry = Arc::new(ToolRegistry::new());
    info!(tools = registry.len(), "Tool registry built");

    let feedback = Arc::new(FeedbackStore::new());
    let orchestrator = Arc::new(Orchestrator::assemble(
        &config,
        llm,
        vector_store,
        registry,
        feedback.clone(),
        Arc::new(TracingAuditSink),
        cache.clone(),
    ));

    Ok(AppState {
        config,
        orchestrator,
        feedback,
        cache,
    })
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let api_routes = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Answer endpoint
        .route("/answers", post(handlers::answers::answer))
        // Feedback endpoint
        .route("/feedback", post(handlers::feedback::record_feedback));

    // Compose the app
    Router::new()
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
