//! Answer endpoint handler

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Deserialize;
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use deskwise_common::{
    auth::AuthContext,
    errors::{AppError, Result},
};
use deskwise_engine::{AnswerRequest, AnswerResponse};

/// Answer request body
#[derive(Debug, Deserialize, Validate)]
pub struct AskRequest {
    /// The natural-language question
    #[validate(length(min = 1, max = 4000))]
    pub query: String,

    /// Conversation session, when the client tracks one
    pub session_id: Option<Uuid>,
}

/// Answer a question. The optional X-Request-Id header acts as the
/// idempotency key: retries with the same id replay the cached response.
pub async fn answer(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<AskRequest>,
) -> Result<Json<AnswerResponse>> {
    let start = Instant::now();

    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let answer_request = AnswerRequest {
        id: auth.request_id.clone(),
        tenant_id: auth.tenant_id,
        user_id: auth.user_id,
        session_id: request.session_id,
        query_text: request.query,
        submitted_at: Utc::now(),
    };

    let response = state.orchestrator.handle(answer_request).await;

    tracing::info!(
        tenant_id = %auth.tenant_id,
        status = ?response.status,
        citations = response.citations.len(),
        iterations = response.iterations_used,
        latency_ms = start.elapsed().as_millis() as u64,
        "Answer request completed"
    );

    Ok(Json(response))
}
