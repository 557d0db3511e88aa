//! Citation feedback handler

use axum::{extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use deskwise_common::{
    auth::AuthContext,
    errors::{AppError, Result},
};
use deskwise_engine::domain::{Domain, FeedbackRecord, FeedbackType};

/// Feedback request body
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    /// Citation (chunk) the feedback applies to
    pub citation_id: Uuid,

    /// Domain the citation was served under
    pub domain: String,

    /// "like" or "dislike"
    pub feedback_type: FeedbackType,

    /// Session the answer was served in
    pub session_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct FeedbackResponse {
    pub status: String,
}

/// Record one like/dislike event for a citation
pub async fn record_feedback(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>> {
    let user_id = auth.user_id.ok_or_else(|| AppError::MissingField {
        field: "X-User-ID".to_string(),
    })?;

    let domain = Domain::parse(&request.domain).ok_or_else(|| AppError::InvalidFormat {
        message: format!("unknown domain: {}", request.domain),
    })?;

    state.feedback.record(FeedbackRecord {
        citation_id: request.citation_id,
        domain,
        feedback_type: request.feedback_type,
        user_id,
        session_id: request.session_id,
        recorded_at: Utc::now(),
    });

    tracing::info!(
        citation_id = %request.citation_id,
        domain = %domain,
        feedback = ?request.feedback_type,
        user_id = %user_id,
        "Feedback recorded"
    );

    Ok(Json(FeedbackResponse {
        status: "recorded".to_string(),
    }))
}
