use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use clinic_authz::{Outcome, Subject, middleware::unavailable_response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::server::AppState;

/// Body of `POST /v1/decide`.
#[derive(Debug, Clone, Deserialize)]
pub struct DecideRequest {
    pub method: String,
    pub path: String,
    pub subject: Subject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecideResponse {
    pub decision: DecisionKind,
}

pub async fn healthz() -> impl IntoResponse {
    "ok"
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ready",
        "rules": state.evaluator.policy().len(),
    }))
}

/// Decides a request forwarded by a gateway.
/// The diagnostic reason is logged, never returned.
pub async fn decide(State(state): State<AppState>, Json(body): Json<DecideRequest>) -> Response {
    let decision = state
        .evaluator
        .decide_raw(&body.method, &body.path, &body.subject)
        .await;

    let kind = match decision.outcome {
        Outcome::Allow => DecisionKind::Allow,
        Outcome::Deny => DecisionKind::Deny,
        Outcome::InternalError => return unavailable_response(),
    };
    tracing::debug!(
        subject = %body.subject.id,
        method = %body.method,
        path = %body.path,
        decision = ?kind,
        reason = ?decision.reason,
        "Decision served"
    );
    Json(DecideResponse { decision: kind }).into_response()
}
