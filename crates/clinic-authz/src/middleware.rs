//! Axum middleware that gates requests on the evaluator's decision.
//!
//! The middleware holds no policy of its own. It expects the authentication
//! layer to have stored a [`Subject`] in the request extensions and maps the
//! [`Decision`] onto pipeline control flow:
//!
//! | Decision        | Response                      |
//! |-----------------|-------------------------------|
//! | no subject      | 401, handler not reached      |
//! | Allow           | forwarded unchanged           |
//! | Deny            | 403, handler not reached      |
//! | InternalError   | 503, handler not reached      |
//!
//! The path is percent-decoded per segment before matching, so rules see the
//! same parameter values as the handler's `Path` extractor.
//!
//! A [`CancellationToken`] found in the request extensions is passed to the
//! evaluator. Cancelling it while a clinician lookup is pending ends the
//! request with 503. Without one, a dropped request still stops evaluation
//! because the middleware future is dropped with it.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware, routing::get};
//! use clinic_authz::middleware::{AuthorizationState, authorization_middleware};
//!
//! let app = Router::new()
//!     .route("/v1/clinics", get(list_clinics))
//!     .layer(middleware::from_fn_with_state(
//!         AuthorizationState::new(evaluator),
//!         authorization_middleware,
//!     ))
//!     .layer(middleware::from_fn(authenticate));
//! ```

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::context::Subject;
use crate::evaluator::{Decision, Outcome, PolicyEvaluator};
use crate::request::{Method, RequestDescriptor};

/// State required for the authorization middleware.
#[derive(Clone)]
pub struct AuthorizationState {
    /// Decision engine.
    pub evaluator: Arc<PolicyEvaluator>,
}

impl AuthorizationState {
    /// Creates a new authorization state.
    #[must_use]
    pub fn new(evaluator: Arc<PolicyEvaluator>) -> Self {
        Self { evaluator }
    }
}

/// Authorization gate for `axum::middleware::from_fn_with_state`.
pub async fn authorization_middleware(
    State(state): State<AuthorizationState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(subject) = req.extensions().get::<Subject>().cloned() else {
        tracing::debug!(path = %req.uri().path(), "Rejecting request without subject");
        return unauthorized_response();
    };

    let cancel = req
        .extensions()
        .get::<CancellationToken>()
        .cloned()
        .unwrap_or_default();

    let decision = match Method::try_from(req.method()) {
        Ok(method) => {
            let request = RequestDescriptor::from_encoded(method, req.uri().path());
            state
                .evaluator
                .decide_cancellable(&request, &subject, &cancel)
                .await
        }
        Err(e) => Decision::deny(e.to_string()),
    };

    match decision.outcome {
        Outcome::Allow => next.run(req).await,
        Outcome::Deny => {
            tracing::info!(
                subject = %subject.id,
                method = %req.method(),
                path = %req.uri().path(),
                reason = ?decision.reason,
                "Access denied"
            );
            forbidden_response()
        }
        Outcome::InternalError => {
            tracing::warn!(
                subject = %subject.id,
                method = %req.method(),
                path = %req.uri().path(),
                reason = ?decision.reason,
                "Authorization unavailable"
            );
            unavailable_response()
        }
    }
}

/// Response for requests that carry no subject (401).
#[must_use]
pub fn unauthorized_response() -> Response {
    error_response(StatusCode::UNAUTHORIZED, "unauthorized")
}

/// Generic response for denied requests (403).
///
/// Carries no detail about the rule or resource involved.
#[must_use]
pub fn forbidden_response() -> Response {
    error_response(StatusCode::FORBIDDEN, "forbidden")
}

/// Response when a decision could not be made (503).
#[must_use]
pub fn unavailable_response() -> Response {
    error_response(StatusCode::SERVICE_UNAVAILABLE, "temporarily unavailable")
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let body = json!({
        "code": status.as_u16(),
        "message": message,
    });
    (status, Json(body)).into_response()
}
