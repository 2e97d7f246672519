//! The authorization middleware in front of a router.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get},
};
use clinic_authz::{
    AuthorizationState, ClinicianContext, ClinicianContextResolver, ClinicianRole, CompiledPolicy,
    PolicyEvaluator, ResolverError, StaticClinicianResolver, Subject, authorization_middleware,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct UnreachableStore;

#[async_trait]
impl ClinicianContextResolver for UnreachableStore {
    async fn resolve(
        &self,
        _subject_id: &str,
        _clinic_id: &str,
    ) -> Result<Option<ClinicianContext>, ResolverError> {
        Err(ResolverError::transport("membership store unreachable"))
    }
}

/// Test stand-in for the authentication layer: reads the caller from headers.
/// `x-cancelled` attaches an already cancelled request token.
async fn authenticate(mut req: Request<Body>, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-subject")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    let service = req.headers().contains_key("x-service");
    if req.headers().contains_key("x-cancelled") {
        let token = CancellationToken::new();
        token.cancel();
        req.extensions_mut().insert(token);
    }
    if let Some(id) = id {
        req.extensions_mut().insert(Subject {
            id,
            is_service_principal: service,
        });
    }
    next.run(req).await
}

fn app(resolver: Arc<dyn ClinicianContextResolver>, hits: Arc<AtomicUsize>) -> Router {
    let policy = Arc::new(CompiledPolicy::clinic().unwrap());
    let evaluator = Arc::new(PolicyEvaluator::new(policy, resolver));

    let counter = move || {
        let hits = hits.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            "ok"
        }
    };

    Router::new()
        .route("/v1/clinics", get(counter.clone()))
        .route(
            "/v1/clinics/{clinicId}/patients/{patientId}",
            delete(counter),
        )
        .fallback(|| async { StatusCode::NOT_FOUND })
        .layer(middleware::from_fn_with_state(
            AuthorizationState::new(evaluator),
            authorization_middleware,
        ))
        .layer(middleware::from_fn(authenticate))
}

fn request(method: &str, uri: &str, subject: Option<&str>, service: bool) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(subject) = subject {
        builder = builder.header("x-subject", subject);
    }
    if service {
        builder = builder.header("x-service", "1");
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn allowed_request_reaches_handler() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = app(Arc::new(StaticClinicianResolver::new()), hits.clone());

    let response = app
        .oneshot(request("GET", "/v1/clinics", Some("hydrophone"), true))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn denied_request_never_reaches_handler() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = app(Arc::new(StaticClinicianResolver::new()), hits.clone());

    let response = app
        .oneshot(request("GET", "/v1/clinics", Some("1234567890"), false))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({ "code": 403, "message": "forbidden" })
    );
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_route_is_forbidden_not_not_found() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = app(Arc::new(StaticClinicianResolver::new()), hits.clone());

    let response = app
        .oneshot(request("GET", "/v1/secret/things", Some("u1"), false))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn missing_subject_is_unauthorized() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = app(Arc::new(StaticClinicianResolver::new()), hits.clone());

    let response = app
        .oneshot(request("GET", "/v1/clinics", None, false))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn resolver_outage_is_unavailable() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = app(Arc::new(UnreachableStore), hits.clone());

    let response = app
        .oneshot(request("DELETE", "/v1/clinics/c1/patients/p1", Some("other"), false))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["message"], "temporarily unavailable");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn self_delete_succeeds_during_resolver_outage() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = app(Arc::new(UnreachableStore), hits.clone());

    let response = app
        .oneshot(request("DELETE", "/v1/clinics/c1/patients/p1", Some("p1"), false))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn clinic_admin_delete_reaches_handler() {
    let hits = Arc::new(AtomicUsize::new(0));
    let resolver =
        StaticClinicianResolver::new().with_clinician("c1", "admin", [ClinicianRole::ClinicAdmin]);
    let app = app(Arc::new(resolver), hits.clone());

    let response = app
        .oneshot(request("DELETE", "/v1/clinics/c1/patients/p1", Some("admin"), false))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn encoded_owner_segment_matches_decoded_subject() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = app(Arc::new(StaticClinicianResolver::new()), hits.clone());

    let response = app
        .oneshot(request("DELETE", "/v1/clinics/c1/patients/p%201", Some("p 1"), false))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn encoded_clinic_id_is_resolved_decoded() {
    let hits = Arc::new(AtomicUsize::new(0));
    let resolver = StaticClinicianResolver::new().with_clinician(
        "clinic one",
        "admin",
        [ClinicianRole::ClinicAdmin],
    );
    let app = app(Arc::new(resolver), hits.clone());

    let response = app
        .oneshot(request(
            "DELETE",
            "/v1/clinics/clinic%20one/patients/p1",
            Some("admin"),
            false,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_request_token_is_unavailable() {
    let hits = Arc::new(AtomicUsize::new(0));
    let resolver =
        StaticClinicianResolver::new().with_clinician("c1", "admin", [ClinicianRole::ClinicAdmin]);
    let app = app(Arc::new(resolver), hits.clone());

    let mut req = request("DELETE", "/v1/clinics/c1/patients/p1", Some("admin"), false);
    req.headers_mut()
        .insert("x-cancelled", axum::http::HeaderValue::from_static("1"));
    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelled_token_does_not_block_grants_without_roles() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = app(Arc::new(StaticClinicianResolver::new()), hits.clone());

    let mut req = request("DELETE", "/v1/clinics/c1/patients/p1", Some("p1"), false);
    req.headers_mut()
        .insert("x-cancelled", axum::http::HeaderValue::from_static("1"));
    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
