use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    routing::{get, post},
};
use clinic_authz::{ClinicianContextResolver, PolicyEvaluator, StaticClinicianResolver};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::{config::AppConfig, handlers, http_resolver::HttpClinicianResolver};

/// Shared state for the decision endpoints.
#[derive(Clone)]
pub struct AppState {
    pub evaluator: Arc<PolicyEvaluator>,
}

/// Errors that prevent the service from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("rule compilation failed: {0}")]
    Compile(#[from] clinic_authz::CompileError),
    #[error("membership resolver setup failed: {0}")]
    Resolver(#[from] clinic_authz::ResolverError),
    #[error("invalid membership base URL: {0}")]
    BaseUrl(#[from] url::ParseError),
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/v1/decide", post(handlers::decide))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::debug!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
}

/// Builds the membership resolver named by the configuration.
pub fn build_resolver(cfg: &AppConfig) -> Result<Arc<dyn ClinicianContextResolver>, StartupError> {
    match &cfg.membership.base_url {
        Some(base_url) => {
            let url = Url::parse(base_url)?;
            tracing::info!(base_url = %url, "Using membership service for clinician lookups");
            Ok(Arc::new(HttpClinicianResolver::new(
                url,
                cfg.membership.request_timeout,
            )?))
        }
        None => {
            tracing::warn!(
                "membership.base_url not set; clinician lookups use an empty in-memory table"
            );
            Ok(Arc::new(StaticClinicianResolver::new()))
        }
    }
}

pub struct DecisionServer {
    addr: SocketAddr,
    app: Router,
}

pub struct ServerBuilder {
    config: AppConfig,
    resolver: Option<Arc<dyn ClinicianContextResolver>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            resolver: None,
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Overrides the resolver otherwise derived from `membership`.
    pub fn with_resolver(mut self, resolver: Arc<dyn ClinicianContextResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Compiles the rules and wires the evaluator. Fails before any socket
    /// is bound.
    pub fn build(self) -> Result<DecisionServer, StartupError> {
        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => build_resolver(&self.config)?,
        };
        let evaluator = PolicyEvaluator::from_config(&self.config.authz, resolver)?;
        tracing::info!(
            rules = evaluator.policy().len(),
            resolver_timeout = ?self.config.authz.resolver_timeout,
            "Access rules compiled"
        );

        let state = AppState {
            evaluator: Arc::new(evaluator),
        };
        Ok(DecisionServer {
            addr: self.config.addr(),
            app: build_app(state),
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionServer {
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
