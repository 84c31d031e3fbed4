//! HTTP surface of the registration service.

mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::{Config, ServerConfig};
use crate::features::FeatureExtractor;
use crate::logging::MetricsCollector;
use crate::pipeline::Registrar;

pub use handlers::RegisterResponse;

/// Shared, read-only state of the service
#[derive(Clone)]
pub struct ServerState {
    pub registrar: Arc<Registrar>,
    pub metrics: Arc<MetricsCollector>,
    pub config: ServerConfig,
    permits: Arc<Semaphore>,
    seed: Option<u64>,
}

impl ServerState {
    /// Build the state from configuration. The request budget becomes the
    /// solver deadline unless the ransac section sets its own.
    pub fn from_config(config: &Config, extractor: Arc<dyn FeatureExtractor>) -> crate::Result<Self> {
        let mut registration = config.registration();
        if registration.ransac.timeout_ms.is_none() {
            registration.ransac.timeout_ms = Some(config.server.request_timeout_ms);
        }

        let metrics = Arc::new(MetricsCollector::new(true));
        let registrar = Registrar::new(extractor, registration)?.with_metrics(metrics.clone());

        Ok(Self {
            registrar: Arc::new(registrar),
            metrics,
            permits: Arc::new(Semaphore::new(config.server.max_concurrent_requests.max(1))),
            config: config.server.clone(),
            seed: None,
        })
    }

    /// Seed every request's RNG with `seed`, making responses reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

pub fn build_router(state: ServerState) -> Router {
    let cors = if state.config.enable_cors {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };
    let body_limit = state.config.max_body_mb.saturating_mul(1024 * 1024);

    Router::new()
        .route("/", get(handlers::banner).post(handlers::register))
        .route("/api/register", post(handlers::register))
        .route("/api/stats", get(handlers::stats))
        .route("/health", get(handlers::health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

pub struct RegistrationServer {
    state: ServerState,
}

impl RegistrationServer {
    pub fn new(state: ServerState) -> Self {
        Self { state }
    }

    pub async fn run(self) -> crate::Result<()> {
        let address = format!("{}:{}", self.state.config.host, self.state.config.port);
        let extractor = self.state.registrar.extractor_name().to_string();
        let app = build_router(self.state);

        let listener = tokio::net::TcpListener::bind(&address).await?;
        tracing::info!(%address, %extractor, "Registration service listening");

        axum::serve(listener, app).await?;
        Ok(())
    }
}
