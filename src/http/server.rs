//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the demo handlers
//! - Wrap it with the guard pipeline
//! - Wire up ambient middleware (request id, tracing, timeout)
//! - Serve with peer addresses and graceful shutdown

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    routing::{any, get},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GuardConfig;
use crate::http::handlers;
use crate::lifecycle::Shutdown;
use crate::pipeline::GuardPipeline;

/// HTTP server fronted by the guard pipeline.
pub struct GuardServer {
    router: Router,
    config: GuardConfig,
}

impl GuardServer {
    pub fn new(config: GuardConfig, pipeline: &GuardPipeline) -> Self {
        let router = Self::build_router(&config, pipeline);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(config: &GuardConfig, pipeline: &GuardPipeline) -> Router {
        let routes = Router::new()
            .route("/health", get(handlers::health))
            .route("/echo", any(handlers::echo))
            .route("/items/{id}", any(handlers::item));

        pipeline
            .apply(routes)
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.listener.request_timeout_secs,
            )))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(Shutdown::wait(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
