//! Rate limiting middleware.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::RateLimitConfig;
use crate::http::request::client_identity;
use crate::rate_limit::limiter::RateLimiter;

/// State for the rate limiting middleware.
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub trust_forwarded_for: bool,
}

impl RateLimitState {
    pub fn new(limiter: RateLimiter, config: &RateLimitConfig) -> Self {
        Self {
            limiter: Arc::new(limiter),
            trust_forwarded_for: config.trust_forwarded_for,
        }
    }
}

/// Reject clients over budget; count allowed requests after they complete.
///
/// The ticket is held across the downstream call, so a request whose future
/// is dropped (disconnect, timeout, panic) is counted when the ticket drops.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.limiter.is_enabled() {
        return next.run(request).await;
    }

    let identity = client_identity(&request, state.trust_forwarded_for);
    match state.limiter.check(&identity).await {
        Ok(ticket) => {
            let response = next.run(request).await;
            // Fire and forget: the response does not wait on the increment.
            let _ = state.limiter.record(ticket);
            response
        }
        Err(err) => {
            tracing::debug!(client = %identity, path = %request.uri().path(), "Request rejected by rate limiter");
            err.into_response()
        }
    }
}
