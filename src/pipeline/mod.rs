//! Guard pipeline assembly.
//!
//! # Order
//! ```text
//! request
//!     → admission   (outermost: holds a slot for everything below)
//!     → rate limit  (per-client budget over shared counters)
//!     → signature   (route layer: sees routed path parameters)
//!     → handler
//! ```
//!
//! A rejection at any step short-circuits the rest. The admission slot is
//! released when the response (or rejection) leaves the admission layer.

use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, Router};

use crate::admission::{admission_middleware, AdmissionState};
use crate::config::{GuardConfig, StoreKind};
use crate::rate_limit::{
    rate_limit_middleware, CounterStore, MemoryCounterStore, RateLimitSettings, RateLimitState,
    RateLimiter, RedisCounterStore,
};
use crate::signature::{signature_middleware, SignatureVerifier};

/// Upper bound on the initial Redis connection attempt.
const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// The three guards, ready to wrap a router.
#[derive(Clone)]
pub struct GuardPipeline {
    pub admission: AdmissionState,
    pub rate_limit: RateLimitState,
    /// `None` leaves every route unsigned.
    pub signature: Option<Arc<SignatureVerifier>>,
}

impl GuardPipeline {
    pub fn new(
        admission: AdmissionState,
        rate_limit: RateLimitState,
        signature: Option<SignatureVerifier>,
    ) -> Self {
        Self {
            admission,
            rate_limit,
            signature: signature.map(Arc::new),
        }
    }

    /// Build every guard from configuration.
    ///
    /// An unreachable Redis disables rate limiting rather than failing
    /// startup; the error is logged.
    pub async fn from_config(config: &GuardConfig) -> Self {
        let settings = RateLimitSettings::from(&config.rate_limit);
        let limiter = if config.rate_limit.limit == 0 {
            RateLimiter::disabled(settings)
        } else {
            match build_store(config).await {
                Some(store) => RateLimiter::new(store, settings),
                None => RateLimiter::disabled(settings),
            }
        };

        tracing::info!(
            admission_capacity = config.admission.capacity,
            rate_limit = config.rate_limit.limit,
            rate_limit_enabled = limiter.is_enabled(),
            signature_enabled = config.signature.enabled,
            "Guard pipeline configured"
        );

        let signature = config
            .signature
            .enabled
            .then(|| SignatureVerifier::from_config(&config.signature));

        Self::new(
            AdmissionState::from_config(&config.admission),
            RateLimitState::new(limiter, &config.rate_limit),
            signature,
        )
    }

    /// Wrap `router` with the guards. Call after every route is added,
    /// since the signature step is a route layer.
    pub fn apply<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let router = match &self.signature {
            Some(verifier) => router.route_layer(middleware::from_fn_with_state(
                verifier.clone(),
                signature_middleware,
            )),
            None => router,
        };

        router
            .layer(middleware::from_fn_with_state(
                self.rate_limit.clone(),
                rate_limit_middleware,
            ))
            .layer(middleware::from_fn_with_state(
                self.admission.clone(),
                admission_middleware,
            ))
    }
}

async fn build_store(config: &GuardConfig) -> Option<Arc<dyn CounterStore>> {
    match config.rate_limit.store {
        StoreKind::Memory => Some(Arc::new(MemoryCounterStore::new())),
        StoreKind::Redis => {
            match tokio::time::timeout(
                REDIS_CONNECT_TIMEOUT,
                RedisCounterStore::connect(&config.redis),
            )
            .await
            {
                Ok(Ok(store)) => Some(Arc::new(store)),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, url = %config.redis.url, "Redis unavailable, rate limiting disabled");
                    None
                }
                Err(_) => {
                    tracing::error!(url = %config.redis.url, "Redis connect timed out, rate limiting disabled");
                    None
                }
            }
        }
    }
}
