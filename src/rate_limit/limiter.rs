//! Per-identity fixed-window rate limiter.
//!
//! Default mode mirrors a read-then-increment-after counter:
//!
//! ```text
//! check:   GET  <namespace>:<identity>   → count >= limit ? reject : allow
//! handler runs
//! record:  INCR <namespace>:<identity>   (spawned, not awaited)
//!          PEXPIRE window if no TTL yet
//! ```
//!
//! The increment is owned by the [`RateTicket`]: a ticket that is dropped
//! without being recorded (client gone, request timed out, handler panic)
//! still counts the request.
//!
//! The read and the increment are separate round-trips, so concurrent
//! requests from one identity can all pass the read before any increment
//! lands and overshoot `limit`. `strict` mode closes that gap by
//! incrementing atomically before the request and comparing the result.
//!
//! Storage faults and timeouts fail open: the request is allowed and the
//! fault is logged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;

use crate::config::RateLimitConfig;
use crate::error::GuardError;
use crate::rate_limit::store::{CounterRecord, CounterStore, StoreError};

/// Tunables for one limiter instance.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub limit: u64,
    pub window: Duration,
    pub namespace: String,
    pub store_timeout: Duration,
    pub strict: bool,
}

impl From<&RateLimitConfig> for RateLimitSettings {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            limit: config.limit,
            window: config.window(),
            namespace: config.namespace.clone(),
            store_timeout: config.store_timeout(),
            strict: config.strict,
        }
    }
}

/// An allowed request's pending bookkeeping.
///
/// Holds the increment owed for the request. It is spawned by
/// [`RateLimiter::record`] or, failing that, when the ticket is dropped.
#[must_use = "hold the ticket until the request completes"]
pub struct RateTicket {
    key: String,
    pending: Option<PendingIncrement>,
}

struct PendingIncrement {
    store: Arc<dyn CounterStore>,
    window: Duration,
    deadline: Duration,
}

impl RateTicket {
    fn counted(key: String) -> Self {
        Self { key, pending: None }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether an increment is still owed.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn spawn_increment(&mut self) -> Option<JoinHandle<()>> {
        let PendingIncrement {
            store,
            window,
            deadline,
        } = self.pending.take()?;
        let key = std::mem::take(&mut self.key);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(key = %key, "No runtime to record request, increment lost");
            return None;
        };

        Some(runtime.spawn(async move {
            let outcome = tokio::time::timeout(deadline, store.increment(&key, window)).await;
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => log_store_error("increment", &key, &err),
                Err(_) => log_store_error("increment", &key, &StoreError::Timeout(deadline)),
            }
        }))
    }
}

impl std::fmt::Debug for RateTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateTicket")
            .field("key", &self.key)
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl Drop for RateTicket {
    fn drop(&mut self) {
        // Abandoned requests count too.
        let _ = self.spawn_increment();
    }
}

/// Stateless limiter over a shared [`CounterStore`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Option<Arc<dyn CounterStore>>,
    settings: RateLimitSettings,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, settings: RateLimitSettings) -> Self {
        Self {
            store: Some(store),
            settings,
        }
    }

    /// A limiter that allows everything, used when no store is reachable.
    pub fn disabled(settings: RateLimitSettings) -> Self {
        Self {
            store: None,
            settings,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.limit > 0 && self.store.is_some()
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Counter key for a client identity.
    pub fn key_for(&self, identity: &str) -> String {
        format!("{}:{}", self.settings.namespace, identity)
    }

    /// Decide whether `identity` may proceed.
    pub async fn check(&self, identity: &str) -> Result<RateTicket, GuardError> {
        let key = self.key_for(identity);
        let Some(store) = self.store.as_ref().filter(|_| self.settings.limit > 0) else {
            return Ok(RateTicket::counted(key));
        };

        if self.settings.strict {
            return match self.bounded(store.increment(&key, self.settings.window)).await {
                Ok(record) if record.count > self.settings.limit => Err(self.reject(&key, record)),
                Ok(_) => Ok(self.allow(key, None)),
                Err(err) => Ok(self.fail_open(key, None, "increment", err)),
            };
        }

        let pending = PendingIncrement {
            store: store.clone(),
            window: self.settings.window,
            deadline: self.settings.store_timeout,
        };
        match self.bounded(store.get(&key)).await {
            Ok(record) if record.count >= self.settings.limit => Err(self.reject(&key, record)),
            Ok(_) => Ok(self.allow(key, Some(pending))),
            Err(err) => Ok(self.fail_open(key, Some(pending), "get", err)),
        }
    }

    /// Count a completed request. The increment runs on its own task; the
    /// returned handle may be dropped. `None` when nothing was owed.
    pub fn record(&self, mut ticket: RateTicket) -> Option<JoinHandle<()>> {
        ticket.spawn_increment()
    }

    async fn bounded<F>(&self, op: F) -> Result<CounterRecord, StoreError>
    where
        F: Future<Output = Result<CounterRecord, StoreError>>,
    {
        tokio::time::timeout(self.settings.store_timeout, op)
            .await
            .map_err(|_| StoreError::Timeout(self.settings.store_timeout))?
    }

    fn allow(&self, key: String, pending: Option<PendingIncrement>) -> RateTicket {
        counter!("guard_rate_limit_total", "outcome" => "allowed").increment(1);
        RateTicket { key, pending }
    }

    fn reject(&self, key: &str, record: CounterRecord) -> GuardError {
        counter!("guard_rate_limit_total", "outcome" => "limited").increment(1);
        let retry_after = record.ttl.map(|ttl| ttl.as_secs_f64().ceil().max(1.0) as u64);
        tracing::warn!(
            key = %key,
            count = record.count,
            limit = self.settings.limit,
            retry_after = ?retry_after,
            "Rate limit exceeded"
        );
        GuardError::RateLimitExceeded { retry_after }
    }

    fn fail_open(
        &self,
        key: String,
        pending: Option<PendingIncrement>,
        op: &'static str,
        err: StoreError,
    ) -> RateTicket {
        log_store_error(op, &key, &err);
        counter!("guard_rate_limit_total", "outcome" => "fail_open").increment(1);
        RateTicket { key, pending }
    }
}

fn log_store_error(op: &'static str, key: &str, err: &StoreError) {
    counter!("guard_rate_limit_store_errors_total", "op" => op).increment(1);
    tracing::warn!(op, key = %key, error = %err, "Counter store unavailable, failing open");
}
