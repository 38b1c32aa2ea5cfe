//! Per-client rate limiting over shared counter storage.
//!
//! # Data Flow
//! ```text
//! request
//!     → middleware.rs (derive client identity)
//!     → limiter.rs (read counter, compare with limit)
//!     → store.rs (Redis or in-process counters)
//!     → handler
//!     → limiter.rs (spawned increment + expiry)
//! ```
//!
//! # Design Decisions
//! - No in-process state in the limiter; every instance shares the store
//! - Fail open on storage faults
//! - Read-then-increment by default, atomic increment-first in strict mode

pub mod limiter;
pub mod middleware;
pub mod store;

pub use limiter::{RateLimitSettings, RateLimiter, RateTicket};
pub use middleware::{rate_limit_middleware, RateLimitState};
pub use store::{CounterRecord, CounterStore, MemoryCounterStore, RedisCounterStore, StoreError};
