//! Concurrency admission subsystem.
//!
//! # Data Flow
//! ```text
//! request
//!     → middleware.rs (wait for a slot)
//!     → gate.rs (semaphore permit wrapped in an AdmissionToken)
//!     → rest of the pipeline + handler
//!     → token dropped, slot returned
//! ```
//!
//! # Design Decisions
//! - Local and cheap, so it runs before any other guard
//! - Waits rather than rejects; a wait bound is opt-in
//! - Release is tied to `Drop`, never to a code path

pub mod gate;
pub mod middleware;

pub use gate::{AdmissionGate, AdmissionToken};
pub use middleware::{admission_middleware, AdmissionState};
