//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, trace, timeout)
//!     → guard pipeline (admission → rate limit → signature)
//!     → handlers.rs (demo routes)
//!     → response.rs (guard rejections as JSON error bodies)
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::{client_identity, X_REQUEST_ID};
pub use response::ErrorBody;
pub use server::GuardServer;
