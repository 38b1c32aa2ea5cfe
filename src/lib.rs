//! Request admission and authentication guards for Axum services.

pub mod admission;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod rate_limit;
pub mod signature;

pub use config::schema::GuardConfig;
pub use error::{AuthFailure, GuardError};
pub use http::GuardServer;
pub use lifecycle::Shutdown;
pub use pipeline::GuardPipeline;
