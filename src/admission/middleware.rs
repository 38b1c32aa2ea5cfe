//! Admission middleware.

use std::time::Duration;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::admission::gate::AdmissionGate;
use crate::config::AdmissionConfig;

/// State for the admission middleware.
#[derive(Debug, Clone)]
pub struct AdmissionState {
    pub gate: AdmissionGate,
    /// Optional cap on the wait for a slot.
    pub max_wait: Option<Duration>,
}

impl AdmissionState {
    pub fn new(gate: AdmissionGate) -> Self {
        Self {
            gate,
            max_wait: None,
        }
    }

    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self {
            gate: AdmissionGate::new(config.capacity),
            max_wait: config.max_wait(),
        }
    }
}

/// Hold an admission slot for the duration of the downstream call.
pub async fn admission_middleware(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Response {
    let admitted = match state.max_wait {
        Some(wait) => state.gate.admit_within(wait).await,
        None => state.gate.admit().await,
    };

    let token = match admitted {
        Ok(token) => token,
        Err(err) => {
            tracing::warn!(
                capacity = state.gate.capacity(),
                max_wait = ?state.max_wait,
                path = %request.uri().path(),
                "No admission slot available"
            );
            return err.into_response();
        }
    };

    let response = next.run(request).await;
    state.gate.release(token);
    response
}
