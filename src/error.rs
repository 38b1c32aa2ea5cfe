//! Error taxonomy for the guard pipeline.
//!
//! `GuardError` is what a pipeline step returns when it stops a request.
//! Every signature failure carries its precise [`AuthFailure`] for logs,
//! but all of them render to the same client-facing payload.

use thiserror::Error;

use crate::rate_limit::store::StoreError;
use crate::signature::canonical::CanonicalizeError;

/// Published error code for rate limit rejections.
pub const CODE_TOO_MANY_REQUESTS: u32 = 429;
/// Published error code for any signature failure.
pub const CODE_SIGN_PARAM: u32 = 10004;
/// Published error code for admission timeouts.
pub const CODE_SERVER_BUSY: u32 = 503;
/// Published error code for internal faults.
pub const CODE_INTERNAL: u32 = 500;

/// Why a signed request was refused. Internal diagnostics only.
#[derive(Debug, Error)]
pub enum AuthFailure {
    #[error("missing or empty Auth header")]
    MissingAuthHeader,
    #[error("missing, zero or unparseable Auth-Date header")]
    MissingTimestamp,
    #[error("Auth header is not `<key> <signature>`")]
    MalformedAuthHeader,
    #[error("unknown signing key `{0}`")]
    UnknownKey(String),
    #[error("cannot canonicalize request: {0}")]
    Canonicalize(#[from] CanonicalizeError),
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("timestamp is {age_secs}s old")]
    Expired { age_secs: i64 },
    #[error("timestamp is {ahead_secs}s ahead of server clock")]
    FromFuture { ahead_secs: i64 },
}

/// A request refused by one of the guards.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Bounded admission wait elapsed. Only produced when a wait limit is configured.
    #[error("no admission slot became free in time")]
    AdmissionUnavailable,

    /// Identity exhausted its budget for the current window.
    #[error("rate limit exceeded")]
    RateLimitExceeded {
        /// Seconds until the window resets, when the store can tell.
        retry_after: Option<u64>,
    },

    /// Any signature check failed.
    #[error("signature verification failed: {0}")]
    SignatureParam(#[from] AuthFailure),

    /// Counter storage fault. Never surfaced by the pipeline, which fails open.
    #[error("counter storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),
}

impl GuardError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GuardError::AdmissionUnavailable => "admission_unavailable",
            GuardError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            GuardError::SignatureParam(_) => "signature_param",
            GuardError::StorageUnavailable(_) => "storage_unavailable",
        }
    }
}
