//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field
//! requirements. All problems are reported, not just the first one.

use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::schema::{GuardConfig, StoreKind};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("admission.capacity {0} exceeds the supported maximum")]
    CapacityTooLarge(usize),
    #[error("rate_limit.window_secs must be greater than zero")]
    ZeroWindow,
    #[error("rate_limit.namespace must not be empty")]
    EmptyNamespace,
    #[error("redis.url is required when rate_limit.store = \"redis\"")]
    MissingRedisUrl,
    #[error("signature.timeout_secs must be greater than zero")]
    ZeroSignatureTimeout,
    #[error("signature.keys must contain at least one key when verification is enabled")]
    NoSigningKeys,
    #[error("signature.keys.{0} has an empty secret")]
    EmptySecret(String),
    #[error("signature.except entry `{0}` must start with '/'")]
    RelativeExceptPath(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.admission.capacity > Semaphore::MAX_PERMITS {
        errors.push(ValidationError::CapacityTooLarge(config.admission.capacity));
    }

    let rate = &config.rate_limit;
    if rate.limit > 0 {
        if rate.window_secs == 0 {
            errors.push(ValidationError::ZeroWindow);
        }
        if rate.namespace.is_empty() {
            errors.push(ValidationError::EmptyNamespace);
        }
        if rate.store == StoreKind::Redis && config.redis.url.trim().is_empty() {
            errors.push(ValidationError::MissingRedisUrl);
        }
    }

    let sign = &config.signature;
    if sign.enabled {
        if sign.timeout_secs == 0 {
            errors.push(ValidationError::ZeroSignatureTimeout);
        }
        if sign.keys.is_empty() {
            errors.push(ValidationError::NoSigningKeys);
        }
        for (key_id, secret) in &sign.keys {
            if secret.is_empty() {
                errors.push(ValidationError::EmptySecret(key_id.clone()));
            }
        }
    }
    for path in &sign.except {
        if !path.starts_with('/') {
            errors.push(ValidationError::RelativeExceptPath(path.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
