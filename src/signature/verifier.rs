//! Signed request verification.
//!
//! # Checks, in order
//! 1. Path on the except-list: accept without further checks
//! 2. `Auth` present and non-empty, `Auth-Date` a non-zero integer
//! 3. `Auth` splits into `<key id> <signature>`
//! 4. Canonical parameters (an empty map if the request cannot be canonicalized)
//! 5. Secret for the key id
//! 6. Signature matches, timestamp within `[now - timeout, now + clock_skew]`
//!
//! Every failure maps to the same client-facing error; the specific
//! [`AuthFailure`] is only logged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::config::SignatureConfig;
use crate::error::AuthFailure;
use crate::signature::canonical::{canonicalize, CanonicalParams, SignatureContext};
use crate::signature::signer::verify_signature;

/// Replay window applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Accepted lead of a client clock over the server clock.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5);
/// Largest body buffered for canonicalization by default.
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Looks up the shared secret for a key id.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, key_id: &str) -> Option<String>;
}

/// Fixed table of key id -> secret.
#[derive(Debug, Clone, Default)]
pub struct KeyTable {
    keys: HashMap<String, String>,
}

impl KeyTable {
    pub fn new<K, V>(keys: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl SecretResolver for KeyTable {
    async fn resolve(&self, key_id: &str) -> Option<String> {
        self.keys.get(key_id).cloned()
    }
}

/// One secret for every key id.
#[derive(Debug, Clone)]
pub struct SharedSecret(String);

impl SharedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }
}

#[async_trait]
impl SecretResolver for SharedSecret {
    async fn resolve(&self, _key_id: &str) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Verifier options.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub timeout: Duration,
    pub clock_skew: Duration,
    pub except: Vec<String>,
    pub max_body_bytes: usize,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            clock_skew: DEFAULT_CLOCK_SKEW,
            except: Vec::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl VerifyOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    pub fn with_except<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.except = paths.into_iter().map(Into::into).collect();
        self
    }
}

impl From<&SignatureConfig> for VerifyOptions {
    fn from(config: &SignatureConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            clock_skew: Duration::from_secs(config.clock_skew_secs),
            except: config.except.clone(),
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// Successful verification outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Path is on the except-list; nothing was checked.
    Exempt,
    /// Signature checked for this key id.
    Verified { key_id: String },
}

/// Key id of a verified request, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedKey(pub String);

/// Checks `Auth` / `Auth-Date` signed requests.
#[derive(Clone)]
pub struct SignatureVerifier {
    resolver: Arc<dyn SecretResolver>,
    options: VerifyOptions,
}

impl SignatureVerifier {
    pub fn new(resolver: Arc<dyn SecretResolver>, options: VerifyOptions) -> Self {
        Self { resolver, options }
    }

    /// Verifier over the configured key table.
    pub fn from_config(config: &SignatureConfig) -> Self {
        Self::new(
            Arc::new(KeyTable::new(config.keys.clone())),
            VerifyOptions::from(config),
        )
    }

    pub fn options(&self) -> &VerifyOptions {
        &self.options
    }

    /// Exact-match lookup on the except-list.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.options.except.iter().any(|p| p == path)
    }

    /// Verify against the current system clock.
    pub async fn verify(&self, context: &SignatureContext) -> Result<Verification, AuthFailure> {
        self.verify_at(context, unix_now()).await
    }

    /// Verify as if the server clock read `now` (Unix seconds).
    pub async fn verify_at(
        &self,
        context: &SignatureContext,
        now: i64,
    ) -> Result<Verification, AuthFailure> {
        if self.is_exempt(&context.path) {
            return Ok(Verification::Exempt);
        }

        let auth = context
            .auth_header
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or(AuthFailure::MissingAuthHeader)?;

        let timestamp = context
            .timestamp_header
            .as_deref()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|ts| *ts != 0)
            .ok_or(AuthFailure::MissingTimestamp)?;

        let (key_id, signature) = auth
            .split_once(' ')
            .filter(|(key, sig)| !key.is_empty() && !sig.is_empty())
            .ok_or(AuthFailure::MalformedAuthHeader)?;

        let (params, canonical_error) = match canonicalize(context).await {
            Ok((params, _)) => (params, None),
            Err(err) => {
                tracing::debug!(path = %context.path, error = %err, "Canonicalization failed, verifying against empty parameters");
                (CanonicalParams::new(), Some(err))
            }
        };

        let secret = self
            .resolver
            .resolve(key_id)
            .await
            .ok_or_else(|| AuthFailure::UnknownKey(key_id.to_string()))?;

        if !verify_signature(&secret, &params, timestamp, signature) {
            return Err(match canonical_error {
                Some(err) => AuthFailure::Canonicalize(err),
                None => AuthFailure::SignatureMismatch,
            });
        }

        // i128: the timestamp is client-controlled.
        let age = i128::from(now) - i128::from(timestamp);
        if age > i128::from(self.options.timeout.as_secs()) {
            return Err(AuthFailure::Expired {
                age_secs: clamp_secs(age),
            });
        }
        if -age > i128::from(self.options.clock_skew.as_secs()) {
            return Err(AuthFailure::FromFuture {
                ahead_secs: clamp_secs(-age),
            });
        }

        Ok(Verification::Verified {
            key_id: key_id.to_string(),
        })
    }
}

fn clamp_secs(secs: i128) -> i64 {
    i64::try_from(secs).unwrap_or(if secs < 0 { i64::MIN } else { i64::MAX })
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
