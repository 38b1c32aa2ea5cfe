//! HMAC-SHA256 request signing.
//!
//! String to sign: canonical parameters sorted by name as `name=value`,
//! joined with `&`, then `&` and the Unix timestamp in seconds:
//!
//! ```text
//! a=1&method=POST&path=/orders&1700000000
//! ```
//!
//! The signature is the lowercase hex HMAC-SHA256 of that string keyed by
//! the client's secret. The `Auth` header carries `<key id> <signature>` and
//! `Auth-Date` carries the timestamp.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::signature::canonical::CanonicalParams;

type HmacSha256 = Hmac<Sha256>;

/// The exact bytes covered by the MAC.
pub fn string_to_sign(params: &CanonicalParams, timestamp: i64) -> String {
    let mut out = String::new();
    for (name, value) in params {
        out.push_str(name);
        out.push('=');
        out.push_str(value);
        out.push('&');
    }
    out.push_str(&timestamp.to_string());
    out
}

fn mac_for(secret: &str, params: &CanonicalParams, timestamp: i64) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(string_to_sign(params, timestamp).as_bytes());
    mac
}

/// Hex-encoded signature for `params` at `timestamp`.
pub fn sign(secret: &str, params: &CanonicalParams, timestamp: i64) -> String {
    hex::encode(mac_for(secret, params, timestamp).finalize().into_bytes())
}

/// Constant-time check of a hex signature. Non-hex input never matches.
pub fn verify_signature(secret: &str, params: &CanonicalParams, timestamp: i64, signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature) else {
        return false;
    };
    mac_for(secret, params, timestamp).verify_slice(&provided).is_ok()
}

/// Header values for a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    /// Value for the `Auth` header.
    pub auth: String,
    /// Value for the `Auth-Date` header.
    pub date: String,
}

/// Client-side signer holding one key.
#[derive(Debug, Clone)]
pub struct Signer {
    key_id: String,
    secret: String,
}

impl Signer {
    pub fn new(key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            secret: secret.into(),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn sign(&self, params: &CanonicalParams, timestamp: i64) -> SignedHeaders {
        SignedHeaders {
            auth: format!("{} {}", self.key_id, sign(&self.secret, params, timestamp)),
            date: timestamp.to_string(),
        }
    }
}
