//! Signed request verification subsystem.
//!
//! # Data Flow
//! ```text
//! request
//!     → middleware.rs (buffer body, capture head and path params)
//!     → canonical.rs (flat name → value map + method + path)
//!     → verifier.rs (headers, secret lookup, HMAC, freshness)
//!     → handler (body restored from the buffer)
//! ```
//!
//! # Design Decisions
//! - One client-facing error for every failure, precise reason only in logs
//! - Signature compared in constant time
//! - Body read exactly once; every later reader gets a replay

pub mod canonical;
pub mod middleware;
pub mod signer;
pub mod verifier;

/// Header carrying `<key id> <hex signature>`.
pub const HEADER_AUTH: &str = "Auth";
/// Header carrying the Unix timestamp (seconds) that was signed.
pub const HEADER_AUTH_DATE: &str = "Auth-Date";

pub use canonical::{canonicalize, BufferedBody, CanonicalParams, CanonicalizeError, SignatureContext};
pub use middleware::signature_middleware;
pub use signer::{sign, verify_signature, SignedHeaders, Signer};
pub use verifier::{
    KeyTable, SecretResolver, SharedSecret, SignatureVerifier, Verification, VerifiedKey,
    VerifyOptions,
};
