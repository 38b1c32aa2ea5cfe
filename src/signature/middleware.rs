//! Signature verification middleware.
//!
//! Mount with `route_layer` so routed path parameters are visible.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, RawPathParams, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;

use crate::error::{AuthFailure, GuardError};
use crate::http::request::request_id;
use crate::signature::canonical::{BufferedBody, SignatureContext};
use crate::signature::verifier::{SignatureVerifier, Verification, VerifiedKey};

/// Verify `Auth` / `Auth-Date` before the handler sees the request.
///
/// On success the handler receives the original body plus a [`VerifiedKey`]
/// and the [`BufferedBody`] in request extensions.
pub async fn signature_middleware(
    State(verifier): State<Arc<SignatureVerifier>>,
    request: Request,
    next: Next,
) -> Response {
    if verifier.is_exempt(request.uri().path()) {
        counter!("guard_signature_total", "outcome" => "exempt").increment(1);
        return next.run(request).await;
    }

    let id = request_id(&request).to_string();
    let (mut parts, body) = request.into_parts();

    let body = match BufferedBody::collect(body, verifier.options().max_body_bytes).await {
        Ok(body) => body,
        Err(err) => return reject(parts.uri.path(), &id, AuthFailure::from(err)),
    };

    let path_params = match RawPathParams::from_request_parts(&mut parts, &()).await {
        Ok(params) => params
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        Err(_) => Vec::new(),
    };

    let context = SignatureContext::from_parts(&parts, path_params, body);
    match verifier.verify(&context).await {
        Ok(Verification::Verified { key_id }) => {
            counter!("guard_signature_total", "outcome" => "verified").increment(1);
            tracing::debug!(path = %context.path, key_id = %key_id, request_id = %id, "Signature verified");
            parts.extensions.insert(VerifiedKey(key_id));
        }
        Ok(Verification::Exempt) => {
            counter!("guard_signature_total", "outcome" => "exempt").increment(1);
        }
        Err(reason) => return reject(&context.path, &id, reason),
    }

    let replay = context.body.reader();
    parts.extensions.insert(context.body);
    next.run(Request::from_parts(parts, replay)).await
}

fn reject(path: &str, request_id: &str, reason: AuthFailure) -> Response {
    counter!("guard_signature_total", "outcome" => "rejected").increment(1);
    tracing::warn!(path = %path, request_id = %request_id, reason = %reason, "Signature verification failed");
    GuardError::SignatureParam(reason).into_response()
}
