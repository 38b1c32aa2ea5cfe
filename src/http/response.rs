//! Client-facing rendering of guard rejections.
//!
//! Every rejection is a JSON body `{"code": <int>, "msg": <string>}`.
//! Signature failures all share one payload so a caller cannot tell
//! which check tripped.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{
    GuardError, CODE_INTERNAL, CODE_SERVER_BUSY, CODE_SIGN_PARAM, CODE_TOO_MANY_REQUESTS,
};

/// JSON error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u32,
    pub msg: String,
}

impl ErrorBody {
    fn new(code: u32, msg: &str) -> Self {
        Self {
            code,
            msg: msg.to_string(),
        }
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            GuardError::AdmissionUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody::new(CODE_SERVER_BUSY, "server busy"),
            ),
            GuardError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorBody::new(CODE_TOO_MANY_REQUESTS, "too many request"),
            ),
            GuardError::SignatureParam(_) => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new(CODE_SIGN_PARAM, "sign param error"),
            ),
            GuardError::StorageUnavailable(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody::new(CODE_INTERNAL, "internal error"),
            ),
        };

        let mut response = (status, Json(body)).into_response();
        if let GuardError::RateLimitExceeded {
            retry_after: Some(secs),
        } = self
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthFailure;

    async fn body_of(response: Response) -> ErrorBody {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn rate_limit_payload() {
        let response = GuardError::RateLimitExceeded { retry_after: Some(7) }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "7");
        assert_eq!(
            body_of(response).await,
            ErrorBody::new(429, "too many request")
        );
    }

    #[tokio::test]
    async fn rate_limit_without_ttl_has_no_retry_after() {
        let response = GuardError::RateLimitExceeded { retry_after: None }.into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[tokio::test]
    async fn signature_failures_are_indistinguishable() {
        let a = GuardError::from(AuthFailure::MissingAuthHeader).into_response();
        let b = GuardError::from(AuthFailure::SignatureMismatch).into_response();
        let c = GuardError::from(AuthFailure::Expired { age_secs: 61 }).into_response();

        assert_eq!(a.status(), StatusCode::BAD_REQUEST);
        assert_eq!(b.status(), a.status());
        assert_eq!(c.status(), a.status());

        let expected = ErrorBody::new(CODE_SIGN_PARAM, "sign param error");
        assert_eq!(body_of(a).await, expected);
        assert_eq!(body_of(b).await, expected);
        assert_eq!(body_of(c).await, expected);
    }
}
