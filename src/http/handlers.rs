//! Routes served behind the guard pipeline.

use axum::{
    body::Bytes,
    extract::Path,
    http::{Method, Uri},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::signature::VerifiedKey;

/// What the echo routes saw after the guards ran.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EchoReply {
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub body: String,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Echo the request, including the body the handler received.
pub async fn echo(
    method: Method,
    uri: Uri,
    key: Option<Extension<VerifiedKey>>,
    body: Bytes,
) -> Json<EchoReply> {
    Json(EchoReply {
        method: method.to_string(),
        path: uri.path().to_string(),
        key_id: key.map(|Extension(VerifiedKey(id))| id),
        id: None,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

/// Echo a routed path parameter.
pub async fn item(
    method: Method,
    uri: Uri,
    Path(id): Path<String>,
    key: Option<Extension<VerifiedKey>>,
) -> Json<EchoReply> {
    Json(EchoReply {
        method: method.to_string(),
        path: uri.path().to_string(),
        key_id: key.map(|Extension(VerifiedKey(id))| id),
        id: Some(id),
        body: String::new(),
    })
}
