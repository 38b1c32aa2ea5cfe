//! Canonical parameter extraction.
//!
//! Turns a request into the flat `name -> value` map that gets signed:
//!
//! - POST / PUT / PATCH with a JSON content type: top-level object fields
//! - POST / PUT / PATCH with a form content type: first value of each field
//! - any other method: query parameters, then routed path parameters
//! - always: `method` (uppercase verb) and `path` (no query string)
//!
//! The body is buffered once into a [`BufferedBody`], which hands out as many
//! fresh readers as callers need.

use std::borrow::Cow;
use std::collections::BTreeMap;

use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Multipart};
use axum::http::{header, request::Parts, Method, Request};
use serde_json::Value;
use thiserror::Error;
use url::form_urlencoded;

use crate::signature::{HEADER_AUTH, HEADER_AUTH_DATE};

/// Synthetic entry holding the HTTP verb.
pub const PARAM_METHOD: &str = "method";
/// Synthetic entry holding the request path.
pub const PARAM_PATH: &str = "path";

/// Signed parameters, kept sorted by name.
pub type CanonicalParams = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum CanonicalizeError {
    #[error("failed to buffer request body: {0}")]
    Body(#[source] axum::Error),
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("JSON body must be an object")]
    NotAnObject,
    #[error("invalid multipart body: {0}")]
    Multipart(String),
}

/// A request body read once and replayable any number of times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferedBody(Bytes);

impl BufferedBody {
    /// Drain `body` into memory, refusing anything over `limit` bytes.
    pub async fn collect(body: Body, limit: usize) -> Result<Self, CanonicalizeError> {
        axum::body::to_bytes(body, limit)
            .await
            .map(Self)
            .map_err(CanonicalizeError::Body)
    }

    pub fn bytes(&self) -> &Bytes {
        &self.0
    }

    /// A fresh, fully readable body over the same bytes.
    pub fn reader(&self) -> Body {
        Body::from(self.0.clone())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for BufferedBody {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for BufferedBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&'static str> for BufferedBody {
    fn from(text: &'static str) -> Self {
        Self(Bytes::from_static(text.as_bytes()))
    }
}

/// Everything signature verification needs from one request, captured once.
#[derive(Debug, Clone)]
pub struct SignatureContext {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub path_params: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub auth_header: Option<String>,
    pub timestamp_header: Option<String>,
    pub body: BufferedBody,
}

impl SignatureContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            path_params: Vec::new(),
            content_type: None,
            auth_header: None,
            timestamp_header: None,
            body: BufferedBody::default(),
        }
    }

    /// Snapshot a request head plus its already-buffered body.
    pub fn from_parts(parts: &Parts, path_params: Vec<(String, String)>, body: BufferedBody) -> Self {
        let text = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };

        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_owned),
            path_params,
            content_type: text(header::CONTENT_TYPE.as_str()),
            auth_header: text(HEADER_AUTH),
            timestamp_header: text(HEADER_AUTH_DATE),
            body,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_path_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.path_params = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: impl Into<BufferedBody>) -> Self {
        self.content_type = Some(content_type.into());
        self.body = body.into();
        self
    }

    pub fn with_auth(mut self, auth: impl Into<String>, timestamp: impl Into<String>) -> Self {
        self.auth_header = Some(auth.into());
        self.timestamp_header = Some(timestamp.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFormat {
    Json,
    UrlEncoded,
    Multipart,
    Other,
}

impl BodyFormat {
    fn detect(content_type: Option<&str>) -> Self {
        let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
        if content_type.contains("json") {
            BodyFormat::Json
        } else if content_type.starts_with("multipart/form-data") {
            BodyFormat::Multipart
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            BodyFormat::UrlEncoded
        } else {
            BodyFormat::Other
        }
    }
}

fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Build the canonical parameter map and a fresh body for the next reader.
pub async fn canonicalize(
    context: &SignatureContext,
) -> Result<(CanonicalParams, Body), CanonicalizeError> {
    let mut params = CanonicalParams::new();

    if carries_body(&context.method) {
        match BodyFormat::detect(context.content_type.as_deref()) {
            BodyFormat::Json => json_params(context.body.bytes(), &mut params)?,
            BodyFormat::UrlEncoded => {
                first_values(form_urlencoded::parse(context.body.bytes()), &mut params)
            }
            BodyFormat::Multipart => multipart_params(context, &mut params).await?,
            BodyFormat::Other => {}
        }
    } else {
        if let Some(query) = &context.query {
            first_values(form_urlencoded::parse(query.as_bytes()), &mut params);
        }
        for (name, value) in &context.path_params {
            params.insert(name.clone(), value.clone());
        }
    }

    params.insert(PARAM_METHOD.to_string(), context.method.as_str().to_ascii_uppercase());
    params.insert(PARAM_PATH.to_string(), context.path.clone());

    Ok((params, context.body.reader()))
}

/// Top-level fields of a JSON object. Nested values are kept as compact JSON.
pub fn json_params(body: &[u8], params: &mut CanonicalParams) -> Result<(), CanonicalizeError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }

    match serde_json::from_slice::<Value>(body)? {
        Value::Object(fields) => {
            for (name, value) in fields {
                params.insert(name, json_scalar(value));
            }
            Ok(())
        }
        _ => Err(CanonicalizeError::NotAnObject),
    }
}

fn json_scalar(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Keep the first value seen for each name.
fn first_values<'a>(
    pairs: impl Iterator<Item = (Cow<'a, str>, Cow<'a, str>)>,
    params: &mut CanonicalParams,
) {
    for (name, value) in pairs {
        params
            .entry(name.into_owned())
            .or_insert_with(|| value.into_owned());
    }
}

async fn multipart_params(
    context: &SignatureContext,
    params: &mut CanonicalParams,
) -> Result<(), CanonicalizeError> {
    let content_type = context.content_type.as_deref().unwrap_or_default();
    let request = Request::builder()
        .method(context.method.clone())
        .header(header::CONTENT_TYPE, content_type)
        .body(context.body.reader())
        .map_err(|e| CanonicalizeError::Multipart(e.to_string()))?;

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| CanonicalizeError::Multipart(e.to_string()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CanonicalizeError::Multipart(e.to_string()))?
    {
        // File uploads are not signed.
        if field.file_name().is_some() {
            continue;
        }
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        let value = field
            .text()
            .await
            .map_err(|e| CanonicalizeError::Multipart(e.to_string()))?;
        params.entry(name).or_insert(value);
    }

    Ok(())
}
