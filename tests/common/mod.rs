//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, Response};
use axum::Router;
use serde::de::DeserializeOwned;

use request_guard::config::{GuardConfig, StoreKind};
use request_guard::rate_limit::{CounterRecord, CounterStore, StoreError};
use request_guard::signature::{canonicalize, SignatureContext, Signer, HEADER_AUTH, HEADER_AUTH_DATE};
use request_guard::{GuardPipeline, GuardServer};

pub const KEY_ID: &str = "app";
pub const SECRET: &str = "s3cret";

/// Memory-backed config with one signing key and `/health` exempt.
pub fn config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.rate_limit.store = StoreKind::Memory;
    config.signature.enabled = true;
    config.signature.except = vec!["/health".to_string()];
    config.signature.keys.insert(KEY_ID.to_string(), SECRET.to_string());
    config
}

/// The service router with every guard applied.
pub async fn app(config: &GuardConfig) -> Router {
    let pipeline = GuardPipeline::from_config(config).await;
    GuardServer::build_router(config, &pipeline)
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Give spawned counter increments time to land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Attach a peer address, as `into_make_service_with_connect_info` would.
pub fn from_peer(mut request: Request<Body>, ip: &str) -> Request<Body> {
    let addr: SocketAddr = format!("{ip}:40000").parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

/// Describes a request to sign.
pub struct Call {
    pub method: Method,
    pub uri: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub path_params: Vec<(String, String)>,
}

impl Call {
    pub fn get(uri: &str) -> Self {
        Self {
            method: Method::GET,
            uri: uri.to_string(),
            content_type: None,
            body: Vec::new(),
            path_params: Vec::new(),
        }
    }

    pub fn post(uri: &str, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: Method::POST,
            uri: uri.to_string(),
            content_type: Some(content_type.to_string()),
            body: body.into(),
            path_params: Vec::new(),
        }
    }

    pub fn json(uri: &str, body: &str) -> Self {
        Self::post(uri, "application/json", body)
    }

    pub fn path_param(mut self, name: &str, value: &str) -> Self {
        self.path_params.push((name.to_string(), value.to_string()));
        self
    }

    fn context(&self) -> SignatureContext {
        let (path, query) = match self.uri.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.uri.as_str(), None),
        };
        let mut context = SignatureContext::new(self.method.clone(), path)
            .with_path_params(self.path_params.clone());
        if let Some(query) = query {
            context = context.with_query(query);
        }
        if let Some(content_type) = &self.content_type {
            context = context.with_body(content_type.clone(), self.body.clone());
        }
        context
    }

    /// Auth header values signed with the test key at `timestamp`.
    pub async fn auth_at(&self, timestamp: i64) -> (String, String) {
        let (params, _) = canonicalize(&self.context()).await.unwrap();
        let headers = Signer::new(KEY_ID, SECRET).sign(&params, timestamp);
        (headers.auth, headers.date)
    }

    pub fn unsigned(&self) -> Request<Body> {
        let mut builder = Request::builder().method(self.method.clone()).uri(&self.uri);
        if let Some(content_type) = &self.content_type {
            builder = builder.header("content-type", content_type);
        }
        builder.body(Body::from(self.body.clone())).unwrap()
    }

    pub async fn signed_at(&self, timestamp: i64) -> Request<Body> {
        let (auth, date) = self.auth_at(timestamp).await;
        let mut request = self.unsigned();
        request.headers_mut().insert(HEADER_AUTH, auth.parse().unwrap());
        request.headers_mut().insert(HEADER_AUTH_DATE, date.parse().unwrap());
        request
    }

    pub async fn signed(&self) -> Request<Body> {
        self.signed_at(unix_now()).await
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json<T: DeserializeOwned>(response: Response<Body>) -> T {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Counter store whose every call fails.
pub struct UnavailableStore;

#[async_trait]
impl CounterStore for UnavailableStore {
    async fn get(&self, _key: &str) -> Result<CounterRecord, StoreError> {
        Err(StoreError::Timeout(Duration::ZERO))
    }

    async fn increment(&self, _key: &str, _window: Duration) -> Result<CounterRecord, StoreError> {
        Err(StoreError::Timeout(Duration::ZERO))
    }
}

pub fn shared<T: CounterStore + 'static>(store: T) -> Arc<dyn CounterStore> {
    Arc::new(store)
}
