//! Guard ordering and end-to-end behaviour of the assembled pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::{routing::get, Router};
use tower::ServiceExt;

use request_guard::admission::{AdmissionGate, AdmissionState};
use request_guard::config::RateLimitConfig;
use request_guard::http::ErrorBody;
use request_guard::rate_limit::{
    MemoryCounterStore, RateLimitSettings, RateLimitState, RateLimiter,
};
use request_guard::GuardPipeline;

mod common;
use common::{body_json, from_peer, settle, Call};

fn limited_config(limit: u64) -> request_guard::GuardConfig {
    let mut config = common::config();
    config.rate_limit.limit = limit;
    config
}

#[tokio::test]
async fn rate_limit_rejects_after_budget_is_spent() {
    let app = common::app(&limited_config(3)).await;
    let call = Call::json("/echo", r#"{"a":1}"#);

    for _ in 0..3 {
        let request = from_peer(call.signed().await, "10.0.0.1");
        assert_eq!(app.clone().oneshot(request).await.unwrap().status(), StatusCode::OK);
        settle().await;
    }

    let request = from_peer(call.signed().await, "10.0.0.1");
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    assert_eq!(
        body_json::<ErrorBody>(response).await,
        ErrorBody {
            code: 429,
            msg: "too many request".into()
        }
    );

    // A different client has its own budget.
    let other = from_peer(call.signed().await, "10.0.0.2");
    assert_eq!(app.oneshot(other).await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn rate_limit_runs_before_signature_check() {
    let app = common::app(&limited_config(2)).await;
    let unsigned = Call::json("/echo", r#"{"a":1}"#);

    // Rejected by the signature step, but still counted.
    for _ in 0..2 {
        let request = from_peer(unsigned.unsigned(), "10.0.0.9");
        assert_eq!(app.clone().oneshot(request).await.unwrap().status(), StatusCode::BAD_REQUEST);
        settle().await;
    }

    // Budget spent: even a correctly signed request is refused with 429.
    let request = from_peer(unsigned.signed().await, "10.0.0.9");
    assert_eq!(app.oneshot(request).await.unwrap().status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn zero_limit_never_throttles() {
    let app = common::app(&limited_config(0)).await;
    for _ in 0..20 {
        let request = from_peer(Call::get("/health").unsigned(), "10.0.0.3");
        assert_eq!(app.clone().oneshot(request).await.unwrap().status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn unavailable_store_fails_open() {
    let config = limited_config(1);
    let limiter = RateLimiter::new(
        common::shared(common::UnavailableStore),
        RateLimitSettings::from(&config.rate_limit),
    );
    let pipeline = GuardPipeline::new(
        AdmissionState::new(AdmissionGate::new(0)),
        RateLimitState::new(limiter, &config.rate_limit),
        None,
    );
    let app = pipeline.apply(Router::new().route("/", get(|| async { "ok" })));

    for _ in 0..5 {
        let request = from_peer(Call::get("/").unsigned(), "10.0.0.4");
        assert_eq!(app.clone().oneshot(request).await.unwrap().status(), StatusCode::OK);
        settle().await;
    }
}

#[tokio::test]
async fn abandoned_requests_count_against_the_budget() {
    let mut config = limited_config(1);
    config.signature.enabled = false;
    let limiter = RateLimiter::new(
        common::shared(MemoryCounterStore::new()),
        RateLimitSettings::from(&config.rate_limit),
    );
    let pipeline = GuardPipeline::new(
        AdmissionState::new(AdmissionGate::new(0)),
        RateLimitState::new(limiter, &config.rate_limit),
        None,
    );
    let app = pipeline.apply(Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            "done"
        }),
    ));

    // Client gives up mid-handler; the request future is dropped.
    let request = from_peer(Call::get("/slow").unsigned(), "10.0.0.6");
    let abandoned = tokio::time::timeout(Duration::from_millis(20), app.clone().oneshot(request)).await;
    assert!(abandoned.is_err());
    settle().await;

    for _ in 0..3 {
        let request = from_peer(Call::get("/slow").unsigned(), "10.0.0.6");
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}

/// Router whose handler records peak concurrency.
fn slow_app(pipeline: &GuardPipeline, active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> Router {
    let handler = move || {
        let active = active.clone();
        let peak = peak.clone();
        async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            "done"
        }
    };
    pipeline.apply(Router::new().route("/work", get(handler)))
}

fn unlimited_rate() -> RateLimitState {
    let config = RateLimitConfig::default();
    RateLimitState::new(
        RateLimiter::disabled(RateLimitSettings::from(&config)),
        &config,
    )
}

#[tokio::test]
async fn admission_caps_concurrent_handlers() {
    let pipeline = GuardPipeline::new(
        AdmissionState::new(AdmissionGate::new(2)),
        unlimited_rate(),
        None,
    );
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let app = slow_app(&pipeline, active.clone(), peak.clone());

    let calls = (0..10).map(|_| {
        let app = app.clone();
        tokio::spawn(async move { app.oneshot(Call::get("/work").unsigned()).await.unwrap().status() })
    });
    for call in calls.collect::<Vec<_>>() {
        assert_eq!(call.await.unwrap(), StatusCode::OK);
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(active.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.admission.gate.available(), 2);
}

#[tokio::test]
async fn admission_slot_is_returned_after_rejection_downstream() {
    let mut config = limited_config(0);
    config.admission.capacity = 1;
    let app = common::app(&config).await;
    let echo_call = Call::json("/echo", r#"{"a":1}"#);

    // Signature failures must not leak the only slot.
    for _ in 0..3 {
        let response = app.clone().oneshot(echo_call.unsigned()).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
    let response = app.oneshot(echo_call.signed().await).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn bounded_admission_wait_returns_server_busy() {
    let mut admission = AdmissionState::new(AdmissionGate::new(1));
    admission.max_wait = Some(Duration::from_millis(5));
    let pipeline = GuardPipeline::new(admission, unlimited_rate(), None);

    let app = pipeline.apply(Router::new().route(
        "/work",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            "done"
        }),
    ));

    let first = tokio::spawn({
        let app = app.clone();
        async move { app.oneshot(Call::get("/work").unsigned()).await.unwrap().status() }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let response = app.oneshot(Call::get("/work").unsigned()).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body_json::<ErrorBody>(response).await,
        ErrorBody {
            code: 503,
            msg: "server busy".into()
        }
    );
    assert_eq!(first.await.unwrap(), StatusCode::OK);
}

#[tokio::test]
async fn strict_mode_holds_the_line_under_concurrency() {
    let mut config = limited_config(5);
    config.rate_limit.strict = true;
    config.signature.enabled = false;
    let limiter = RateLimiter::new(
        common::shared(MemoryCounterStore::new()),
        RateLimitSettings::from(&config.rate_limit),
    );
    let pipeline = GuardPipeline::new(
        AdmissionState::new(AdmissionGate::new(0)),
        RateLimitState::new(limiter, &config.rate_limit),
        None,
    );
    let app = pipeline.apply(Router::new().route("/", get(|| async { "ok" })));

    let calls: Vec<_> = (0..20)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move {
                let request = from_peer(Call::get("/").unsigned(), "10.0.0.5");
                app.oneshot(request).await.unwrap().status()
            })
        })
        .collect();

    let mut allowed = 0;
    for call in calls {
        if call.await.unwrap() == StatusCode::OK {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 5);
}
