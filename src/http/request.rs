//! Request inspection helpers.
//!
//! # Responsibilities
//! - Derive the client identity used as the rate limit key
//! - Read the request id stamped by the request-id layer

use std::net::{IpAddr, SocketAddr};

use axum::{extract::ConnectInfo, extract::Request};

/// Header carrying the per-request correlation id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Identity used when no address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Client address for rate limiting.
///
/// The peer address from the connection wins unless `trust_forwarded_for`
/// is set, in which case the first `X-Forwarded-For` hop (then `X-Real-IP`)
/// is used. Only enable that behind a proxy that overwrites these headers.
pub fn client_identity(request: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        if let Some(ip) = forwarded_ip(request) {
            return ip.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn forwarded_ip(request: &Request) -> Option<IpAddr> {
    let headers = request.headers();

    let from_forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok());

    from_forwarded_for.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    })
}

/// Request id assigned by the request-id layer, if any.
pub fn request_id(request: &Request) -> &str {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(headers: &[(&str, &str)], peer: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().unwrap();
            request.extensions_mut().insert(ConnectInfo(addr));
        }
        request
    }

    #[test]
    fn uses_peer_address() {
        let request = request_with(&[], Some("10.1.2.3:5555"));
        assert_eq!(client_identity(&request, false), "10.1.2.3");
    }

    #[test]
    fn ignores_forwarded_for_unless_trusted() {
        let request = request_with(&[("x-forwarded-for", "203.0.113.9, 10.0.0.1")], Some("10.1.2.3:5555"));
        assert_eq!(client_identity(&request, false), "10.1.2.3");
        assert_eq!(client_identity(&request, true), "203.0.113.9");
    }

    #[test]
    fn falls_back_to_real_ip_then_peer() {
        let request = request_with(&[("x-real-ip", "198.51.100.4")], Some("10.1.2.3:5555"));
        assert_eq!(client_identity(&request, true), "198.51.100.4");

        let garbage = request_with(&[("x-forwarded-for", "not-an-ip")], Some("10.1.2.3:5555"));
        assert_eq!(client_identity(&garbage, true), "10.1.2.3");
    }

    #[test]
    fn unknown_without_any_source() {
        let request = request_with(&[], None);
        assert_eq!(client_identity(&request, true), UNKNOWN_CLIENT);
    }
}
