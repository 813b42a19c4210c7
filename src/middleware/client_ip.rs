//! Client key derivation
//!
//! Runs ahead of every gate and injects exactly one `ClientKey` into the
//! request extensions. With `trust_proxy` enabled the right-most
//! `X-Forwarded-For` entry wins: it is the address the trusted reverse
//! proxy itself appended, the only one it vouches for. Without a trusted
//! proxy, forwarding headers are attacker-controlled and ignored.

use crate::server::AppState;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use std::fmt;
use std::net::SocketAddr;

/// Identity a request is rate-limited and audited under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(pub String);

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub async fn client_key_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let key = extract_client_key(state.config.trust_proxy, &request);
    request.extensions_mut().insert(key);
    next.run(request).await
}

fn extract_client_key(trust_proxy: bool, request: &Request<Body>) -> ClientKey {
    if trust_proxy {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next_back())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(ip) = forwarded {
            return ClientKey(ip);
        }

        let real_ip = request
            .headers()
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(ip) = real_ip {
            return ClientKey(ip);
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|addr| ClientKey(addr.0.ip().to_string()))
        .unwrap_or_else(|| ClientKey("unknown".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_headers(headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/test");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_rightmost_forwarded_entry_wins_with_trusted_proxy() {
        let request =
            request_with_headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1, 172.16.0.9")]);
        assert_eq!(
            extract_client_key(true, &request),
            ClientKey("172.16.0.9".to_string())
        );
    }

    #[test]
    fn test_single_forwarded_entry() {
        let request = request_with_headers(&[("x-forwarded-for", "203.0.113.7")]);
        assert_eq!(
            extract_client_key(true, &request),
            ClientKey("203.0.113.7".to_string())
        );
    }

    #[test]
    fn test_real_ip_fallback() {
        let request = request_with_headers(&[("x-real-ip", "198.51.100.4")]);
        assert_eq!(
            extract_client_key(true, &request),
            ClientKey("198.51.100.4".to_string())
        );
    }

    #[test]
    fn test_forwarding_headers_ignored_without_trusted_proxy() {
        let mut request = request_with_headers(&[("x-forwarded-for", "203.0.113.7")]);
        request
            .extensions_mut()
            .insert(ConnectInfo("192.0.2.1:4242".parse::<SocketAddr>().unwrap()));
        assert_eq!(
            extract_client_key(false, &request),
            ClientKey("192.0.2.1".to_string())
        );
    }

    #[test]
    fn test_socket_address_used_when_no_headers() {
        let mut request = request_with_headers(&[]);
        request
            .extensions_mut()
            .insert(ConnectInfo("192.0.2.1:4242".parse::<SocketAddr>().unwrap()));
        assert_eq!(
            extract_client_key(true, &request),
            ClientKey("192.0.2.1".to_string())
        );
    }

    #[test]
    fn test_unknown_when_no_origin_information() {
        let request = request_with_headers(&[]);
        assert_eq!(
            extract_client_key(false, &request),
            ClientKey("unknown".to_string())
        );
    }
}
