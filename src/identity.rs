//! Identity key derivation for admission control.
//!
//! Precedence: `X-Forwarded-For` (first entry), then `X-Real-IP`, then the
//! transport peer address. Clients behind a shared proxy collapse to one
//! identity; that approximation is accepted, not corrected.

use axum::extract::{ConnectInfo, Request};
use std::net::SocketAddr;

/// Derives the identity key used to bucket counters for this request.
pub fn client_identity(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                let trimmed = first_ip.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_takes_first_entry() {
        let mut request = Request::new(axum::body::Body::empty());
        request.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.168.1.1, 10.0.0.1"),
        );

        assert_eq!(client_identity(&request), "192.168.1.1");
    }

    #[test]
    fn real_ip_used_when_forwarded_absent() {
        let mut request = Request::new(axum::body::Body::empty());
        request
            .headers_mut()
            .insert("x-real-ip", HeaderValue::from_static("203.0.113.1"));

        assert_eq!(client_identity(&request), "203.0.113.1");
    }

    #[test]
    fn forwarded_for_wins_over_real_ip() {
        let mut request = Request::new(axum::body::Body::empty());
        request
            .headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        request
            .headers_mut()
            .insert("x-real-ip", HeaderValue::from_static("203.0.113.1"));

        assert_eq!(client_identity(&request), "1.2.3.4");
    }

    #[test]
    fn peer_address_fallback() {
        let mut request = Request::new(axum::body::Body::empty());
        request
            .extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("10.1.2.3:40000".parse().unwrap()));

        assert_eq!(client_identity(&request), "10.1.2.3");
    }

    #[test]
    fn unknown_when_nothing_present() {
        let request = Request::new(axum::body::Body::empty());
        assert_eq!(client_identity(&request), "unknown");
    }

    #[test]
    fn identity_is_stable_across_calls() {
        let mut request = Request::new(axum::body::Body::empty());
        request
            .headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));

        assert_eq!(client_identity(&request), client_identity(&request));
    }
}
