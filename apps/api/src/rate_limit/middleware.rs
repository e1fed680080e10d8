//! Axum middleware that runs every request through the `RateLimitGuard`.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::{RateLimitDecision, RateLimitGuard};
use crate::errors::AppError;

const USER_ID_HEADER: &str = "x-user-id";

/// Rejects over-limit callers with 429 before the handler runs. Every
/// response, admitted or not, carries the `X-RateLimit-*` headers.
pub async fn rate_limit(
    State(guard): State<Arc<RateLimitGuard>>,
    request: Request,
    next: Next,
) -> Response {
    let identity = caller_identity(&request, guard.trusts_forwarded());
    let decision = guard.check(&identity, request.uri().path());

    let mut response = match decision.retry_after {
        Some(retry_after) => AppError::RateLimited { retry_after }.into_response(),
        None => next.run(request).await,
    };
    apply_headers(response.headers_mut(), &decision);
    response
}

/// The socket peer address, unless `trust_forwarded` is set, in which case
/// the proxy-supplied user id or client address wins.
fn caller_identity(request: &Request, trust_forwarded: bool) -> String {
    if trust_forwarded {
        let headers = request.headers();
        if let Some(user_id) = header_str(headers, USER_ID_HEADER) {
            return format!("user:{user_id}");
        }
        if let Some(ip) = forwarded_ip(headers) {
            return format!("ip:{ip}");
        }
    }

    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => format!("ip:{}", addr.ip()),
        None => "ip:unknown".to_string(),
    }
}

/// First `X-Forwarded-For` entry, only if it is a well-formed address.
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    header_str(headers, "x-forwarded-for")?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from(decision.reset_at.timestamp()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(headers: &[(&str, &str)]) -> Request {
        let mut builder = axum::http::Request::builder().uri("/api/v1/ai/match");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 5000))));
        req
    }

    #[test]
    fn test_untrusted_headers_are_ignored() {
        let req = request_with(&[("x-user-id", "42"), ("x-forwarded-for", "1.2.3.4")]);
        assert_eq!(caller_identity(&req, false), "ip:127.0.0.1");
    }

    #[test]
    fn test_trusted_user_id_wins_over_address() {
        let req = request_with(&[("x-user-id", "42"), ("x-forwarded-for", "1.2.3.4")]);
        assert_eq!(caller_identity(&req, true), "user:42");
    }

    #[test]
    fn test_first_forwarded_address_is_used() {
        let req = request_with(&[("x-forwarded-for", " 10.0.0.1 , 192.168.1.1")]);
        assert_eq!(caller_identity(&req, true), "ip:10.0.0.1");
    }

    #[test]
    fn test_malformed_forwarded_address_falls_back_to_peer() {
        let req = request_with(&[("x-forwarded-for", "not-an-ip, 10.0.0.1")]);
        assert_eq!(caller_identity(&req, true), "ip:127.0.0.1");
    }

    #[test]
    fn test_unknown_without_peer_address() {
        let req = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();
        assert_eq!(caller_identity(&req, true), "ip:unknown");
    }
}
