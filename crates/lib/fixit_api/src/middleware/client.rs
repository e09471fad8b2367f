//! Client metadata (IP, user agent) recorded on refresh tokens and audit entries.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use fixit_core::models::auth::ClientContext;

/// Maximum stored user-agent length.
const MAX_USER_AGENT_LEN: usize = 512;

/// Extractor for the caller's [`ClientContext`]. Never rejects.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo(pub ClientContext);

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(ClientInfo(ClientContext {
            ip: client_ip(&parts.headers).or(peer),
            user_agent: parts
                .headers
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect()),
        }))
    }
}

/// Client IP from proxy headers, in order of preference:
/// `X-Forwarded-For` (first hop), `CF-Connecting-IP`, `X-Real-IP`.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    let first = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
    };
    first("x-forwarded-for")
        .or_else(|| first("cf-connecting-ip"))
        .or_else(|| first("x-real-ip"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_for_wins_and_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn falls_back_through_proxy_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("10.0.0.2"));

        headers.insert("cf-connecting-ip", "192.0.2.1".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("192.0.2.1"));

        assert_eq!(client_ip(&HeaderMap::new()), None);
    }
}
