//! Request identity and correlation.
//!
//! # Responsibilities
//! - Generate unique request ID (UUID v4)
//! - Resolve who is calling: authenticated principal, else client IP
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Proxy headers are trusted in a fixed order; the socket peer is the last resort
//! - Authentication happens upstream; it only leaves an `AuthenticatedPrincipal` extension

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, HeaderName, Request};
use tower_http::request_id::{MakeRequestId, RequestId};

use crate::rate_limit::RateLimitClass;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Client IP headers, most trusted first.
const IP_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

const UNKNOWN: &str = "unknown";

/// Inserted into request extensions by whatever authenticates the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal(pub String);

/// Who a request is attributed to for rate limiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    pub principal: Option<String>,
    pub ip: String,
}

impl RequestIdentity {
    pub fn new(principal: Option<String>, ip: impl Into<String>) -> Self {
        Self {
            principal,
            ip: ip.into(),
        }
    }

    /// An identity for non-HTTP callers that already know the principal.
    pub fn principal(id: impl Into<String>) -> Self {
        Self::new(Some(id.into()), UNKNOWN)
    }

    pub fn from_headers(headers: &HeaderMap, peer: Option<IpAddr>, principal: Option<String>) -> Self {
        let ip = client_ip(headers).unwrap_or_else(|| {
            peer.map(|ip| ip.to_string())
                .unwrap_or_else(|| UNKNOWN.to_string())
        });
        Self { principal, ip }
    }

    pub fn from_request<B>(request: &Request<B>) -> Self {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let principal = request
            .extensions()
            .get::<AuthenticatedPrincipal>()
            .map(|p| p.0.clone());
        Self::from_headers(request.headers(), peer, principal)
    }

    /// Counter identifier for `class`: the principal when known, except for
    /// the global class which always counts per IP.
    pub fn identifier_for(&self, class: RateLimitClass) -> &str {
        match (&self.principal, class.keyed_by_ip()) {
            (Some(principal), false) => principal,
            _ => &self.ip,
        }
    }
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    IP_HEADERS.iter().find_map(|name| {
        let value = headers.get(*name)?.to_str().ok()?;
        value
            .split(',')
            .map(str::trim)
            .find(|part| !part.is_empty())
            .map(str::to_string)
    })
}

/// Generates UUID v4 request ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        id.parse().ok().map(RequestId::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_forwarded_for_first_non_empty() {
        let h = headers(&[("x-forwarded-for", " , 203.0.113.7, 10.0.0.1"), ("x-real-ip", "10.9.9.9")]);
        assert_eq!(RequestIdentity::from_headers(&h, None, None).ip, "203.0.113.7");
    }

    #[test]
    fn test_header_precedence() {
        let h = headers(&[("x-real-ip", "198.51.100.2"), ("cf-connecting-ip", "192.0.2.1")]);
        assert_eq!(RequestIdentity::from_headers(&h, None, None).ip, "198.51.100.2");

        let h = headers(&[("cf-connecting-ip", "192.0.2.1")]);
        assert_eq!(RequestIdentity::from_headers(&h, None, None).ip, "192.0.2.1");
    }

    #[test]
    fn test_peer_then_unknown() {
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(RequestIdentity::from_headers(&HeaderMap::new(), Some(peer), None).ip, "127.0.0.1");
        assert_eq!(RequestIdentity::from_headers(&HeaderMap::new(), None, None).ip, "unknown");
    }

    #[test]
    fn test_global_class_uses_ip() {
        let id = RequestIdentity::new(Some("learner-42".into()), "203.0.113.7");
        assert_eq!(id.identifier_for(RateLimitClass::AiOperations), "learner-42");
        assert_eq!(id.identifier_for(RateLimitClass::Global), "203.0.113.7");

        let anon = RequestIdentity::new(None, "203.0.113.7");
        assert_eq!(anon.identifier_for(RateLimitClass::General), "203.0.113.7");
    }

    #[test]
    fn test_from_request_reads_extensions() {
        let mut request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(AuthenticatedPrincipal("learner-42".into()));

        let id = RequestIdentity::from_request(&request);
        assert_eq!(id.principal.as_deref(), Some("learner-42"));
        assert_eq!(id.ip, "203.0.113.7");
    }

    #[test]
    fn test_request_ids_are_unique() {
        let request = Request::new(());
        let mut maker = UuidRequestId;
        let a = maker.make_request_id(&request).unwrap();
        let b = maker.make_request_id(&request).unwrap();
        assert_ne!(a.header_value(), b.header_value());
    }
}
