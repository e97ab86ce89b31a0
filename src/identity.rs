//! Identity extraction for admission checks.

use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Where the admission identity of a request comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentitySource {
    /// `x-user-id`, set by the authentication layer
    UserIdHeader,
    /// `x-api-key`, falling back to `authorization`
    ApiKey,
    /// Client address from proxy headers or the socket
    ClientIp,
    /// First source that yields a value
    FirstOf(Vec<IdentitySource>),
}

impl Default for IdentitySource {
    fn default() -> Self {
        IdentitySource::FirstOf(vec![IdentitySource::UserIdHeader, IdentitySource::ClientIp])
    }
}

impl IdentitySource {
    /// Resolve the identity, or `None` when this source has nothing.
    pub fn extract(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
        match self {
            IdentitySource::UserIdHeader => header_value(headers, "x-user-id"),
            IdentitySource::ApiKey => header_value(headers, "x-api-key")
                .or_else(|| header_value(headers, "authorization")),
            IdentitySource::ClientIp => client_ip(headers, peer),
            IdentitySource::FirstOf(sources) => sources
                .iter()
                .find_map(|source| source.extract(headers, peer)),
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Client address, preferring proxy headers over the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    header_value(headers, "x-forwarded-for")
        .and_then(|xff| xff.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_value(headers, "x-real-ip"))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn create_test_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("test-api-key"));
        headers.insert("x-user-id", HeaderValue::from_static("user123"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("192.168.1.1, 10.0.0.1"));
        headers
    }

    #[test]
    fn test_user_id_source() {
        let headers = create_test_headers();
        assert_eq!(
            IdentitySource::UserIdHeader.extract(&headers, None),
            Some("user123".to_string())
        );
    }

    #[test]
    fn test_api_key_falls_back_to_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        assert_eq!(
            IdentitySource::ApiKey.extract(&headers, None),
            Some("Bearer abc".to_string())
        );
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let headers = create_test_headers();
        let peer: SocketAddr = "203.0.113.9:4000".parse().unwrap();
        assert_eq!(
            IdentitySource::ClientIp.extract(&headers, Some(peer)),
            Some("192.168.1.1".to_string())
        );
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let peer: SocketAddr = "203.0.113.9:4000".parse().unwrap();
        assert_eq!(
            IdentitySource::ClientIp.extract(&HeaderMap::new(), Some(peer)),
            Some("203.0.113.9".to_string())
        );
        assert_eq!(IdentitySource::ClientIp.extract(&HeaderMap::new(), None), None);
    }

    #[test]
    fn test_default_prefers_user_then_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.7"));
        assert_eq!(
            IdentitySource::default().extract(&headers, None),
            Some("198.51.100.7".to_string())
        );

        headers.insert("x-user-id", HeaderValue::from_static("u1"));
        assert_eq!(
            IdentitySource::default().extract(&headers, None),
            Some("u1".to_string())
        );
    }

    #[test]
    fn test_blank_header_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("   "));
        assert_eq!(IdentitySource::UserIdHeader.extract(&headers, None), None);
    }
}
