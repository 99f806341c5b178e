//! Client identity used as the rate limit key.

use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Identity used when neither headers nor the connection reveal one.
pub const UNKNOWN_CLIENT: &str = "unknown";

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Derive the client identity for a request.
///
/// Proxy headers are consulted only when `trust_proxy_headers` is set:
/// the first non-empty `X-Forwarded-For` entry, then `X-Real-IP`. Otherwise
/// the peer address is used.
pub fn extract_client_identity(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> String {
    if trust_proxy_headers {
        if let Some(forwarded) = forwarded_for(headers) {
            return forwarded;
        }
        if let Some(real_ip) = header_str(headers, X_REAL_IP) {
            return real_ip.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .find(|entry| !entry.is_empty())
        .map(str::to_string)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("10.0.0.7:51234".parse().unwrap())
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_untrusted_headers_are_ignored() {
        let h = headers(&[("x-forwarded-for", "1.2.3.4"), ("x-real-ip", "5.6.7.8")]);
        assert_eq!(extract_client_identity(&h, peer(), false), "10.0.0.7");
    }

    #[test]
    fn test_first_forwarded_entry_wins() {
        let h = headers(&[("x-forwarded-for", " , 1.2.3.4, 9.9.9.9")]);
        assert_eq!(extract_client_identity(&h, peer(), true), "1.2.3.4");
    }

    #[test]
    fn test_real_ip_fallback() {
        let h = headers(&[("x-forwarded-for", " "), ("x-real-ip", "5.6.7.8")]);
        assert_eq!(extract_client_identity(&h, peer(), true), "5.6.7.8");
    }

    #[test]
    fn test_peer_fallback_when_trusted_headers_absent() {
        assert_eq!(extract_client_identity(&HeaderMap::new(), peer(), true), "10.0.0.7");
    }

    #[test]
    fn test_unknown_without_peer() {
        assert_eq!(extract_client_identity(&HeaderMap::new(), None, false), UNKNOWN_CLIENT);
    }
}
