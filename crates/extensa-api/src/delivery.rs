//! Cache headers for compiled payloads.

use axum::http::header::{CACHE_CONTROL, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderValue};
use extensa_core::config::DeliveryConfig;

pub const JAVASCRIPT: &str = "application/javascript; charset=UTF-8";
pub const VARY_ON: &str = "Origin, Cache-Control";
const NO_STORE: &str = "no-store";

/// `Cache-Control` for a payload response.
///
/// Without a TTL nothing is cached. With one, clients get `public, max-age`,
/// unless they asked for `no-store` and skipping is allowed.
pub fn cache_control(config: &DeliveryConfig, request: &HeaderMap) -> HeaderValue {
    match config.cache_ttl {
        None => HeaderValue::from_static(NO_STORE),
        Some(_) if config.cache_skip_allowed && requests_no_store(request) => {
            HeaderValue::from_static(NO_STORE)
        }
        Some(ttl) => HeaderValue::from_str(&format!("public, max-age={}", ttl.as_secs()))
            .unwrap_or_else(|_| HeaderValue::from_static(NO_STORE)),
    }
}

fn requests_no_store(request: &HeaderMap) -> bool {
    request
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|directive| directive.trim().eq_ignore_ascii_case("no-store"))
}

/// Quoted entity tag for a fingerprint.
pub fn etag(fingerprint: &str) -> String {
    format!("\"{}\"", fingerprint)
}

/// Whether `If-None-Match` lists `etag` (or `*`).
pub fn not_modified(request: &HeaderMap, etag: &str) -> bool {
    request
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|tag| tag.trim().trim_start_matches("W/"))
        .any(|tag| tag == "*" || tag == etag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn headers(name: axum::http::HeaderName, value: &'static str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(name, HeaderValue::from_static(value));
        map
    }

    #[test]
    fn test_no_ttl_is_no_store() {
        let config = DeliveryConfig::default();
        assert_eq!(cache_control(&config, &HeaderMap::new()), "no-store");
    }

    #[test]
    fn test_ttl_sets_max_age() {
        let config = DeliveryConfig {
            cache_ttl: Some(Duration::from_secs(600)),
            cache_skip_allowed: false,
        };
        assert_eq!(cache_control(&config, &HeaderMap::new()), "public, max-age=600");
        // Client preference is ignored unless skipping is allowed.
        let request = headers(CACHE_CONTROL, "no-store");
        assert_eq!(cache_control(&config, &request), "public, max-age=600");
    }

    #[test]
    fn test_client_no_store_when_allowed() {
        let config = DeliveryConfig {
            cache_ttl: Some(Duration::from_secs(600)),
            cache_skip_allowed: true,
        };
        let request = headers(CACHE_CONTROL, "max-age=0, No-Store");
        assert_eq!(cache_control(&config, &request), "no-store");
        assert_eq!(cache_control(&config, &HeaderMap::new()), "public, max-age=600");
    }

    #[test]
    fn test_if_none_match() {
        let tag = etag("abc");
        assert!(not_modified(&headers(IF_NONE_MATCH, "\"x\", \"abc\""), &tag));
        assert!(not_modified(&headers(IF_NONE_MATCH, "W/\"abc\""), &tag));
        assert!(not_modified(&headers(IF_NONE_MATCH, "*"), &tag));
        assert!(!not_modified(&headers(IF_NONE_MATCH, "\"abd\""), &tag));
        assert!(!not_modified(&HeaderMap::new(), &tag));
    }
}
