//! Session id extraction from Traefik's forwarded request context
//!
//! Traefik's ForwardAuth middleware does not forward the original path as the
//! request path; it arrives in `X-Forwarded-Uri`. Browser sub-requests made by
//! the CARTA frontend (websocket upgrades, static assets) often only carry the
//! session path in their `Referer`. Both are consulted and the Referer wins
//! when both carry a session path.

use axum::http::header::REFERER;
use axum::http::HeaderMap;

pub use carta_common::session::{session_from_context, session_from_url, SessionToken};

/// Header set by Traefik with the original request URI
pub const X_FORWARDED_URI: &str = "x-forwarded-uri";

/// Extract the session id from request headers.
///
/// Header names are matched case-insensitively; values that are not valid
/// UTF-8 are ignored.
pub fn extract_session(headers: &HeaderMap) -> Option<SessionToken> {
    session_from_context(header_str(headers, REFERER.as_str()), header_str(headers, X_FORWARDED_URI))
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().unwrap());
        }
        map
    }

    #[test]
    fn test_extract_from_referer() {
        let h = headers(&[("Referer", "https://canfar.example/session/carta/abc123/")]);
        assert_eq!(extract_session(&h).unwrap().as_str(), "abc123");
    }

    #[test]
    fn test_extract_from_forwarded_uri_only() {
        let h = headers(&[
            ("Referer", "https://canfar.example/science-portal/"),
            ("X-Forwarded-Uri", "/session/carta/zz9/socket"),
        ]);
        assert_eq!(extract_session(&h).unwrap().as_str(), "zz9");
    }

    #[test]
    fn test_referer_wins_over_forwarded_uri() {
        let h = headers(&[
            ("referer", "https://host/session/carta/first1/"),
            ("x-forwarded-uri", "/session/carta/second2/"),
        ]);
        assert_eq!(extract_session(&h).unwrap().as_str(), "first1");
    }

    #[test]
    fn test_header_names_case_insensitive() {
        let h = headers(&[("X-FORWARDED-URI", "/session/carta/abc")]);
        assert_eq!(extract_session(&h).unwrap().as_str(), "abc");
    }

    #[test]
    fn test_pattern_case_insensitive() {
        let h = headers(&[("x-forwarded-uri", "/SESSION/CARTA/AbC123")]);
        assert_eq!(extract_session(&h).unwrap().as_str(), "AbC123");
    }

    #[test]
    fn test_no_session_path() {
        assert!(extract_session(&HeaderMap::new()).is_none());

        let h = headers(&[
            ("referer", "https://host/session/notebook/abc123"),
            ("x-forwarded-uri", "/session/carta/"),
        ]);
        assert!(extract_session(&h).is_none());
    }
}
