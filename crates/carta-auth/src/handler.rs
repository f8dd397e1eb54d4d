//! ForwardAuth decision handler
//!
//! Traefik calls this for every request routed through the `carta-forwardauth`
//! middleware. A 2xx lets the request through and Traefik copies
//! `carta-auth-token` onto it; anything else is returned to the client as-is.

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, info, warn};

use carta_common::AUTH_HEADER;

use crate::error::{Error, Result};
use crate::resolver::ResolveIdentity;
use crate::server::AppState;
use crate::session::{extract_session, header_str, SessionToken, X_FORWARDED_URI};

/// A positive decision: the session and the user it belongs to
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    ok: bool,
    /// Session id taken from the request
    pub session: String,
    /// Owner of the session
    pub userid: String,
    #[serde(skip)]
    header: HeaderValue,
}

impl Admission {
    fn new(token: &SessionToken, userid: String) -> Result<Self> {
        let header = HeaderValue::from_str(&userid).map_err(|_| Error::InvalidIdentity {
            session: token.to_string(),
        })?;
        Ok(Self {
            ok: true,
            session: token.to_string(),
            userid,
            header,
        })
    }
}

impl IntoResponse for Admission {
    fn into_response(self) -> Response {
        let header = self.header.clone();
        ([(AUTH_HEADER, header)], Json(self)).into_response()
    }
}

/// Decide whether the request described by `headers` may pass.
///
/// No cluster query is made when the headers carry no session id. Every
/// lookup failure denies the request. Failures reaching the cluster are
/// logged at error level so they stand apart from a session that simply has
/// no owner.
pub async fn decide(resolver: &dyn ResolveIdentity, headers: &HeaderMap) -> Result<Admission> {
    let Some(token) = extract_session(headers) else {
        warn!(
            referer = header_str(headers, "referer").unwrap_or_default(),
            x_forwarded_uri = header_str(headers, X_FORWARDED_URI).unwrap_or_default(),
            "missing_session"
        );
        return Err(Error::MissingSession);
    };

    let userid = match resolver.resolve(&token).await {
        Ok(Some(userid)) => userid,
        Ok(None) => {
            warn!(session = %token, "userid_not_found");
            return Err(Error::IdentityNotFound {
                session: token.to_string(),
            });
        }
        Err(e) => {
            if e.is_cluster_unavailable() {
                error!(session = %token, error = %e, "cluster_query_failed");
            } else {
                warn!(session = %token, error = %e, "lookup_failed");
            }
            return Err(Error::Cluster(e));
        }
    };

    let admission = Admission::new(&token, userid).inspect_err(|e| {
        warn!(session = %token, error = %e, "userid_not_found");
    })?;
    info!(session = %token, userid = %admission.userid, "forward_auth_ok");
    Ok(admission)
}

/// Catch-all ForwardAuth endpoint, any method and any path
pub async fn forward_auth(State(state): State<AppState>, headers: HeaderMap) -> Result<Admission> {
    decide(state.resolver.as_ref(), &headers).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MockResolveIdentity;
    use axum::http::StatusCode;
    use std::time::Duration;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().unwrap());
        }
        map
    }

    #[tokio::test]
    async fn test_missing_session_skips_resolver() {
        let mut resolver = MockResolveIdentity::new();
        resolver.expect_resolve().never();

        let h = headers(&[("x-forwarded-uri", "/science-portal/")]);
        let err = decide(&resolver, &h).await.unwrap_err();
        assert!(matches!(err, Error::MissingSession));
    }

    #[tokio::test]
    async fn test_unknown_session_denied() {
        let mut resolver = MockResolveIdentity::new();
        resolver.expect_resolve().times(1).returning(|_| Ok(None));

        let h = headers(&[("x-forwarded-uri", "/session/carta/abc123")]);
        let err = decide(&resolver, &h).await.unwrap_err();
        assert!(matches!(err, Error::IdentityNotFound { ref session } if session == "abc123"));
    }

    #[tokio::test]
    async fn test_cluster_failure_denied() {
        let mut resolver = MockResolveIdentity::new();
        resolver.expect_resolve().returning(|_| {
            Err(carta_common::Error::timeout(
                "list services",
                Duration::from_secs(5),
            ))
        });

        let h = headers(&[("x-forwarded-uri", "/session/carta/abc123")]);
        let err = decide(&resolver, &h).await.unwrap_err();
        assert!(matches!(err, Error::Cluster(_)));
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unexpected_lookup_failure_denied() {
        let mut resolver = MockResolveIdentity::new();
        resolver
            .expect_resolve()
            .returning(|_| Err(carta_common::Error::internal("serialize labels")));

        let h = headers(&[("x-forwarded-uri", "/session/carta/abc123")]);
        let err = decide(&resolver, &h).await.unwrap_err();
        assert!(matches!(err, Error::Cluster(ref e) if !e.is_cluster_unavailable()));
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admission_resolves_referer_token() {
        let mut resolver = MockResolveIdentity::new();
        resolver
            .expect_resolve()
            .withf(|token| token.as_str() == "first1")
            .returning(|_| Ok(Some("alice".to_string())));

        let h = headers(&[
            ("referer", "https://host/session/carta/first1/"),
            ("x-forwarded-uri", "/session/carta/second2/"),
        ]);
        let admission = decide(&resolver, &h).await.unwrap();
        assert_eq!(admission.session, "first1");
        assert_eq!(admission.userid, "alice");
    }

    #[tokio::test]
    async fn test_admission_response_shape() {
        let mut resolver = MockResolveIdentity::new();
        resolver
            .expect_resolve()
            .returning(|_| Ok(Some("carol".to_string())));

        let h = headers(&[("x-forwarded-uri", "/session/carta/zz9")]);
        let response = decide(&resolver, &h).await.unwrap().into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[AUTH_HEADER], "carol");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"ok": true, "session": "zz9", "userid": "carol"})
        );
    }

    #[tokio::test]
    async fn test_userid_unusable_as_header_denied() {
        let mut resolver = MockResolveIdentity::new();
        resolver
            .expect_resolve()
            .returning(|_| Ok(Some("bad\nuser".to_string())));

        let h = headers(&[("x-forwarded-uri", "/session/carta/abc123")]);
        let err = decide(&resolver, &h).await.unwrap_err();
        assert!(matches!(err, Error::InvalidIdentity { .. }));
    }
}
