//! CARTA session ids
//!
//! Shared by the gateway, which finds them in forwarded URLs, and the
//! interception tool, which takes one on the command line. Both end up
//! embedding the id in label selectors and object names.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static SESSION_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/session/carta/([a-z0-9]+)").expect("session path pattern is valid")
});

static SESSION_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-z0-9]+$").expect("session id pattern is valid"));

/// A CARTA session id that has been checked against the session id alphabet.
///
/// Only values built through [`SessionToken::parse`] or [`session_from_url`]
/// exist, so a token is always safe to embed in a label selector or an object
/// name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Accept `raw` if it is a bare session id (`[a-z0-9]+`, any case)
    pub fn parse(raw: &str) -> Option<Self> {
        SESSION_ID_RE
            .is_match(raw)
            .then(|| Self(raw.to_string()))
    }

    /// The session id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Find the session id in a URL or path
pub fn session_from_url(url: &str) -> Option<SessionToken> {
    SESSION_PATH_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| SessionToken(m.as_str().to_string()))
}

/// Pick the session id from the Referer first, then from X-Forwarded-Uri
pub fn session_from_context(
    referer: Option<&str>,
    forwarded_uri: Option<&str>,
) -> Option<SessionToken> {
    referer
        .and_then(session_from_url)
        .or_else(|| forwarded_uri.and_then(session_from_url))
}
