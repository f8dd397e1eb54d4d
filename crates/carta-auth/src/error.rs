//! Error types for the forwardAuth handler
//!
//! Every admission failure is a 403 with a short plain-text body. Cluster
//! failures are logged separately by the handler but answer the same way as a
//! missing mapping: the request is denied, never admitted.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Body returned when no session id could be extracted
pub const MISSING_SESSION_BODY: &str = "missing session id";

/// Body returned when the session could not be mapped to a user
pub const USERID_NOT_FOUND_BODY: &str = "userid not found";

/// Error type for gateway operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Neither the Referer nor the X-Forwarded-Uri carried a session path
    #[error("missing session id")]
    MissingSession,

    /// No Service or Pod carries a user label for this session
    #[error("userid not found for session {session}")]
    IdentityNotFound {
        /// The session id that was looked up
        session: String,
    },

    /// The resolved user id cannot be sent as a header value
    #[error("userid for session {session} is not a valid header value")]
    InvalidIdentity {
        /// The session id that was looked up
        session: String,
    },

    /// Querying cluster state failed
    #[error("cluster lookup failed: {0}")]
    Cluster(#[from] carta_common::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Error::MissingSession => (StatusCode::FORBIDDEN, MISSING_SESSION_BODY),
            Error::IdentityNotFound { .. }
            | Error::InvalidIdentity { .. }
            | Error::Cluster(_) => (StatusCode::FORBIDDEN, USERID_NOT_FOUND_BODY),
            Error::Config(_) | Error::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        };

        (status, body).into_response()
    }
}
