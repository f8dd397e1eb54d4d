//! Error types shared by the gateway and the interception tool
//!
//! Cluster access failures are kept distinct from "nothing matched": a query
//! that finds no object returns `Ok(None)` or an empty list, while transport,
//! auth and timeout problems surface as one of the variants below.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for CARTA sidecar operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A cluster query did not complete within its deadline
    #[error("timed out after {after:?}: {operation}")]
    Timeout {
        /// The operation that timed out (e.g., "list services")
        operation: String,
        /// The deadline that was exceeded
        after: Duration,
    },

    /// Manifest could not be parsed or is missing required fields
    #[error("manifest error: {message}")]
    Manifest {
        /// Description of what's wrong
        message: String,
        /// The resource kind, if it could be read
        kind: Option<String>,
    },

    /// Template rendering failed
    #[error("template error: {0}")]
    Template(String),

    /// Cluster client configuration error (kubeconfig, TLS material)
    #[error("client configuration error: {0}")]
    ClientConfig(String),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_client", "apply_manifest")
        context: String,
    },
}

impl Error {
    /// Create a manifest error with the given message
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a manifest error for a specific resource kind
    pub fn manifest_for(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Manifest {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a timeout error for an operation
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create an internal error without context
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with the context it occurred in
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True when the API server answered 404 for the addressed object
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Kube {
                source: kube::Error::Api(resp)
            } if resp.code == 404
        )
    }

    /// True for failures reaching or talking to the cluster
    ///
    /// These are the dependency errors the gateway logs at error level and
    /// degrades to a deny; everything else is a local bug or bad input.
    pub fn is_cluster_unavailable(&self) -> bool {
        matches!(self, Error::Kube { .. } | Error::Timeout { .. })
    }
}
