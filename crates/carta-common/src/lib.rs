//! Common types for the CARTA forwardAuth sidecar: errors, constants and kube utilities
//!
//! Shared by the gateway (`carta-auth`) and the interception tool
//! (`carta-intercept`). Both talk to the same namespace of session workloads
//! and agree on the label keys and routing resources defined here.

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod session;
pub mod signal;
pub mod telemetry;
pub mod template;
pub mod yaml;

pub use error::Error;
pub use session::SessionToken;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace holding interactive session workloads
pub const DEFAULT_NAMESPACE: &str = "skaha-workload";

/// Label carrying the session id on session Services and Pods
pub const DEFAULT_SESSION_LABEL_KEY: &str = "canfar-net-sessionID";

/// Label carrying the owning user id on session Services and Pods
pub const DEFAULT_USER_LABEL_KEY: &str = "canfar-net-userid";

/// Path prefix of CARTA session URLs
pub const SESSION_PATH_PREFIX: &str = "/session/carta/";

/// Response header carrying the resolved user id, copied upstream by Traefik
pub const AUTH_HEADER: &str = "carta-auth-token";

/// Name of the Traefik ForwardAuth middleware pointing at this sidecar
pub const FORWARDAUTH_MIDDLEWARE: &str = "carta-forwardauth";

/// Prefix of the IngressRoute created by skaha for each CARTA session
pub const SESSION_INGRESS_PREFIX: &str = "skaha-carta-ingress-";

/// Traefik IngressRoute API group
pub const INGRESS_ROUTE_GROUP: &str = "traefik.io";

/// Traefik IngressRoute API version
pub const INGRESS_ROUTE_VERSION: &str = "v1alpha1";

/// Traefik IngressRoute kind
pub const INGRESS_ROUTE_KIND: &str = "IngressRoute";

/// In-cluster ServiceAccount CA bundle
pub const SERVICE_ACCOUNT_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Expected IngressRoute name for a session
pub fn session_ingress_name(session_id: &str) -> String {
    format!("{SESSION_INGRESS_PREFIX}{session_id}")
}

/// URL path fragment identifying a session in route match expressions
pub fn session_path(session_id: &str) -> String {
    format!("{SESSION_PATH_PREFIX}{session_id}")
}
