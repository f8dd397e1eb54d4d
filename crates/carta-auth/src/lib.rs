//! CARTA ForwardAuth sidecar
//!
//! Traefik sends every request for a CARTA session to this service before
//! forwarding it. The session id is read from the request context, mapped to
//! the user that owns the session by looking at labels on the session's
//! Service (or Pod), and returned in a header that Traefik copies upstream.
//!
//! # Architecture
//!
//! ```text
//! Traefik ──► forward_auth ──► SessionResolver ──► IdentityCache
//!             (extract id)                    └──► ClusterIdentityLookup ──► K8s API
//!                                                  (Service, then Pod)
//! ```
//!
//! # Endpoints
//!
//! - `GET /livez` - Liveness, no dependencies
//! - `GET /readyz` - Readiness, probes the API server
//! - `* /*` - ForwardAuth decision: 200 + `carta-auth-token` or 403

#![deny(missing_docs)]

pub mod cache;
pub mod config;
pub mod error;
pub mod handler;
pub mod health;
pub mod lookup;
pub mod resolver;
pub mod server;
pub mod session;

pub use cache::IdentityCache;
pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use handler::{decide, Admission};
pub use health::{ClusterProbe, KubeProbe};
pub use lookup::{ClusterIdentityLookup, KubeLabelQuery, LabelKeys, LabelQuery, SessionObjectKind};
pub use resolver::{ResolveIdentity, SessionResolver};
pub use server::{build_state, router, start_server, AppState};
pub use session::{extract_session, SessionToken};
