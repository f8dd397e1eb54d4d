//! Gateway configuration, read once at startup from flags or environment

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args};
use tracing::info;

use carta_common::kube_utils::{ClientOptions, TlsVerification};
use carta_common::{
    DEFAULT_NAMESPACE, DEFAULT_SESSION_LABEL_KEY, DEFAULT_USER_LABEL_KEY,
    SERVICE_ACCOUNT_CA_PATH, SESSION_PATH_PREFIX,
};

use crate::lookup::LabelKeys;

/// ForwardAuth gateway settings
#[derive(Args, Debug, Clone)]
pub struct GatewayConfig {
    /// Address the HTTP server listens on
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    /// Namespace holding session Services and Pods
    #[arg(long, env = "TARGET_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// How long a resolved session owner is cached
    #[arg(long, env = "CACHE_TTL_SECONDS", default_value_t = 3600)]
    pub cache_ttl_seconds: u64,

    /// Maximum number of cached sessions
    #[arg(long, env = "CACHE_MAX_SIZE", default_value_t = 4096)]
    pub cache_max_size: u64,

    /// Label carrying the session id
    #[arg(long, env = "SESSION_LABEL_KEY", default_value = DEFAULT_SESSION_LABEL_KEY)]
    pub session_label_key: String,

    /// Label carrying the owning user id
    #[arg(long, env = "USER_LABEL_KEY", default_value = DEFAULT_USER_LABEL_KEY)]
    pub user_label_key: String,

    /// Upper bound on each cluster query
    #[arg(long, env = "CLUSTER_QUERY_TIMEOUT_SECONDS", default_value_t = 5)]
    pub query_timeout_seconds: u64,

    /// Default log level when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Skip API server certificate verification
    #[arg(
        long,
        env = "DEV_MODE",
        default_value_t = false,
        num_args = 0..=1,
        default_missing_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub dev_mode: bool,

    /// Verify the API server against the in-cluster ServiceAccount CA
    #[arg(
        long,
        env = "PROD",
        default_value_t = false,
        num_args = 0..=1,
        default_missing_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub prod: bool,

    /// Verify the API server against this PEM bundle
    #[arg(long, env = "CLUSTER_CA_FILE")]
    pub ca_file: Option<PathBuf>,
}

impl GatewayConfig {
    /// Certificate verification mode.
    ///
    /// Dev mode wins over an explicit CA file, which wins over prod mode.
    pub fn tls_verification(&self) -> TlsVerification {
        if self.dev_mode {
            TlsVerification::Disabled
        } else if let Some(path) = &self.ca_file {
            TlsVerification::CaFile(path.clone())
        } else if self.prod {
            TlsVerification::CaFile(PathBuf::from(SERVICE_ACCOUNT_CA_PATH))
        } else {
            TlsVerification::Default
        }
    }

    /// Cache entry lifetime
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Cluster query bound
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }

    /// Session and user label keys
    pub fn label_keys(&self) -> LabelKeys {
        LabelKeys {
            session: self.session_label_key.clone(),
            user: self.user_label_key.clone(),
        }
    }

    /// Kube client options derived from these settings
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            tls: self.tls_verification(),
            connect_timeout: self.query_timeout(),
            ..ClientOptions::default()
        }
    }

    /// Log every effective parameter once
    pub fn log_parameters(&self) {
        info!(
            listen_addr = %self.listen_addr,
            namespace = %self.namespace,
            session_label_key = %self.session_label_key,
            user_label_key = %self.user_label_key,
            session_pattern = %format!("{SESSION_PATH_PREFIX}([a-z0-9]+)"),
            cache_ttl_seconds = self.cache_ttl_seconds,
            cache_max_size = self.cache_max_size,
            query_timeout_seconds = self.query_timeout_seconds,
            tls_verification = %self.tls_verification(),
            pid = std::process::id(),
            "startup_parameters"
        );
    }
}
