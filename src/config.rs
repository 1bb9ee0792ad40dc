//! Configuration for the clustering subsystem.
//!
//! This module defines all configuration types needed to run the cluster
//! engine. Configuration is passed to
//! [`ClusterEngine::new()`](crate::ClusterEngine::new) and can be
//! constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use cluster_replication::config::ClusterConfig;
//!
//! let config = ClusterConfig {
//!     batch_size: 100,
//!     ..Default::default()
//! };
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! batch_size: 500
//! fail_backoff: "500ms"
//! connect_timeout: "2s"
//! request_timeout: "2m"
//! replication_port: 43191
//!
//! tls:
//!   ca_file: "/etc/noit/ca.crt"
//!   cert_file: "/etc/noit/node.crt"
//!   key_file: "/etc/noit/node.key"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed from daemon to ClusterEngine::new()
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `ClusterEngine::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Maximum changelog entries fetched per stream per job.
    /// `0` means unlimited (the whole `[fetched, available]` window).
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    /// Fixed sleep after a failed stream fetch, as a duration string
    /// (e.g., "500ms"). Jobs never retry internally; the scheduler
    /// re-issues the same window after this pause.
    #[serde(default = "default_fail_backoff")]
    pub fail_backoff: String,

    /// TCP connect timeout for updates requests.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,

    /// Overall timeout for a single updates request. Large windows can
    /// carry thousands of entities, so this is deliberately generous.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    /// Port peers serve their `/checks/updates` and `/filters/updates`
    /// endpoints on.
    #[serde(default = "default_replication_port")]
    pub replication_port: u16,

    /// TLS material for mutual-auth updates requests.
    /// When absent, plain HTTP is used (tests, dev meshes).
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

fn default_batch_size() -> i64 {
    500
}

fn default_fail_backoff() -> String {
    "500ms".to_string()
}

fn default_connect_timeout() -> String {
    "2s".to_string()
}

fn default_request_timeout() -> String {
    "2m".to_string()
}

fn default_replication_port() -> u16 {
    43191
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            fail_backoff: "500ms".to_string(),
            connect_timeout: "2s".to_string(),
            request_timeout: "2m".to_string(),
            replication_port: 43191,
            tls: None,
        }
    }
}

impl ClusterConfig {
    /// Create a config for testing: tiny backoffs, plain HTTP.
    pub fn for_testing() -> Self {
        Self {
            batch_size: 500,
            fail_backoff: "10ms".to_string(),
            connect_timeout: "500ms".to_string(),
            request_timeout: "2s".to_string(),
            replication_port: 43191,
            tls: None,
        }
    }

    /// Parse the fail_backoff string to a Duration.
    pub fn fail_backoff_duration(&self) -> Duration {
        humantime::parse_duration(&self.fail_backoff).unwrap_or(Duration::from_millis(500))
    }

    /// Parse the connect_timeout string to a Duration.
    pub fn connect_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.connect_timeout).unwrap_or(Duration::from_secs(2))
    }

    /// Parse the request_timeout string to a Duration.
    pub fn request_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.request_timeout).unwrap_or(Duration::from_secs(120))
    }

    /// Validate knobs that serde cannot check on its own.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.batch_size < 0 {
            return Err(crate::error::ClusterError::Config(format!(
                "batch_size must be >= 0, got {}",
                self.batch_size
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TlsConfig: mutual-auth material for the updates client
// ═══════════════════════════════════════════════════════════════════════════════

/// Paths to TLS material used by the updates client.
///
/// Peers authenticate each other by certificate name (cn), so the client
/// presents an identity and verifies the peer against the cluster CA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Cluster CA bundle (PEM).
    pub ca_file: String,

    /// This node's certificate (PEM).
    pub cert_file: String,

    /// This node's private key (PEM).
    pub key_file: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
