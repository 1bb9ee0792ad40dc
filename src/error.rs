// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for cluster replication.
//!
//! This module defines the error types used throughout the clustering
//! subsystem. Errors are categorized by their source (transport, store,
//! etc.) and include context to help with debugging.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Transport` | Yes | Peer unreachable, timeouts, non-200 responses |
//! | `Protocol` | Yes | Malformed update document from a peer |
//! | `Store` | Yes | Config store temporarily unable to apply a batch |
//! | `Unauthorized` | No | Updates request from an unknown or mismatched peer |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Engine state machine violation |
//! | `Shutdown` | No | Engine is shutting down |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Use [`ClusterError::is_retryable()`] to determine if an operation should
//! be retried. Replication jobs never retry internally: a failed stream
//! fetch marks the job failed, the worker sleeps a fixed backoff, and the
//! scheduler re-issues the same window on the next pass. Retryability here
//! classifies whether that re-issue can be expected to succeed.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for clustering operations.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors that can occur in the clustering subsystem.
///
/// Each variant includes context about where the error occurred.
/// Use [`is_retryable()`](Self::is_retryable) to check if the operation
/// should be retried.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Transport-level failure fetching updates from a peer.
    ///
    /// Covers connection failures, timeouts, TLS handshake errors and
    /// non-200 responses. Retryable - the scheduler will re-issue the
    /// same window.
    #[error("Transport error ({peer}): {message}")]
    Transport { peer: String, message: String },

    /// Malformed update document from a peer.
    ///
    /// The batch arrived but could not be parsed. Treated like a
    /// transport failure: the window is re-fetched on the next pass.
    #[error("Protocol error ({peer}): {message}")]
    Protocol { peer: String, message: String },

    /// The local config store could not apply a replicated batch.
    ///
    /// Retryable - the same window is replayed until the store accepts it.
    #[error("Store error: {0}")]
    Store(String),

    /// An updates request from a node we do not track, or whose claimed
    /// identity does not match its registered name.
    ///
    /// No state changes. The daemon's HTTP layer maps this to a 403.
    #[error("Unauthorized updates request from {peer_id}: {message}")]
    Unauthorized { peer_id: Uuid, message: String },

    /// Invalid or missing configuration.
    ///
    /// Occurs during engine initialization if config is malformed.
    /// Not retryable - fix the configuration and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine state machine violation.
    ///
    /// Occurs when an operation is attempted in the wrong state
    /// (e.g., calling `start()` on an already-running engine).
    /// Not retryable - indicates a bug in the caller.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    ///
    /// Returned when operations are attempted during shutdown.
    /// Not retryable - engine is terminating.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    ///
    /// Catch-all for errors that shouldn't happen.
    /// Not retryable - indicates a bug that needs investigation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClusterError {
    /// Create a transport error for a peer.
    pub fn transport(peer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            peer: peer.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error for a peer.
    pub fn protocol(peer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            peer: peer.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true, // Network errors are retryable
            Self::Protocol { .. } => true,  // Re-fetch the window
            Self::Store(_) => true,
            Self::Unauthorized { .. } => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }
}
