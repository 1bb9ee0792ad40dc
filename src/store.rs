// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Config store integration traits.
//!
//! Defines the interface to the daemon's check and filterset storage.
//! The clustering subsystem never mutates configuration on its own
//! behalf; it only serializes entities when serving a peer and applies
//! entities fetched from a peer.
//!
//! Serialization methods are synchronous because the changelog server
//! calls them while holding the peer registry lock; implementations must
//! answer from in-memory state. Apply methods are async and are only
//! ever called by replication workers, off the lock.

use crate::document::ChangeDocument;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// Result type for config store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Simplified error for config store operations.
#[derive(Debug, Clone)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for crate::error::ClusterError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.0)
    }
}

/// A local check mutation, as reported by the daemon.
///
/// `seq` is the check's own configuration sequence (its version), not a
/// changelog position. Checks belonging to the self-check module never
/// replicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckChange {
    pub id: Uuid,
    pub seq: i64,
    #[serde(default)]
    pub self_check: bool,
}

/// A local filterset mutation, as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterChange {
    pub name: String,
    pub seq: i64,
}

/// Trait defining what we need from the daemon's config storage.
///
/// The daemon provides an implementation of this trait, allowing us to:
/// 1. Serialize current entities when serving a peer's updates request
/// 2. Apply batches of entities fetched from a peer
/// 3. Enumerate the full entity set when rebuilding a peer's changelog
///
/// This trait allows testing with mocks and decouples us from the
/// check/filterset storage internals.
pub trait ConfigStore: Send + Sync + 'static {
    /// Serialize the current state of a check.
    ///
    /// Returns `None` when the check no longer exists or must not
    /// replicate (self-check module). Called under the registry lock;
    /// must not block.
    fn serialize_check(&self, id: Uuid) -> Option<serde_json::Value>;

    /// Serialize the current state of a filterset.
    ///
    /// Returns `None` when the filterset no longer exists.
    fn serialize_filter(&self, name: &str) -> Option<serde_json::Value>;

    /// Apply a batch of check entities fetched from a peer.
    ///
    /// Returns the number of entities applied. Partial application is
    /// acceptable: the batch will be replayed and applies are idempotent.
    fn apply_checks(&self, doc: ChangeDocument) -> BoxFuture<'_, usize>;

    /// Apply a batch of filterset entities fetched from a peer.
    fn apply_filters(&self, doc: ChangeDocument) -> BoxFuture<'_, usize>;

    /// Every replicable check currently configured. Used to rebuild a
    /// peer's outbound changelog after a reboot.
    fn checks_snapshot(&self) -> Vec<CheckChange>;

    /// Every filterset currently configured.
    fn filters_snapshot(&self) -> Vec<FilterChange>;
}

/// A no-op implementation for testing/standalone mode.
///
/// Serializes nothing, applies everything, holds no entities.
#[derive(Clone)]
pub struct NoOpConfigStore;

impl ConfigStore for NoOpConfigStore {
    fn serialize_check(&self, id: Uuid) -> Option<serde_json::Value> {
        tracing::trace!(check_id = %id, "NoOp: no check to serialize");
        None
    }

    fn serialize_filter(&self, name: &str) -> Option<serde_json::Value> {
        tracing::trace!(filter = %name, "NoOp: no filterset to serialize");
        None
    }

    fn apply_checks(&self, doc: ChangeDocument) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            tracing::debug!(count = doc.len(), seq = doc.seq, "NoOp: would apply checks");
            Ok(doc.len())
        })
    }

    fn apply_filters(&self, doc: ChangeDocument) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            tracing::debug!(count = doc.len(), seq = doc.seq, "NoOp: would apply filtersets");
            Ok(doc.len())
        })
    }

    fn checks_snapshot(&self) -> Vec<CheckChange> {
        Vec::new()
    }

    fn filters_snapshot(&self) -> Vec<FilterChange> {
        Vec::new()
    }
}
