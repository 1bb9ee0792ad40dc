// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Serving changelog windows to pulling peers.
//!
//! [`ChangelogServer`] answers `GET /checks/updates` and
//! `GET /filters/updates`. A request carries the requester's identity,
//! its last acknowledged sequence (`prev`) and the window limit (`end`).
//! Serving a window:
//!
//! 1. authorizes the requester (tracked peer, certificate name matches)
//! 2. retires queue entries `seq <= prev` - the at-least-once ack
//! 3. walks entries `seq <= end`, deduplicating by entity so each
//!    object appears at most once per response
//! 4. serializes each entity from current store state, silently
//!    skipping anything deleted since it was queued
//!
//! The returned document's `seq` is the highest sequence actually
//! included, which the peer will ack on its next request.

use crate::document::{ChangeDocument, StreamKind};
use crate::error::{ClusterError, Result};
use crate::metrics;
use crate::registry::{ChangeRecord, PeerRegistry, StreamState};
use crate::store::ConfigStore;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct ChangelogServer {
    registry: Arc<PeerRegistry>,
    store: Arc<dyn ConfigStore>,
}

impl ChangelogServer {
    pub fn new(registry: Arc<PeerRegistry>, store: Arc<dyn ConfigStore>) -> Self {
        Self { registry, store }
    }

    /// Serve a window of check updates to `requester`.
    pub fn serve_checks(
        &self,
        requester: Uuid,
        cn: &str,
        prev_ack: i64,
        limit: i64,
    ) -> Result<ChangeDocument> {
        self.serve(StreamKind::Checks, requester, cn, prev_ack, limit)
    }

    /// Serve a window of filterset updates to `requester`.
    pub fn serve_filters(
        &self,
        requester: Uuid,
        cn: &str,
        prev_ack: i64,
        limit: i64,
    ) -> Result<ChangeDocument> {
        self.serve(StreamKind::Filters, requester, cn, prev_ack, limit)
    }

    /// Serve one stream's window. Authorization failures change no state.
    pub fn serve(
        &self,
        stream: StreamKind,
        requester: Uuid,
        cn: &str,
        prev_ack: i64,
        limit: i64,
    ) -> Result<ChangeDocument> {
        let store = Arc::clone(&self.store);
        let served = self.registry.with_peer(requester, |peer| {
            if peer.cn != cn {
                return Err(ClusterError::Unauthorized {
                    peer_id: requester,
                    message: format!("certificate name mismatch: {} != {}", cn, peer.cn),
                });
            }
            let (doc, retired, skipped) = match stream {
                StreamKind::Checks => {
                    collect_window(&mut peer.checks, prev_ack, limit, |id| {
                        store.serialize_check(*id)
                    })
                }
                StreamKind::Filters => {
                    collect_window(&mut peer.filters, prev_ack, limit, |name| {
                        store.serialize_filter(name)
                    })
                }
            };
            Ok((doc, retired, skipped))
        });

        match served {
            None => {
                warn!(peer_id = %requester, %stream, "updates request from unknown peer");
                metrics::record_serve_rejected(stream.path(), "unknown_peer");
                Err(ClusterError::Unauthorized {
                    peer_id: requester,
                    message: "unknown peer".to_string(),
                })
            }
            Some(Err(e)) => {
                warn!(peer_id = %requester, %stream, error = %e, "updates request rejected");
                metrics::record_serve_rejected(stream.path(), "cn_mismatch");
                Err(e)
            }
            Some(Ok((doc, retired, skipped))) => {
                debug!(
                    peer_id = %requester,
                    %stream,
                    prev_ack,
                    limit,
                    served = doc.len(),
                    retired,
                    skipped,
                    seq = doc.seq,
                    "served changelog window"
                );
                metrics::record_serve(stream.path(), doc.len(), retired);
                Ok(doc)
            }
        }
    }
}

/// Trim acked entries, then build the response document for one stream.
///
/// Runs under the registry lock; `serialize` must answer from memory.
/// Returns `(document, retired, skipped)`.
fn collect_window<K, F>(
    stream: &mut StreamState<K>,
    prev_ack: i64,
    limit: i64,
    mut serialize: F,
) -> (ChangeDocument, usize, usize)
where
    K: Clone + Eq + Hash,
    F: FnMut(&K) -> Option<serde_json::Value>,
{
    let retired = stream.trim_acked(prev_ack);

    let window: Vec<ChangeRecord<K>> = stream
        .queue
        .iter()
        .take_while(|c| c.seq <= limit)
        .cloned()
        .collect();

    // Dedup within the window: an entity changed three times serializes
    // once, at its newest queued position.
    let mut seen = HashSet::with_capacity(window.len());
    let mut keep = vec![false; window.len()];
    for (i, rec) in window.iter().enumerate().rev() {
        if seen.insert(rec.key.clone()) {
            keep[i] = true;
        }
    }

    let mut doc = ChangeDocument::empty();
    let mut skipped = 0usize;
    for (i, rec) in window.iter().enumerate() {
        if !keep[i] {
            continue;
        }
        match serialize(&rec.key) {
            Some(entity) => {
                doc.entities.push(entity);
                doc.seq = rec.seq;
            }
            // Deleted since queued. The puller still acks past this
            // sequence via its window end, so the entry retires.
            None => skipped += 1,
        }
    }

    (doc, retired, skipped)
}
