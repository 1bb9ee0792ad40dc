// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reconciling the peer registry with cluster membership.
//!
//! Every membership event - reboot, liveness change, payload change,
//! death - triggers the same full pass: bump the topology generation,
//! upsert every member except self (ingesting advertised watermarks),
//! and garbage-collect peers that left the configured cluster. Peers
//! whose boot time changed, or that we meet for the first time, get
//! their outbound changelogs rebuilt from the full entity set so the
//! restarted node converges from nothing.
//!
//! The returned peer list is the engine's cue to kick the scheduler.

use crate::broadcaster::ChangeBroadcaster;
use crate::membership::{MembershipEvent, MembershipProvider};
use crate::metrics;
use crate::registry::PeerRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Fire-and-forget handle the membership substrate uses to push
/// topology events into the engine. Cheap to clone; sends never block.
#[derive(Clone)]
pub struct TopologyNotifier {
    tx: mpsc::UnboundedSender<MembershipEvent>,
}

impl TopologyNotifier {
    pub(crate) fn new(tx: mpsc::UnboundedSender<MembershipEvent>) -> Self {
        Self { tx }
    }

    /// Report a membership event. Dropped silently if the engine is gone.
    pub fn notify(&self, event: MembershipEvent) {
        let _ = self.tx.send(event);
    }
}

pub struct TopologyWatcher {
    registry: Arc<PeerRegistry>,
    broadcaster: Arc<ChangeBroadcaster>,
    membership: Arc<dyn MembershipProvider>,
    generation: AtomicU64,
}

impl TopologyWatcher {
    pub fn new(
        registry: Arc<PeerRegistry>,
        broadcaster: Arc<ChangeBroadcaster>,
        membership: Arc<dyn MembershipProvider>,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            membership,
            generation: AtomicU64::new(0),
        }
    }

    /// React to a membership event. Returns the peers worth kicking.
    pub fn on_event(&self, event: &MembershipEvent) -> Vec<Uuid> {
        info!(kind = ?event.kind, node = %event.node, "membership event");
        self.reconcile()
    }

    /// Prime the registry from the current membership, without an event.
    /// Called once at engine start.
    pub fn bootstrap(&self) -> Vec<Uuid> {
        self.reconcile()
    }

    fn reconcile(&self) -> Vec<Uuid> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let self_id = self.membership.self_id();
        let members = self.membership.members();

        let mut touched = Vec::new();
        for member in &members {
            if member.id == self_id {
                continue;
            }
            let outcome = self.registry.upsert(member, generation);
            if let Some(reason) = outcome.resync {
                info!(
                    peer_id = %member.id,
                    cn = %member.cn,
                    ?reason,
                    "resyncing peer changelogs"
                );
                self.broadcaster.rebuild_peer(member.id);
            }
            touched.push(member.id);
        }

        for (id, cn) in self.registry.gc(generation) {
            info!(peer_id = %id, cn = %cn, "peer left the cluster");
            metrics::record_peer_retired();
        }
        metrics::set_tracked_peers(self.registry.len());

        touched
    }
}
