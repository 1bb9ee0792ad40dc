//! Broadcasting local configuration changes to the cluster.
//!
//! When the daemon mutates a check or filterset it tells us through a
//! [`ChangeNotifier`] - a fire-and-forget handle callers can use from any
//! thread without blocking and without seeing errors. The engine control
//! loop drains the channel and hands each event to [`ChangeBroadcaster`],
//! which assigns the next global changelog sequence, appends the entry to
//! every tracked peer's outbound queue, and republishes our watermarks in
//! the heartbeat payload so peers learn there is something to pull.

use crate::membership::MembershipProvider;
use crate::metrics;
use crate::registry::PeerRegistry;
use crate::store::{CheckChange, ConfigStore, FilterChange};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// A local mutation event, as carried on the notification channel.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Check(CheckChange),
    Filter(FilterChange),
}

/// Fire-and-forget handle for reporting local config mutations.
///
/// Cheap to clone. Sends never block; if the engine is gone the event is
/// silently dropped, which is fine - a restarted engine rebuilds its
/// changelogs from the store snapshot anyway.
#[derive(Clone)]
pub struct ChangeNotifier {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl ChangeNotifier {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ChangeEvent>) -> Self {
        Self { tx }
    }

    /// Report that a check was created, updated, or deleted.
    pub fn notify_check_changed(&self, change: CheckChange) {
        let _ = self.tx.send(ChangeEvent::Check(change));
    }

    /// Report that a filterset was created, updated, or deleted.
    pub fn notify_filter_changed(&self, change: FilterChange) {
        let _ = self.tx.send(ChangeEvent::Filter(change));
    }
}

/// Assigns changelog sequences and fans changes out to peer queues.
pub struct ChangeBroadcaster {
    registry: Arc<PeerRegistry>,
    membership: Arc<dyn MembershipProvider>,
    store: Arc<dyn ConfigStore>,
    checks_produced: AtomicI64,
    filters_produced: AtomicI64,
}

impl ChangeBroadcaster {
    pub fn new(
        registry: Arc<PeerRegistry>,
        membership: Arc<dyn MembershipProvider>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            registry,
            membership,
            store,
            checks_produced: AtomicI64::new(0),
            filters_produced: AtomicI64::new(0),
        }
    }

    /// Highest check changelog sequence produced by this node.
    pub fn checks_produced(&self) -> i64 {
        self.checks_produced.load(Ordering::SeqCst)
    }

    /// Highest filterset changelog sequence produced by this node.
    pub fn filters_produced(&self) -> i64 {
        self.filters_produced.load(Ordering::SeqCst)
    }

    /// Queue a check change for every tracked peer.
    ///
    /// Self-check-module checks never replicate (every node runs its
    /// own), and a non-positive config sequence means the mutation is
    /// not yet committed locally.
    pub fn on_check_changed(&self, change: &CheckChange) {
        if change.self_check {
            debug!(check_id = %change.id, "skipping self-check change");
            return;
        }
        if change.seq <= 0 {
            debug!(check_id = %change.id, seq = change.seq, "skipping uncommitted check change");
            return;
        }
        let seq = self
            .registry
            .queue_check_change(None, change.id, &self.checks_produced);
        metrics::record_change_queued("checks", self.registry.len());
        debug!(check_id = %change.id, seq, "queued check change");
        self.republish_watermarks();
    }

    /// Queue a filterset change for every tracked peer.
    pub fn on_filter_changed(&self, change: &FilterChange) {
        if change.seq <= 0 {
            debug!(filter = %change.name, seq = change.seq, "skipping uncommitted filterset change");
            return;
        }
        let seq = self
            .registry
            .queue_filter_change(None, &change.name, &self.filters_produced);
        metrics::record_change_queued("filters", self.registry.len());
        debug!(filter = %change.name, seq, "queued filterset change");
        self.republish_watermarks();
    }

    /// Rebuild one peer's outbound changelogs from the full entity set.
    ///
    /// Used after a peer reboot (or first contact): the peer's queues
    /// were cleared, so every current entity is re-marked for it. Each
    /// re-mark takes a fresh global sequence; the watermark moves
    /// forward, never back.
    pub fn rebuild_peer(&self, peer_id: Uuid) {
        let mut checks = 0usize;
        for change in self.store.checks_snapshot() {
            if change.self_check || change.seq <= 0 {
                continue;
            }
            self.registry
                .queue_check_change(Some(peer_id), change.id, &self.checks_produced);
            checks += 1;
        }
        let mut filters = 0usize;
        for change in self.store.filters_snapshot() {
            if change.seq <= 0 {
                continue;
            }
            self.registry
                .queue_filter_change(Some(peer_id), &change.name, &self.filters_produced);
            filters += 1;
        }
        debug!(peer_id = %peer_id, checks, filters, "rebuilt outbound changelogs");
        metrics::record_peer_resync(checks + filters);
        self.republish_watermarks();
    }

    /// Push current watermarks into the heartbeat payload.
    pub fn republish_watermarks(&self) {
        let checks = self.checks_produced();
        let filters = self.filters_produced();
        self.membership
            .publish_watermarks(checks.to_be_bytes(), filters.to_be_bytes());
        metrics::set_produced("checks", checks);
        metrics::set_produced("filters", filters);
    }
}
