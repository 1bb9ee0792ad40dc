// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The peer registry: authoritative replication state for every tracked peer.
//!
//! One [`Peer`] exists per cluster member other than self. Each peer
//! carries two independent streams (checks, filtersets), and each stream
//! carries:
//!
//! - an outbound changelog queue: what that peer still has to pull from us
//! - inbound cursors: how far we have pulled from that peer
//!
//! ```text
//!             Peer
//!   ┌───────────────────────┐
//!   │ checks  ┌──────────┐  │   outbound: queue of (entity, seq),
//!   │         │ queue    │──┼─► trimmed when the peer acks
//!   │         │ cursors  │◄─┼── inbound: available/fetched/prev_fetched
//!   │         └──────────┘  │
//!   │ filters ┌──────────┐  │
//!   │         │   ...    │  │
//!   │         └──────────┘  │
//!   └───────────────────────┘
//! ```
//!
//! # Locking
//!
//! All peers live behind a single internal mutex. Every public operation
//! acquires it briefly and releases it before returning; nothing in this
//! crate holds it across I/O or an await point. Closures passed to
//! [`PeerRegistry::with_peer`] run under the lock and must observe the
//! same rule.

use crate::membership::MemberInfo;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// One changelog entry queued for a peer.
///
/// Only the entity key and its changelog position are queued; entity
/// bodies are serialized from current state at serve time, so a queue
/// entry always yields the newest version (or nothing, if deleted).
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord<K> {
    pub key: K,
    pub seq: i64,
}

/// Inbound replication cursors for one stream of one peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StreamCursor {
    /// Highest sequence the peer advertises via its heartbeat payload.
    pub available: i64,
    /// Highest sequence we have durably applied from the peer.
    pub fetched: i64,
    /// Low end of the last completed fetch window.
    pub prev_fetched: i64,
    /// Entities applied by the last completed job for this stream.
    pub last_batch: i64,
}

/// One replication stream (checks or filtersets) of one peer.
#[derive(Debug, Default)]
pub struct StreamState<K> {
    pub cursor: StreamCursor,
    pub queue: VecDeque<ChangeRecord<K>>,
}

impl<K: PartialEq> StreamState<K> {
    /// Drop acknowledged entries from the queue front.
    ///
    /// Entries are strictly seq-ascending, so this stops at the first
    /// entry past `prev_ack`. Returns how many were retired.
    pub fn trim_acked(&mut self, prev_ack: i64) -> usize {
        let mut retired = 0;
        while let Some(front) = self.queue.front() {
            if front.seq > prev_ack {
                break;
            }
            self.queue.pop_front();
            retired += 1;
        }
        retired
    }

    fn reset_for_resync(&mut self) {
        self.cursor.fetched = 0;
        self.cursor.prev_fetched = 0;
        self.cursor.last_batch = 0;
        self.queue.clear();
    }
}

/// Replication state for one tracked cluster member.
#[derive(Debug)]
pub struct Peer {
    pub id: Uuid,
    pub cn: String,
    pub addr: SocketAddr,
    /// Boot time (epoch ms) last observed for this peer.
    pub boot_ms: u64,
    /// Topology generation this peer was last confirmed in.
    pub generation: u64,
    /// Single-flight guard: at most one replication job per peer.
    pub job_inflight: bool,
    pub checks: StreamState<Uuid>,
    pub filters: StreamState<String>,
}

impl Peer {
    fn new(member: &MemberInfo, generation: u64) -> Self {
        let mut peer = Self {
            id: member.id,
            cn: member.cn.clone(),
            addr: member.addr,
            boot_ms: member.boot_ms,
            generation,
            job_inflight: false,
            checks: StreamState::default(),
            filters: StreamState::default(),
        };
        peer.checks.cursor.available = member.checks_available;
        peer.filters.cursor.available = member.filters_available;
        peer
    }
}

/// Why an upsert demanded a full resync of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    /// First time we are tracking this peer.
    NewPeer,
    /// The peer's boot time changed: it restarted and lost its
    /// in-memory changelog and cursors.
    BootChanged,
    /// The peer's advertised watermark went backwards without a boot
    /// change. Sequences are monotonic for the life of a boot, so this
    /// is treated as an undetected restart.
    WatermarkRegressed,
}

/// Outcome of [`PeerRegistry::upsert`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpsertOutcome {
    pub created: bool,
    /// When set, the caller must rebuild this peer's outbound queues
    /// from the full current entity set.
    pub resync: Option<ResyncReason>,
}

/// Introspection snapshot of one queued change.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedChange {
    pub entity: String,
    pub seq: i64,
}

/// Introspection snapshot of one stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    #[serde(flatten)]
    pub cursor: StreamCursor,
    pub queued: Vec<QueuedChange>,
}

/// Introspection snapshot of one peer.
#[derive(Debug, Clone, Serialize)]
pub struct PeerStatus {
    pub id: Uuid,
    pub cn: String,
    pub job_inflight: bool,
    pub checks: StreamStatus,
    pub filters: StreamStatus,
}

/// Registry of all tracked peers.
///
/// This is the only holder of [`Peer`] values; every other component
/// reaches peer state through it.
pub struct PeerRegistry {
    peers: Mutex<HashMap<Uuid, Peer>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or refresh a peer from a membership snapshot.
    ///
    /// Never inserts self - callers filter that out. Ingests the
    /// advertised watermarks into `available`. On boot change or
    /// watermark regression, resets the inbound cursors and clears the
    /// outbound queues; the caller rebuilds them.
    pub fn upsert(&self, member: &MemberInfo, generation: u64) -> UpsertOutcome {
        let mut peers = self.lock();
        match peers.entry(member.id) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(Peer::new(member, generation));
                UpsertOutcome {
                    created: true,
                    resync: Some(ResyncReason::NewPeer),
                }
            }
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                let peer = slot.get_mut();
                peer.generation = generation;
                peer.cn = member.cn.clone();
                peer.addr = member.addr;

                let mut resync = None;
                if peer.boot_ms != member.boot_ms {
                    resync = Some(ResyncReason::BootChanged);
                } else if member.checks_available < peer.checks.cursor.available
                    || member.filters_available < peer.filters.cursor.available
                {
                    resync = Some(ResyncReason::WatermarkRegressed);
                }

                peer.boot_ms = member.boot_ms;
                peer.checks.cursor.available = member.checks_available;
                peer.filters.cursor.available = member.filters_available;

                if resync.is_some() {
                    peer.checks.reset_for_resync();
                    peer.filters.reset_for_resync();
                }

                UpsertOutcome {
                    created: false,
                    resync,
                }
            }
        }
    }

    /// Remove every peer not confirmed in `generation`.
    ///
    /// Returns the removed peers as `(id, cn)` for logging. In-flight
    /// jobs for removed peers discard their results on completion.
    pub fn gc(&self, generation: u64) -> Vec<(Uuid, String)> {
        let mut peers = self.lock();
        let stale: Vec<Uuid> = peers
            .values()
            .filter(|p| p.generation != generation)
            .map(|p| p.id)
            .collect();
        stale
            .into_iter()
            .filter_map(|id| peers.remove(&id).map(|p| (p.id, p.cn)))
            .collect()
    }

    /// Run a closure against one peer's state, under the registry lock.
    ///
    /// Returns `None` if the peer is not tracked. The closure must not
    /// block, await, or call back into the registry.
    pub fn with_peer<R>(&self, id: Uuid, f: impl FnOnce(&mut Peer) -> R) -> Option<R> {
        let mut peers = self.lock();
        peers.get_mut(&id).map(f)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn peer_ids(&self) -> Vec<Uuid> {
        self.lock().keys().copied().collect()
    }

    /// Whether any peer still has this check queued for replication.
    ///
    /// The daemon consults this before finalizing a check delete, to
    /// avoid dropping state a peer has not pulled yet.
    pub fn replication_pending(&self, check_id: Uuid) -> bool {
        let peers = self.lock();
        peers
            .values()
            .any(|p| p.checks.queue.iter().any(|c| c.key == check_id))
    }

    /// Append a check change to peer queues, assigning the next global
    /// sequence under the lock so queue order matches sequence order.
    ///
    /// `only` restricts the fan-out to a single peer (changelog rebuild
    /// after a resync); `None` reaches every tracked peer.
    pub(crate) fn queue_check_change(
        &self,
        only: Option<Uuid>,
        check_id: Uuid,
        counter: &AtomicI64,
    ) -> i64 {
        let mut peers = self.lock();
        let seq = counter.fetch_add(1, Ordering::SeqCst) + 1;
        for peer in peers.values_mut() {
            if only.is_some_and(|id| id != peer.id) {
                continue;
            }
            peer.checks.queue.push_back(ChangeRecord { key: check_id, seq });
        }
        seq
    }

    /// Filterset counterpart of [`queue_check_change`](Self::queue_check_change).
    pub(crate) fn queue_filter_change(
        &self,
        only: Option<Uuid>,
        name: &str,
        counter: &AtomicI64,
    ) -> i64 {
        let mut peers = self.lock();
        let seq = counter.fetch_add(1, Ordering::SeqCst) + 1;
        for peer in peers.values_mut() {
            if only.is_some_and(|id| id != peer.id) {
                continue;
            }
            peer.filters.queue.push_back(ChangeRecord {
                key: name.to_string(),
                seq,
            });
        }
        seq
    }

    /// Snapshot every peer for introspection, sorted by cn.
    pub fn status(&self) -> Vec<PeerStatus> {
        let peers = self.lock();
        let mut out: Vec<PeerStatus> = peers
            .values()
            .map(|p| PeerStatus {
                id: p.id,
                cn: p.cn.clone(),
                job_inflight: p.job_inflight,
                checks: StreamStatus {
                    cursor: p.checks.cursor,
                    queued: p
                        .checks
                        .queue
                        .iter()
                        .map(|c| QueuedChange {
                            entity: c.key.to_string(),
                            seq: c.seq,
                        })
                        .collect(),
                },
                filters: StreamStatus {
                    cursor: p.filters.cursor,
                    queued: p
                        .filters
                        .queue
                        .iter()
                        .map(|c| QueuedChange {
                            entity: c.key.clone(),
                            seq: c.seq,
                        })
                        .collect(),
                },
            })
            .collect();
        out.sort_by(|a, b| a.cn.cmp(&b.cn));
        out
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Peer>> {
        // A poisoned lock means a panic mid-mutation; peer state is
        // per-field and remains usable.
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(n: u128, boot_ms: u64) -> MemberInfo {
        MemberInfo {
            id: Uuid::from_u128(n),
            cn: format!("noit-{n}"),
            addr: "10.0.0.1:43191".parse().unwrap(),
            boot_ms,
            alive: true,
            checks_available: 0,
            filters_available: 0,
        }
    }

    #[test]
    fn test_upsert_new_peer_requires_resync() {
        let registry = PeerRegistry::new();
        let outcome = registry.upsert(&member(1, 1000), 1);
        assert!(outcome.created);
        assert_eq!(outcome.resync, Some(ResyncReason::NewPeer));
        assert!(registry.contains(Uuid::from_u128(1)));
    }

    #[test]
    fn test_upsert_refresh_no_resync() {
        let registry = PeerRegistry::new();
        registry.upsert(&member(1, 1000), 1);

        let mut m = member(1, 1000);
        m.checks_available = 5;
        let outcome = registry.upsert(&m, 2);
        assert!(!outcome.created);
        assert_eq!(outcome.resync, None);

        let available = registry
            .with_peer(m.id, |p| p.checks.cursor.available)
            .unwrap();
        assert_eq!(available, 5);
    }

    #[test]
    fn test_boot_change_resets_cursors_and_queues() {
        let registry = PeerRegistry::new();
        let id = Uuid::from_u128(1);
        registry.upsert(&member(1, 1000), 1);
        let counter = AtomicI64::new(0);
        registry.queue_check_change(None, Uuid::from_u128(9), &counter);
        registry.with_peer(id, |p| {
            p.checks.cursor.fetched = 4;
            p.checks.cursor.prev_fetched = 3;
            p.checks.cursor.last_batch = 2;
        });

        let outcome = registry.upsert(&member(1, 2000), 2);
        assert_eq!(outcome.resync, Some(ResyncReason::BootChanged));

        registry
            .with_peer(id, |p| {
                assert_eq!(p.checks.cursor.fetched, 0);
                assert_eq!(p.checks.cursor.prev_fetched, 0);
                assert_eq!(p.checks.cursor.last_batch, 0);
                assert!(p.checks.queue.is_empty());
            })
            .unwrap();
    }

    #[test]
    fn test_watermark_regression_is_implicit_reboot() {
        let registry = PeerRegistry::new();
        let mut m = member(1, 1000);
        m.checks_available = 10;
        registry.upsert(&m, 1);

        m.checks_available = 3; // went backwards, same boot
        let outcome = registry.upsert(&m, 2);
        assert_eq!(outcome.resync, Some(ResyncReason::WatermarkRegressed));

        let available = registry
            .with_peer(m.id, |p| p.checks.cursor.available)
            .unwrap();
        assert_eq!(available, 3);
    }

    #[test]
    fn test_gc_removes_stale_generations() {
        let registry = PeerRegistry::new();
        registry.upsert(&member(1, 1000), 1);
        registry.upsert(&member(2, 1000), 1);
        registry.upsert(&member(1, 1000), 2); // only peer 1 confirmed

        let removed = registry.gc(2);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, Uuid::from_u128(2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_fanout_reaches_all_peers_in_order() {
        let registry = PeerRegistry::new();
        registry.upsert(&member(1, 1000), 1);
        registry.upsert(&member(2, 1000), 1);

        let counter = AtomicI64::new(0);
        let a = Uuid::from_u128(10);
        let b = Uuid::from_u128(11);
        assert_eq!(registry.queue_check_change(None, a, &counter), 1);
        assert_eq!(registry.queue_check_change(None, b, &counter), 2);

        for id in [Uuid::from_u128(1), Uuid::from_u128(2)] {
            registry
                .with_peer(id, |p| {
                    let seqs: Vec<i64> = p.checks.queue.iter().map(|c| c.seq).collect();
                    assert_eq!(seqs, vec![1, 2]);
                })
                .unwrap();
        }
    }

    #[test]
    fn test_fanout_only_targets_one_peer() {
        let registry = PeerRegistry::new();
        registry.upsert(&member(1, 1000), 1);
        registry.upsert(&member(2, 1000), 1);

        let counter = AtomicI64::new(0);
        registry.queue_check_change(Some(Uuid::from_u128(1)), Uuid::from_u128(10), &counter);

        let len1 = registry
            .with_peer(Uuid::from_u128(1), |p| p.checks.queue.len())
            .unwrap();
        let len2 = registry
            .with_peer(Uuid::from_u128(2), |p| p.checks.queue.len())
            .unwrap();
        assert_eq!(len1, 1);
        assert_eq!(len2, 0);
    }

    #[test]
    fn test_trim_acked_retires_prefix_only() {
        let mut stream: StreamState<Uuid> = StreamState::default();
        for seq in 1..=5 {
            stream.queue.push_back(ChangeRecord {
                key: Uuid::from_u128(seq as u128),
                seq,
            });
        }
        assert_eq!(stream.trim_acked(3), 3);
        assert_eq!(stream.queue.len(), 2);
        assert_eq!(stream.queue.front().unwrap().seq, 4);

        // Acking below the front is a no-op.
        assert_eq!(stream.trim_acked(2), 0);
        assert_eq!(stream.queue.len(), 2);
    }

    #[test]
    fn test_replication_pending() {
        let registry = PeerRegistry::new();
        registry.upsert(&member(1, 1000), 1);
        let counter = AtomicI64::new(0);
        let check = Uuid::from_u128(77);

        assert!(!registry.replication_pending(check));
        registry.queue_check_change(None, check, &counter);
        assert!(registry.replication_pending(check));

        registry.with_peer(Uuid::from_u128(1), |p| {
            p.checks.trim_acked(1);
        });
        assert!(!registry.replication_pending(check));
    }

    #[test]
    fn test_status_sorted_by_cn() {
        let registry = PeerRegistry::new();
        registry.upsert(&member(2, 1000), 1);
        registry.upsert(&member(1, 1000), 1);

        let status = registry.status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].cn, "noit-1");
        assert_eq!(status[1].cn, "noit-2");
    }
}
