//! Cluster membership integration.
//!
//! The heartbeat/membership substrate lives in the daemon, not here. This
//! module defines the interface the clustering subsystem consumes from it:
//! who is in the cluster, who is alive, what watermarks they advertise in
//! their heartbeat payload, and where to publish ours.
//!
//! Implementations push topology changes into the engine as
//! [`MembershipEvent`]s; the engine never polls.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;
use uuid::Uuid;

/// A cluster member as advertised by the membership substrate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    /// Stable node identity.
    pub id: Uuid,

    /// Certificate name. Updates requests must present this identity.
    pub cn: String,

    /// Address the member serves its updates endpoints on.
    pub addr: SocketAddr,

    /// Boot time in epoch milliseconds. A change here means the member
    /// restarted and lost its in-memory changelog.
    pub boot_ms: u64,

    /// Whether the member is currently passing heartbeats.
    pub alive: bool,

    /// Highest check changelog sequence the member advertises.
    pub checks_available: i64,

    /// Highest filterset changelog sequence the member advertises.
    pub filters_available: i64,
}

/// What kind of topology change occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipEventKind {
    /// A node's boot time changed (restart observed).
    NodeRebooted,
    /// A node's heartbeat sequence moved (liveness update).
    NodeChangedSequence,
    /// A node's heartbeat payload changed (watermark update).
    NodeChangedPayload,
    /// A node stopped heartbeating.
    NodeDied,
}

/// A topology change pushed in by the membership substrate.
///
/// The engine reacts to every event kind the same way: re-read the full
/// member list, upsert, and garbage-collect. The kind is carried for
/// logging and metrics.
#[derive(Debug, Clone)]
pub struct MembershipEvent {
    pub kind: MembershipEventKind,
    pub node: Uuid,
}

/// Trait defining what we need from the membership substrate.
///
/// The daemon provides an implementation, allowing us to:
/// 1. Enumerate cluster members and their advertised watermarks
/// 2. Publish our own changelog watermarks into the heartbeat payload
/// 3. Resolve deterministic check ownership across live members
///
/// This trait allows testing with scripted memberships and decouples us
/// from the heartbeat wire format.
pub trait MembershipProvider: Send + Sync + 'static {
    /// This node's identity.
    fn self_id(&self) -> Uuid;

    /// Whether clustering is configured at all. When `false`, this node
    /// owns every check and replicates with nobody.
    fn clustering_enabled(&self) -> bool {
        true
    }

    /// All members of the configured cluster, including self and
    /// non-alive nodes.
    fn members(&self) -> Vec<MemberInfo>;

    /// Look up a single member.
    fn member(&self, id: Uuid) -> Option<MemberInfo> {
        self.members().into_iter().find(|m| m.id == id)
    }

    /// Whether the node is a member currently passing heartbeats.
    fn is_live_member(&self, id: Uuid) -> bool {
        self.member(id).map(|m| m.alive).unwrap_or(false)
    }

    /// Publish this node's changelog watermarks into its heartbeat
    /// payload, as 8-byte big-endian sequence numbers.
    fn publish_watermarks(&self, checks_produced: [u8; 8], filters_produced: [u8; 8]);

    /// Pick the owner of `key` among `candidates`.
    ///
    /// The default is rendezvous hashing: highest hash of
    /// `key || member-id` wins, ties broken by member id. Implementations
    /// may override with their own deterministic assignment, but every
    /// node in the cluster must agree on the function.
    fn shard_owner(&self, key: &[u8], candidates: &[MemberInfo]) -> Option<Uuid> {
        rendezvous_owner(key, candidates)
    }
}

/// Default owner assignment: rendezvous (highest-random-weight) hashing.
///
/// Deterministic for a given key and candidate set, independent of
/// candidate order, and minimally disruptive when membership changes.
pub fn rendezvous_owner(key: &[u8], candidates: &[MemberInfo]) -> Option<Uuid> {
    let mut best: Option<(u64, Uuid)> = None;
    for m in candidates {
        let mut buf = Vec::with_capacity(key.len() + 16);
        buf.extend_from_slice(key);
        buf.extend_from_slice(m.id.as_bytes());
        let score = seahash::hash(&buf);
        match best {
            None => best = Some((score, m.id)),
            Some((s, id)) => {
                if score > s || (score == s && m.id > id) {
                    best = Some((score, m.id));
                }
            }
        }
    }
    best.map(|(_, id)| id)
}

/// An in-process membership for tests and standalone operation.
///
/// Holds a mutable member table and records published watermarks instead
/// of heartbeating them anywhere.
pub struct StaticMembership {
    self_id: Uuid,
    enabled: bool,
    members: RwLock<HashMap<Uuid, MemberInfo>>,
    published: RwLock<Option<([u8; 8], [u8; 8])>>,
}

impl StaticMembership {
    pub fn new(self_id: Uuid) -> Self {
        Self {
            self_id,
            enabled: true,
            members: RwLock::new(HashMap::new()),
            published: RwLock::new(None),
        }
    }

    /// A membership with clustering switched off entirely.
    pub fn disabled(self_id: Uuid) -> Self {
        Self {
            enabled: false,
            ..Self::new(self_id)
        }
    }

    /// Insert or replace a member.
    pub fn upsert_member(&self, member: MemberInfo) {
        let mut members = self.members.write().unwrap_or_else(|e| e.into_inner());
        members.insert(member.id, member);
    }

    /// Remove a member entirely.
    pub fn remove_member(&self, id: Uuid) {
        let mut members = self.members.write().unwrap_or_else(|e| e.into_inner());
        members.remove(&id);
    }

    /// Flip a member's liveness.
    pub fn set_alive(&self, id: Uuid, alive: bool) {
        let mut members = self.members.write().unwrap_or_else(|e| e.into_inner());
        if let Some(m) = members.get_mut(&id) {
            m.alive = alive;
        }
    }

    /// Update a member's advertised watermarks.
    pub fn set_watermarks(&self, id: Uuid, checks: i64, filters: i64) {
        let mut members = self.members.write().unwrap_or_else(|e| e.into_inner());
        if let Some(m) = members.get_mut(&id) {
            m.checks_available = checks;
            m.filters_available = filters;
        }
    }

    /// Update a member's boot time (simulates a restart).
    pub fn set_boot_ms(&self, id: Uuid, boot_ms: u64) {
        let mut members = self.members.write().unwrap_or_else(|e| e.into_inner());
        if let Some(m) = members.get_mut(&id) {
            m.boot_ms = boot_ms;
        }
    }

    /// The last watermarks published via `publish_watermarks`, decoded.
    pub fn last_published(&self) -> Option<(i64, i64)> {
        let published = self.published.read().unwrap_or_else(|e| e.into_inner());
        published.map(|(c, f)| (i64::from_be_bytes(c), i64::from_be_bytes(f)))
    }
}

impl MembershipProvider for StaticMembership {
    fn self_id(&self) -> Uuid {
        self.self_id
    }

    fn clustering_enabled(&self) -> bool {
        self.enabled
    }

    fn members(&self) -> Vec<MemberInfo> {
        let members = self.members.read().unwrap_or_else(|e| e.into_inner());
        members.values().cloned().collect()
    }

    fn publish_watermarks(&self, checks_produced: [u8; 8], filters_produced: [u8; 8]) {
        let mut published = self.published.write().unwrap_or_else(|e| e.into_inner());
        *published = Some((checks_produced, filters_produced));
    }
}
