//! An in-process "cluster": nodes wired together by a loopback transport
//! that routes updates requests straight into the target node's
//! changelog server. Replication runs exactly as in production minus the
//! HTTP layer, and everything is deterministic.

use super::store::TestStore;
use cluster_replication::broadcaster::ChangeBroadcaster;
use cluster_replication::changelog::ChangelogServer;
use cluster_replication::document::{ChangeDocument, StreamKind};
use cluster_replication::membership::{
    MemberInfo, MembershipEvent, MembershipEventKind, MembershipProvider, StaticMembership,
};
use cluster_replication::registry::PeerRegistry;
use cluster_replication::scheduler::ReplicationScheduler;
use cluster_replication::store::ConfigStore;
use cluster_replication::topology::TopologyWatcher;
use cluster_replication::transport::{BoxFuture, PeerEndpoint, UpdatesTransport};
use cluster_replication::worker::ReplicationWorker;
use cluster_replication::ClusterError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Routes fetches between in-process nodes.
#[derive(Default)]
pub struct LoopbackNetwork {
    servers: Mutex<HashMap<Uuid, Arc<ChangelogServer>>>,
    cns: Mutex<HashMap<Uuid, String>>,
    /// Node ids currently unreachable (simulated network failure).
    partitioned: Mutex<Vec<Uuid>>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, id: Uuid, cn: &str, server: Arc<ChangelogServer>) {
        self.servers.lock().unwrap().insert(id, server);
        self.cns.lock().unwrap().insert(id, cn.to_string());
    }

    pub fn partition(&self, id: Uuid) {
        self.partitioned.lock().unwrap().push(id);
    }

    pub fn heal(&self, id: Uuid) {
        self.partitioned.lock().unwrap().retain(|p| *p != id);
    }

    fn serve(
        &self,
        target: Uuid,
        stream: StreamKind,
        requester: Uuid,
        prev: i64,
        end: i64,
    ) -> Result<ChangeDocument, ClusterError> {
        if self.partitioned.lock().unwrap().contains(&target) {
            return Err(ClusterError::Transport {
                peer: target.to_string(),
                message: "partitioned".to_string(),
            });
        }
        let server = self
            .servers
            .lock()
            .unwrap()
            .get(&target)
            .cloned()
            .ok_or_else(|| ClusterError::Transport {
                peer: target.to_string(),
                message: "no such node".to_string(),
            })?;
        let cn = self
            .cns
            .lock()
            .unwrap()
            .get(&requester)
            .cloned()
            .unwrap_or_default();
        server.serve(stream, requester, &cn, prev, end)
    }
}

pub struct LoopbackTransport {
    network: Arc<LoopbackNetwork>,
}

impl LoopbackTransport {
    pub fn new(network: Arc<LoopbackNetwork>) -> Self {
        Self { network }
    }
}

impl UpdatesTransport for LoopbackTransport {
    fn fetch_updates(
        &self,
        endpoint: PeerEndpoint,
        stream: StreamKind,
        requester: Uuid,
        prev: i64,
        end: i64,
    ) -> BoxFuture<'_, ChangeDocument> {
        let result = self.network.serve(endpoint.id, stream, requester, prev, end);
        Box::pin(async move { result })
    }
}

pub fn member_info(n: u128) -> MemberInfo {
    MemberInfo {
        id: Uuid::from_u128(n),
        cn: format!("noit-{n}"),
        addr: format!("127.0.0.1:{}", 43191 + n as u16).parse().unwrap(),
        boot_ms: 1000,
        alive: true,
        checks_available: 0,
        filters_available: 0,
    }
}

/// One fully wired node.
pub struct TestNode {
    pub id: Uuid,
    pub cn: String,
    pub membership: Arc<StaticMembership>,
    pub store: Arc<TestStore>,
    pub registry: Arc<PeerRegistry>,
    pub broadcaster: Arc<ChangeBroadcaster>,
    pub changelog: Arc<ChangelogServer>,
    pub scheduler: ReplicationScheduler,
    pub worker: ReplicationWorker,
    pub topology: TopologyWatcher,
}

impl TestNode {
    pub fn new(n: u128, members: &[MemberInfo], network: &Arc<LoopbackNetwork>) -> Self {
        Self::with_batch_size(n, members, network, 500)
    }

    pub fn with_batch_size(
        n: u128,
        members: &[MemberInfo],
        network: &Arc<LoopbackNetwork>,
        batch_size: i64,
    ) -> Self {
        let id = Uuid::from_u128(n);
        let cn = format!("noit-{n}");
        let membership = Arc::new(StaticMembership::new(id));
        for m in members {
            membership.upsert_member(m.clone());
        }
        let store = Arc::new(TestStore::default());
        let registry = Arc::new(PeerRegistry::new());
        let broadcaster = Arc::new(ChangeBroadcaster::new(
            Arc::clone(&registry),
            Arc::clone(&membership) as Arc<dyn MembershipProvider>,
            Arc::clone(&store) as Arc<dyn ConfigStore>,
        ));
        let changelog = Arc::new(ChangelogServer::new(
            Arc::clone(&registry),
            Arc::clone(&store) as Arc<dyn ConfigStore>,
        ));
        let scheduler = ReplicationScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&membership) as Arc<dyn MembershipProvider>,
            batch_size,
        );
        let worker = ReplicationWorker::new(
            Arc::clone(&registry),
            Arc::clone(&store) as Arc<dyn ConfigStore>,
            Arc::new(LoopbackTransport::new(Arc::clone(network))),
            id,
            Duration::from_millis(1),
        );
        let topology = TopologyWatcher::new(
            Arc::clone(&registry),
            Arc::clone(&broadcaster),
            Arc::clone(&membership) as Arc<dyn MembershipProvider>,
        );
        network.register(id, &cn, Arc::clone(&changelog));
        Self {
            id,
            cn,
            membership,
            store,
            registry,
            broadcaster,
            changelog,
            scheduler,
            worker,
            topology,
        }
    }

    pub fn bootstrap(&self) {
        self.topology.bootstrap();
    }

    /// Ingest another node's published watermarks, as a heartbeat would
    /// deliver them.
    pub fn hear_watermarks_from(&self, from: &TestNode) {
        let (checks, filters) = from.membership.last_published().unwrap_or((0, 0));
        self.membership.set_watermarks(from.id, checks, filters);
        self.topology.on_event(&MembershipEvent {
            kind: MembershipEventKind::NodeChangedPayload,
            node: from.id,
        });
    }

    /// Observe that another node rebooted.
    pub fn hear_reboot_of(&self, peer: Uuid, boot_ms: u64) {
        self.membership.set_boot_ms(peer, boot_ms);
        self.topology.on_event(&MembershipEvent {
            kind: MembershipEventKind::NodeRebooted,
            node: peer,
        });
    }

    /// Run replication jobs against one peer until caught up.
    pub async fn pull_from(&self, peer: Uuid) {
        if let Some(job) = self.scheduler.maybe_schedule(peer) {
            self.worker.run(&self.scheduler, job).await;
        }
    }
}
