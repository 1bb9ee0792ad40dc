// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The cluster engine coordinator.
//!
//! Ties the pieces together:
//! - local mutations arrive on the [`ChangeNotifier`] channel and fan
//!   out through the [`ChangeBroadcaster`]
//! - membership events arrive on the [`TopologyNotifier`] channel and
//!   reconcile through the [`TopologyWatcher`]
//! - both feed one control loop, which kicks the
//!   [`ReplicationScheduler`] and spawns [`ReplicationWorker`] tasks
//!   bounded by a resizable [`Bulkhead`]
//! - pulling peers are answered synchronously by the
//!   [`ChangelogServer`], which the daemon's HTTP layer calls directly
//!
//! # Lifecycle
//!
//! `Created` → [`start()`](ClusterEngine::start) → `Running` →
//! [`shutdown()`](ClusterEngine::shutdown) → `Stopped`.

use crate::broadcaster::{ChangeBroadcaster, ChangeEvent, ChangeNotifier};
use crate::changelog::ChangelogServer;
use crate::config::ClusterConfig;
use crate::error::{ClusterError, Result};
use crate::membership::{MembershipEvent, MembershipProvider};
use crate::metrics;
use crate::ownership::{OwnershipDecision, OwnershipOracle};
use crate::registry::{PeerRegistry, PeerStatus};
use crate::resilience::Bulkhead;
use crate::scheduler::ReplicationScheduler;
use crate::store::ConfigStore;
use crate::topology::{TopologyNotifier, TopologyWatcher};
use crate::transport::{HttpTransport, UpdatesTransport};
use crate::worker::ReplicationWorker;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Engine lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Introspection snapshot of the whole subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub self_id: Uuid,
    pub checks_produced: i64,
    pub filters_produced: i64,
    pub peers: Vec<PeerStatus>,
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "node {} checks_produced={} filters_produced={}",
            self.self_id, self.checks_produced, self.filters_produced
        )?;
        for peer in &self.peers {
            writeln!(
                f,
                "  peer {} ({}){}",
                peer.cn,
                peer.id,
                if peer.job_inflight { " [job in flight]" } else { "" }
            )?;
            for (name, stream) in [("checks", &peer.checks), ("filters", &peer.filters)] {
                writeln!(
                    f,
                    "    {name}: available={} fetched={} prev_fetched={} last_batch={} queued={}",
                    stream.cursor.available,
                    stream.cursor.fetched,
                    stream.cursor.prev_fetched,
                    stream.cursor.last_batch,
                    stream.queued.len()
                )?;
                for q in &stream.queued {
                    writeln!(f, "      [{}] {}", q.seq, q.entity)?;
                }
            }
        }
        Ok(())
    }
}

/// The shared component bundle the control loop and dispatchers use.
struct Shared {
    registry: Arc<PeerRegistry>,
    broadcaster: Arc<ChangeBroadcaster>,
    scheduler: Arc<ReplicationScheduler>,
    worker: Arc<ReplicationWorker>,
    topology: Arc<TopologyWatcher>,
    bulkhead: Arc<Bulkhead>,
}

/// The clustering subsystem engine.
pub struct ClusterEngine {
    membership: Arc<dyn MembershipProvider>,
    shared: Arc<Shared>,
    changelog: Arc<ChangelogServer>,
    ownership: OwnershipOracle,

    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    change_tx: mpsc::UnboundedSender<ChangeEvent>,
    change_rx: Option<mpsc::UnboundedReceiver<ChangeEvent>>,
    membership_tx: mpsc::UnboundedSender<MembershipEvent>,
    membership_rx: Option<mpsc::UnboundedReceiver<MembershipEvent>>,

    control_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ClusterEngine {
    /// Create an engine with the production HTTP transport.
    pub fn new(
        config: ClusterConfig,
        membership: Arc<dyn MembershipProvider>,
        store: Arc<dyn ConfigStore>,
    ) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.clone()));
        Self::with_transport(config, membership, store, transport)
    }

    /// Create an engine with a caller-supplied transport (tests, exotic
    /// meshes).
    pub fn with_transport(
        config: ClusterConfig,
        membership: Arc<dyn MembershipProvider>,
        store: Arc<dyn ConfigStore>,
        transport: Arc<dyn UpdatesTransport>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(PeerRegistry::new());
        let broadcaster = Arc::new(ChangeBroadcaster::new(
            Arc::clone(&registry),
            Arc::clone(&membership),
            Arc::clone(&store),
        ));
        let changelog = Arc::new(ChangelogServer::new(
            Arc::clone(&registry),
            Arc::clone(&store),
        ));
        let scheduler = Arc::new(ReplicationScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&membership),
            config.batch_size,
        ));
        let worker = Arc::new(ReplicationWorker::new(
            Arc::clone(&registry),
            store,
            transport,
            membership.self_id(),
            config.fail_backoff_duration(),
        ));
        let topology = Arc::new(TopologyWatcher::new(
            Arc::clone(&registry),
            Arc::clone(&broadcaster),
            Arc::clone(&membership),
        ));
        let ownership = OwnershipOracle::new(Arc::clone(&membership));

        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let (membership_tx, membership_rx) = mpsc::unbounded_channel();

        Ok(Self {
            membership,
            shared: Arc::new(Shared {
                registry,
                broadcaster,
                scheduler,
                worker,
                topology,
                bulkhead: Arc::new(Bulkhead::new(1)),
            }),
            changelog,
            ownership,
            state_tx,
            state_rx,
            shutdown_tx,
            shutdown_rx,
            change_tx,
            change_rx: Some(change_rx),
            membership_tx,
            membership_rx: Some(membership_rx),
            control_handle: Mutex::new(None),
        })
    }

    /// Current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    /// Fire-and-forget handle for reporting local config mutations.
    pub fn notifier(&self) -> ChangeNotifier {
        ChangeNotifier::new(self.change_tx.clone())
    }

    /// Handle the membership substrate uses to push topology events.
    pub fn topology_notifier(&self) -> TopologyNotifier {
        TopologyNotifier::new(self.membership_tx.clone())
    }

    /// The pull-side request handler, for the daemon's HTTP layer.
    pub fn changelog(&self) -> &Arc<ChangelogServer> {
        &self.changelog
    }

    /// Should this node run `check_id`?
    pub fn owns_check(&self, check_id: Uuid, self_check: bool) -> OwnershipDecision {
        self.ownership.should_run(check_id, self_check)
    }

    /// Whether any peer still has this check queued for replication.
    pub fn replication_pending(&self, check_id: Uuid) -> bool {
        self.shared.registry.replication_pending(check_id)
    }

    /// Snapshot of counters, peers, cursors and pending queues.
    pub fn status_report(&self) -> ClusterStatus {
        ClusterStatus {
            self_id: self.membership.self_id(),
            checks_produced: self.shared.broadcaster.checks_produced(),
            filters_produced: self.shared.broadcaster.filters_produced(),
            peers: self.shared.registry.status(),
        }
    }

    /// Start the engine.
    ///
    /// Primes the registry from current membership, publishes initial
    /// watermarks, kicks the scheduler for every known peer, and spawns
    /// the control loop.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(ClusterError::InvalidState {
                expected: "Created".to_string(),
                actual: format!("{:?}", self.state()),
            });
        }

        let enabled = self.membership.clustering_enabled();
        info!(
            self_id = %self.membership.self_id(),
            enabled,
            "starting cluster engine"
        );

        if enabled {
            let touched = self.shared.topology.bootstrap();
            self.shared.bulkhead.resize(touched.len());
            self.shared.broadcaster.republish_watermarks();
            for peer_id in touched {
                Self::dispatch(&self.shared, peer_id);
            }
        }

        let change_rx = self.change_rx.take().ok_or_else(|| {
            ClusterError::Internal("engine started more than once".to_string())
        })?;
        let membership_rx = self.membership_rx.take().ok_or_else(|| {
            ClusterError::Internal("engine started more than once".to_string())
        })?;

        let shared = Arc::clone(&self.shared);
        let shutdown_rx = self.shutdown_rx.clone();
        let handle = tokio::spawn(Self::control_loop(
            shared,
            change_rx,
            membership_rx,
            shutdown_rx,
        ));
        *self.control_handle.lock().await = Some(handle);

        let _ = self.state_tx.send(EngineState::Running);
        metrics::set_engine_state("Running");
        info!(peers = self.shared.registry.len(), "cluster engine running");
        Ok(())
    }

    async fn control_loop(
        shared: Arc<Shared>,
        mut change_rx: mpsc::UnboundedReceiver<ChangeEvent>,
        mut membership_rx: mpsc::UnboundedReceiver<MembershipEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                Some(event) = change_rx.recv() => match event {
                    ChangeEvent::Check(change) => shared.broadcaster.on_check_changed(&change),
                    ChangeEvent::Filter(change) => shared.broadcaster.on_filter_changed(&change),
                },
                Some(event) = membership_rx.recv() => {
                    let touched = shared.topology.on_event(&event);
                    shared.bulkhead.resize(touched.len());
                    for peer_id in touched {
                        Self::dispatch(&shared, peer_id);
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped sender means the engine itself is gone.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("control loop stopping");
                        break;
                    }
                }
            }
        }
    }

    /// If a job is warranted for this peer, run it on a worker task.
    fn dispatch(shared: &Arc<Shared>, peer_id: Uuid) {
        let Some(job) = shared.scheduler.maybe_schedule(peer_id) else {
            return;
        };
        let scheduler = Arc::clone(&shared.scheduler);
        let worker = Arc::clone(&shared.worker);
        let bulkhead = Arc::clone(&shared.bulkhead);
        tokio::spawn(async move {
            match bulkhead.acquire().await {
                Ok(_permit) => worker.run(&scheduler, job).await,
                Err(e) => {
                    // Must not strand the single-flight flag.
                    warn!(peer_id = %peer_id, error = %e, "worker pool unavailable");
                    worker.complete(&job);
                }
            }
        });
    }

    /// Shutdown the engine gracefully.
    ///
    /// Stops the control loop. Worker tasks already in flight finish
    /// their single job on their own; they hold no resources beyond the
    /// HTTP request and complete within the request timeout.
    pub async fn shutdown(&mut self) {
        info!("shutting down cluster engine");
        let _ = self.state_tx.send(EngineState::ShuttingDown);
        metrics::set_engine_state("ShuttingDown");

        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.control_handle.lock().await.take() {
            let drain_timeout = std::time::Duration::from_secs(10);
            match tokio::time::timeout(drain_timeout, handle).await {
                Ok(Ok(())) => debug!("control loop stopped"),
                Ok(Err(e)) => warn!(error = %e, "control loop panicked during shutdown"),
                Err(_) => warn!("control loop timed out during shutdown"),
            }
        }

        let _ = self.state_tx.send(EngineState::Stopped);
        metrics::set_engine_state("Stopped");
        info!("cluster engine stopped");
    }
}
