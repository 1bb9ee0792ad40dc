//! # Cluster Replication
//!
//! Configuration replication and check ownership for a cluster of
//! monitoring daemons.
//!
//! ## Architecture
//!
//! Every node keeps its own check and filterset configuration and
//! replicates changes to every peer. Replication is pull-based: a node
//! marks changed entities in a per-peer outbound changelog and
//! advertises a watermark in its heartbeat payload; peers notice and
//! pull the window they are missing over HTTP.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                        cluster-replication                         │
//! │                                                                    │
//! │  ChangeNotifier ──► ChangeBroadcaster ──► PeerRegistry             │
//! │  (local mutations)  (assign seq, fan out)  (queues + cursors)      │
//! │                                                │                   │
//! │  TopologyNotifier ─► TopologyWatcher ──────────┤                   │
//! │  (membership events) (track/resync/gc peers)   │                   │
//! │                                                ▼                   │
//! │  ReplicationScheduler ──► ReplicationWorker ──► UpdatesTransport   │
//! │  (window per stream)      (fetch + apply)      (HTTP GET /updates) │
//! │                                                                    │
//! │  ChangelogServer ◄── peers pulling from us                         │
//! │  (auth, ack-trim, serve window from current state)                 │
//! │                                                                    │
//! │  OwnershipOracle: deterministic check-to-node assignment           │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cluster_replication::{ClusterConfig, ClusterEngine};
//! use cluster_replication::membership::StaticMembership;
//! use cluster_replication::store::NoOpConfigStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let membership = Arc::new(StaticMembership::new(uuid::Uuid::new_v4()));
//!     let mut engine = ClusterEngine::new(
//!         ClusterConfig::default(),
//!         membership,
//!         Arc::new(NoOpConfigStore),
//!     )
//!     .expect("valid config");
//!     engine.start().await.expect("Failed to start");
//!
//!     // Engine runs until shutdown signal
//!     engine.shutdown().await;
//! }
//! ```

pub mod broadcaster;
pub mod changelog;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod membership;
pub mod metrics;
pub mod ownership;
pub mod registry;
pub mod resilience;
pub mod scheduler;
pub mod store;
pub mod topology;
pub mod transport;
pub mod worker;

// Re-exports for convenience
pub use broadcaster::{ChangeBroadcaster, ChangeNotifier};
pub use changelog::ChangelogServer;
pub use config::{ClusterConfig, TlsConfig};
pub use document::{ChangeDocument, StreamKind};
pub use engine::{ClusterEngine, ClusterStatus, EngineState};
pub use error::{ClusterError, Result};
pub use membership::{MemberInfo, MembershipEvent, MembershipEventKind, MembershipProvider, StaticMembership};
pub use ownership::{OwnershipDecision, OwnershipOracle};
pub use registry::{PeerRegistry, PeerStatus};
pub use store::{CheckChange, ConfigStore, FilterChange, NoOpConfigStore};
pub use topology::{TopologyNotifier, TopologyWatcher};
pub use transport::{HttpTransport, PeerEndpoint, UpdatesTransport};
