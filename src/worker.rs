// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Executing replication jobs: fetch, apply, merge cursors, go again.
//!
//! A job fetches each non-empty stream window once - filtersets before
//! checks, since checks reference filtersets by name - applies the
//! batch to the local store, and merges the result back into the peer's
//! cursors under the registry lock. There are no retries inside a job:
//! a failed stream sleeps a fixed backoff and leaves its cursors alone,
//! so the scheduler re-issues the identical window on the next pass.
//!
//! After completion the worker immediately asks the scheduler for the
//! next job for the same peer, looping until the peer goes quiet. If
//! the peer was removed from the registry mid-flight the result is
//! discarded.

use crate::document::StreamKind;
use crate::metrics;
use crate::registry::{PeerRegistry, StreamCursor};
use crate::scheduler::{JobWindow, ReplicationJob, ReplicationScheduler};
use crate::store::ConfigStore;
use crate::transport::{PeerEndpoint, UpdatesTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct ReplicationWorker {
    registry: Arc<PeerRegistry>,
    store: Arc<dyn ConfigStore>,
    transport: Arc<dyn UpdatesTransport>,
    self_id: Uuid,
    fail_backoff: Duration,
}

impl ReplicationWorker {
    pub fn new(
        registry: Arc<PeerRegistry>,
        store: Arc<dyn ConfigStore>,
        transport: Arc<dyn UpdatesTransport>,
        self_id: Uuid,
        fail_backoff: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            transport,
            self_id,
            fail_backoff,
        }
    }

    /// Run `job`, then keep pulling from the same peer until the
    /// scheduler has nothing more for it.
    pub async fn run(&self, scheduler: &ReplicationScheduler, mut job: ReplicationJob) {
        loop {
            self.execute(&mut job).await;
            if !self.complete(&job) {
                break;
            }
            match scheduler.maybe_schedule(job.peer_id) {
                Some(next) => job = next,
                None => break,
            }
        }
    }

    /// Fetch and apply both stream windows of one job.
    pub async fn execute(&self, job: &mut ReplicationJob) {
        let endpoint = self.registry.with_peer(job.peer_id, |p| PeerEndpoint {
            id: p.id,
            cn: p.cn.clone(),
            addr: p.addr,
        });
        let Some(endpoint) = endpoint else {
            debug!(peer_id = %job.peer_id, "peer removed before fetch");
            return;
        };

        if !job.filters.is_empty() {
            self.fetch_stream(&endpoint, StreamKind::Filters, &mut job.filters)
                .await;
        }
        if !job.checks.is_empty() {
            self.fetch_stream(&endpoint, StreamKind::Checks, &mut job.checks)
                .await;
        }
    }

    async fn fetch_stream(
        &self,
        endpoint: &PeerEndpoint,
        stream: StreamKind,
        window: &mut JobWindow,
    ) {
        let fetched = self
            .transport
            .fetch_updates(
                endpoint.clone(),
                stream,
                self.self_id,
                window.prev,
                window.end,
            )
            .await;

        let doc = match fetched {
            Ok(doc) => doc,
            Err(e) => {
                warn!(
                    peer_id = %endpoint.id,
                    %stream,
                    prev = window.prev,
                    end = window.end,
                    error = %e,
                    "stream fetch failed"
                );
                sleep(self.fail_backoff).await;
                return;
            }
        };

        let applied = match stream {
            StreamKind::Checks => self.store.apply_checks(doc).await,
            StreamKind::Filters => self.store.apply_filters(doc).await,
        };
        match applied {
            Ok(count) => {
                window.applied = count as i64;
                window.success = true;
                metrics::record_batch_applied(&endpoint.cn, stream.path(), count);
                debug!(
                    peer_id = %endpoint.id,
                    %stream,
                    prev = window.prev,
                    end = window.end,
                    applied = count,
                    "applied stream window"
                );
            }
            Err(e) => {
                warn!(peer_id = %endpoint.id, %stream, error = %e, "batch apply failed");
                sleep(self.fail_backoff).await;
            }
        }
    }

    /// Merge job results into the peer's cursors and clear the
    /// single-flight flag. Returns `false` if the peer vanished.
    pub fn complete(&self, job: &ReplicationJob) -> bool {
        let merged = self.registry.with_peer(job.peer_id, |peer| {
            peer.job_inflight = false;
            merge_window(&mut peer.checks.cursor, &job.checks);
            merge_window(&mut peer.filters.cursor, &job.filters);
        });
        match merged {
            Some(()) => {
                metrics::record_job(job.checks.success || job.filters.success);
                true
            }
            None => {
                debug!(peer_id = %job.peer_id, "peer removed mid-flight, discarding job result");
                metrics::record_job_discarded();
                false
            }
        }
    }
}

fn merge_window(cursor: &mut StreamCursor, window: &JobWindow) {
    cursor.last_batch = window.applied;
    if window.success {
        if window.prev != 0 {
            cursor.prev_fetched = window.prev;
        }
        if window.end != 0 {
            cursor.fetched = window.end;
        }
    }
}
