//! Deciding when a peer needs a replication job, and with what windows.
//!
//! A job is warranted when, for either stream, the last completed fetch
//! applied something (`last_batch != 0`) or the peer advertises more
//! than we have confirmed pulling (`available != prev_fetched`). Each
//! stream's window is `[fetched, available]`, clipped to `batch_size`
//! entries from the low end so one pass never bites off more than a
//! bounded batch.
//!
//! A stream that has nothing left to fetch settles its bookkeeping
//! (`prev_fetched = fetched`, `last_batch = 0`) without a network round
//! trip, and a job is only issued when at least one stream has a
//! non-empty window. At most one job is in flight per peer.

use crate::membership::MembershipProvider;
use crate::registry::{PeerRegistry, StreamCursor};
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

/// One stream's fetch window within a job.
///
/// `prev` is the sequence the fetch acknowledges (our `fetched` at
/// schedule time); `end` is the window limit. `applied` and `success`
/// are filled in by the worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobWindow {
    pub prev: i64,
    pub end: i64,
    pub applied: i64,
    pub success: bool,
}

impl JobWindow {
    pub fn empty() -> Self {
        Self {
            prev: 0,
            end: 0,
            applied: 0,
            success: false,
        }
    }

    /// An empty window means skip this stream this round.
    pub fn is_empty(&self) -> bool {
        self.end == 0
    }
}

/// A single pull pass against one peer: both streams, one round trip each.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationJob {
    pub peer_id: Uuid,
    pub checks: JobWindow,
    pub filters: JobWindow,
}

pub struct ReplicationScheduler {
    registry: Arc<PeerRegistry>,
    membership: Arc<dyn MembershipProvider>,
    batch_size: i64,
}

impl ReplicationScheduler {
    pub fn new(
        registry: Arc<PeerRegistry>,
        membership: Arc<dyn MembershipProvider>,
        batch_size: i64,
    ) -> Self {
        Self {
            registry,
            membership,
            batch_size,
        }
    }

    /// Issue a job for `peer_id` if one is warranted.
    ///
    /// On `Some`, the peer's `job_inflight` flag is set and the caller
    /// owns the job until it reports completion. Returns `None` when a
    /// job is already in flight, the peer left the membership, the peer
    /// is fully caught up, or every window settled empty.
    pub fn maybe_schedule(&self, peer_id: Uuid) -> Option<ReplicationJob> {
        if self.membership.member(peer_id).is_none() {
            debug!(peer_id = %peer_id, "not scheduling: peer absent from membership");
            return None;
        }

        self.registry
            .with_peer(peer_id, |peer| {
                if peer.job_inflight {
                    trace!(peer_id = %peer_id, "not scheduling: job already in flight");
                    return None;
                }

                let c = peer.checks.cursor;
                let f = peer.filters.cursor;
                let warranted = c.last_batch != 0
                    || f.last_batch != 0
                    || c.available != c.prev_fetched
                    || f.available != f.prev_fetched;
                if !warranted {
                    trace!(peer_id = %peer_id, "not scheduling: caught up");
                    return None;
                }

                let checks = stream_window(&mut peer.checks.cursor, self.batch_size);
                let filters = stream_window(&mut peer.filters.cursor, self.batch_size);
                if checks.is_empty() && filters.is_empty() {
                    debug!(peer_id = %peer_id, "not scheduling: windows settled empty");
                    return None;
                }

                peer.job_inflight = true;
                debug!(
                    peer_id = %peer_id,
                    checks_prev = checks.prev,
                    checks_end = checks.end,
                    filters_prev = filters.prev,
                    filters_end = filters.end,
                    "scheduled replication job"
                );
                Some(ReplicationJob {
                    peer_id,
                    checks,
                    filters,
                })
            })
            .flatten()
    }
}

/// Compute one stream's window, mutating the cursor only to settle a
/// caught-up stream.
fn stream_window(cursor: &mut StreamCursor, batch_size: i64) -> JobWindow {
    let prev = cursor.fetched;
    let mut end = cursor.available;
    if batch_size > 0 && end - prev > batch_size {
        end = prev + batch_size;
    }

    // Already confirmed through this window and nothing new applied.
    if cursor.prev_fetched == end && cursor.last_batch == 0 {
        return JobWindow::empty();
    }

    // Nothing left to fetch: record the confirmation a zero-length
    // round trip would have produced.
    if end <= prev {
        cursor.prev_fetched = cursor.fetched;
        cursor.last_batch = 0;
        return JobWindow::empty();
    }

    JobWindow {
        prev,
        end,
        applied: 0,
        success: false,
    }
}
