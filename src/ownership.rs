//! Deciding which node runs a check.
//!
//! Ownership is derived, never negotiated: every node evaluates the
//! same deterministic assignment over the currently-live member set, so
//! the cluster agrees without exchanging messages. When the live set is
//! empty or clustering is off, this node runs the check itself -
//! monitoring favors availability over exclusivity, and a brief overlap
//! of two nodes running one check is harmless.

use crate::membership::MembershipProvider;
use std::sync::Arc;
use uuid::Uuid;

/// The outcome of an ownership query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OwnershipDecision {
    /// Whether this node should run the check.
    pub owned: bool,
    /// The assigned owner, when one was computed. `None` means the
    /// decision fell through to "run it here" (clustering disabled,
    /// self-check, or no live candidates).
    pub owner: Option<Uuid>,
}

impl OwnershipDecision {
    fn run_here() -> Self {
        Self {
            owned: true,
            owner: None,
        }
    }
}

pub struct OwnershipOracle {
    membership: Arc<dyn MembershipProvider>,
}

impl OwnershipOracle {
    pub fn new(membership: Arc<dyn MembershipProvider>) -> Self {
        Self { membership }
    }

    /// Should this node run `check_id`?
    ///
    /// Self-check-module checks always run everywhere. Otherwise the
    /// check id is assigned among live members; the owner hint is
    /// returned so callers can report where a skipped check went.
    pub fn should_run(&self, check_id: Uuid, self_check: bool) -> OwnershipDecision {
        if self_check || !self.membership.clustering_enabled() {
            return OwnershipDecision::run_here();
        }

        let live: Vec<_> = self
            .membership
            .members()
            .into_iter()
            .filter(|m| m.alive)
            .collect();
        if live.is_empty() {
            return OwnershipDecision::run_here();
        }

        match self.membership.shard_owner(check_id.as_bytes(), &live) {
            Some(owner) => OwnershipDecision {
                owned: owner == self.membership.self_id(),
                owner: Some(owner),
            },
            None => OwnershipDecision::run_here(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::{MemberInfo, StaticMembership};

    fn member(n: u128, alive: bool) -> MemberInfo {
        MemberInfo {
            id: Uuid::from_u128(n),
            cn: format!("noit-{n}"),
            addr: "10.0.0.1:43191".parse().unwrap(),
            boot_ms: 1000,
            alive,
            checks_available: 0,
            filters_available: 0,
        }
    }

    fn oracle_for(self_id: u128, members: Vec<MemberInfo>) -> OwnershipOracle {
        let ms = Arc::new(StaticMembership::new(Uuid::from_u128(self_id)));
        for m in members {
            ms.upsert_member(m);
        }
        OwnershipOracle::new(ms)
    }

    #[test]
    fn test_clustering_disabled_owns_everything() {
        let ms = Arc::new(StaticMembership::disabled(Uuid::from_u128(1)));
        let oracle = OwnershipOracle::new(ms);
        let d = oracle.should_run(Uuid::from_u128(42), false);
        assert!(d.owned);
        assert_eq!(d.owner, None);
    }

    #[test]
    fn test_self_check_always_runs_locally() {
        let oracle = oracle_for(1, vec![member(1, true), member(2, true)]);
        let d = oracle.should_run(Uuid::from_u128(42), true);
        assert!(d.owned);
        assert_eq!(d.owner, None);
    }

    #[test]
    fn test_empty_live_set_runs_locally() {
        let oracle = oracle_for(1, vec![member(2, false), member(3, false)]);
        let d = oracle.should_run(Uuid::from_u128(42), false);
        assert!(d.owned);
        assert_eq!(d.owner, None);
    }

    #[test]
    fn test_exactly_one_owner_across_cluster() {
        // Evaluate the same check from every node's perspective: the
        // answers must agree and exactly one node must own it.
        let members = vec![member(1, true), member(2, true), member(3, true)];
        for i in 0..50u128 {
            let check = Uuid::from_u128(1000 + i);
            let mut owners = 0;
            let mut hints = std::collections::HashSet::new();
            for node in 1..=3u128 {
                let oracle = oracle_for(node, members.clone());
                let d = oracle.should_run(check, false);
                if d.owned {
                    owners += 1;
                }
                hints.insert(d.owner.unwrap());
            }
            assert_eq!(owners, 1, "check {check} owned by {owners} nodes");
            assert_eq!(hints.len(), 1, "nodes disagreed on owner for {check}");
        }
    }

    #[test]
    fn test_dead_members_excluded_from_assignment() {
        let check = Uuid::from_u128(42);

        // Find the owner with all three alive, then kill it: ownership
        // must move to a live node.
        let all_alive = vec![member(1, true), member(2, true), member(3, true)];
        let oracle = oracle_for(1, all_alive);
        let owner = oracle.should_run(check, false).owner.unwrap();

        let mut degraded: Vec<MemberInfo> = vec![member(1, true), member(2, true), member(3, true)];
        for m in &mut degraded {
            if m.id == owner {
                m.alive = false;
            }
        }
        let oracle = oracle_for(1, degraded);
        let new_owner = oracle.should_run(check, false).owner.unwrap();
        assert_ne!(new_owner, owner);
    }

    #[test]
    fn test_ownership_deterministic() {
        let members = vec![member(1, true), member(2, true)];
        let oracle = oracle_for(1, members);
        let check = Uuid::from_u128(7);
        let first = oracle.should_run(check, false);
        for _ in 0..10 {
            assert_eq!(oracle.should_run(check, false), first);
        }
    }
}
