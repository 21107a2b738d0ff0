//! Per-request snapshot of the delegation graph for one proposal.
//!
//! The engine never caches delegation state between requests: every
//! resolution loads the relevant rows fresh and builds one of these, so a
//! concurrent write can never leave a stale in-memory graph behind.

use std::collections::{HashMap, HashSet};

/// One delegation edge as loaded from the store.
#[derive(Debug, Clone)]
pub struct DelegationEdge {
    pub delegator_id: i64,
    pub delegate_id: i64,
    /// None = global scope
    pub proposal_url: Option<String>,
}

/// An in-memory view of every delegation that can affect one proposal,
/// plus the set of participants who voted on it directly.
#[derive(Debug, Default)]
pub struct GraphSnapshot {
    specific: HashMap<i64, i64>,
    global: HashMap<i64, i64>,
    direct_voters: HashSet<i64>,
    /// delegate -> delegators whose edge is live for this proposal
    reverse: HashMap<i64, Vec<i64>>,
}

impl GraphSnapshot {
    /// Builds the snapshot for one proposal. `edges` must already be
    /// filtered to the organization; edges scoped to other proposals are
    /// ignored here.
    pub fn for_proposal(
        proposal_url: &str,
        edges: &[DelegationEdge],
        direct_voters: impl IntoIterator<Item = i64>,
    ) -> Self {
        let mut snapshot = Self {
            direct_voters: direct_voters.into_iter().collect(),
            ..Self::default()
        };

        for edge in edges {
            match edge.proposal_url.as_deref() {
                Some(url) if url == proposal_url => {
                    snapshot.specific.insert(edge.delegator_id, edge.delegate_id);
                }
                Some(_) => {}
                None => {
                    snapshot.global.insert(edge.delegator_id, edge.delegate_id);
                }
            }
        }

        snapshot.index_reverse_edges();
        snapshot
    }

    fn index_reverse_edges(&mut self) {
        let delegators: Vec<i64> = self
            .specific
            .keys()
            .chain(self.global.keys())
            .copied()
            .collect();
        for delegator in delegators {
            if let Some(delegate) = self.effective_delegate(delegator) {
                self.reverse.entry(delegate).or_default().push(delegator);
            }
        }
    }

    /// The delegate whose vote carries `participant`'s weight for this
    /// proposal, if any. Proposal-specific overrides global; a direct vote
    /// suppresses both (the write path deletes such delegations, this is
    /// the read-path backstop).
    pub fn effective_delegate(&self, participant: i64) -> Option<i64> {
        if self.direct_voters.contains(&participant) {
            return None;
        }
        self.specific
            .get(&participant)
            .or_else(|| self.global.get(&participant))
            .copied()
    }

    /// Every participant whose vote flows transitively into `participant`
    /// for this proposal. Iterative reverse walk with a visited set, so
    /// corrupted cyclic data terminates and counts each participant once.
    pub fn transitive_delegators(&self, participant: i64) -> HashSet<i64> {
        let mut visited: HashSet<i64> = HashSet::new();
        visited.insert(participant);
        let mut worklist = vec![participant];
        let mut delegators = HashSet::new();

        while let Some(current) = worklist.pop() {
            let Some(inbound) = self.reverse.get(&current) else {
                continue;
            };
            for &delegator in inbound {
                if visited.insert(delegator) {
                    delegators.insert(delegator);
                    worklist.push(delegator);
                }
            }
        }

        delegators
    }

    /// Weight a direct vote by `participant` carries: themselves plus
    /// every distinct transitive delegator.
    pub fn vote_weight(&self, participant: i64) -> i64 {
        let weight = 1 + self.transitive_delegators(participant).len() as i64;
        assert!(weight >= 1, "Vote weight must count the voter");
        weight
    }

    /// Whether following effective delegations from `from` ever reaches
    /// `to`. Used at write time to reject a closing cycle edge before it
    /// is inserted.
    pub fn reaches(&self, from: i64, to: i64) -> bool {
        let mut visited = HashSet::new();
        let mut current = from;
        loop {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                return false;
            }
            match self.effective_delegate(current) {
                Some(next) => current = next,
                None => return false,
            }
        }
    }
}

/// Reachability over every delegation edge regardless of scope. A global
/// delegation is live on any proposal where nothing more specific applies,
/// so validating one must treat proposal-specific edges as potential path
/// segments too: the check is conservative and rejects a closing edge even
/// when the cycle would only be live on a single proposal.
pub fn reaches_any_scope(edges: &[DelegationEdge], from: i64, to: i64) -> bool {
    let mut forward: HashMap<i64, Vec<i64>> = HashMap::new();
    for edge in edges {
        forward
            .entry(edge.delegator_id)
            .or_default()
            .push(edge.delegate_id);
    }

    let mut visited = HashSet::new();
    visited.insert(from);
    let mut worklist = vec![from];
    while let Some(current) = worklist.pop() {
        if current == to {
            return true;
        }
        let Some(next) = forward.get(&current) else {
            continue;
        };
        for &delegate in next {
            if visited.insert(delegate) {
                worklist.push(delegate);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://proposals.example/1";

    fn edge(delegator: i64, delegate: i64, url: Option<&str>) -> DelegationEdge {
        DelegationEdge {
            delegator_id: delegator,
            delegate_id: delegate,
            proposal_url: url.map(str::to_owned),
        }
    }

    #[test]
    fn specific_delegation_overrides_global() {
        let edges = vec![edge(1, 2, None), edge(1, 3, Some(URL))];
        let snapshot = GraphSnapshot::for_proposal(URL, &edges, []);
        assert_eq!(snapshot.effective_delegate(1), Some(3));

        let elsewhere = GraphSnapshot::for_proposal("https://proposals.example/2", &edges, []);
        assert_eq!(elsewhere.effective_delegate(1), Some(2));
    }

    #[test]
    fn direct_vote_suppresses_delegation() {
        let edges = vec![edge(1, 2, None)];
        let snapshot = GraphSnapshot::for_proposal(URL, &edges, [1]);
        assert_eq!(snapshot.effective_delegate(1), None);
        assert!(snapshot.transitive_delegators(2).is_empty());
    }

    #[test]
    fn chained_delegations_accumulate_weight() {
        // B delegates globally to A; C delegates to B for this proposal;
        // A votes directly. A carries A + B + C.
        let edges = vec![edge(2, 1, None), edge(3, 2, Some(URL))];
        let snapshot = GraphSnapshot::for_proposal(URL, &edges, [1]);

        let delegators = snapshot.transitive_delegators(1);
        assert_eq!(delegators, HashSet::from([2, 3]));
        assert_eq!(snapshot.vote_weight(1), 3);
    }

    #[test]
    fn direct_vote_breaks_the_chain() {
        // Same graph, but C now votes directly: C's delegation to B goes
        // dead, A carries only A + B, C carries just C.
        let edges = vec![edge(2, 1, None), edge(3, 2, Some(URL))];
        let snapshot = GraphSnapshot::for_proposal(URL, &edges, [1, 3]);

        assert_eq!(snapshot.vote_weight(1), 2);
        assert_eq!(snapshot.vote_weight(3), 1);
    }

    #[test]
    fn weights_conserve_participants_with_live_chains() {
        // Voters: 1 and 4. Live chains: 2 -> 1 (global), 3 -> 2
        // (specific). Participant 5 delegates to 9, who never voted, so 5
        // contributes nothing. Total weight = voters + live-chain
        // participants.
        let edges = vec![
            edge(2, 1, None),
            edge(3, 2, Some(URL)),
            edge(5, 9, None),
        ];
        let snapshot = GraphSnapshot::for_proposal(URL, &edges, [1, 4]);

        let total = snapshot.vote_weight(1) + snapshot.vote_weight(4);
        assert_eq!(total, 4);
        assert!(snapshot.transitive_delegators(9).contains(&5));
    }

    #[test]
    fn weight_is_idempotent_for_a_fixed_snapshot() {
        let edges = vec![edge(2, 1, None), edge(3, 2, Some(URL)), edge(4, 1, Some(URL))];
        let snapshot = GraphSnapshot::for_proposal(URL, &edges, [1]);
        assert_eq!(snapshot.vote_weight(1), snapshot.vote_weight(1));
    }

    #[test]
    fn cycle_check_detects_closing_edge() {
        // A -> B -> C exists; C -> A would close the loop.
        let edges = vec![edge(1, 2, None), edge(2, 3, None)];
        assert!(reaches_any_scope(&edges, 1, 3));
        assert!(!reaches_any_scope(&edges, 3, 1));
    }

    #[test]
    fn cycle_check_crosses_delegation_scopes() {
        // B -> A exists for one proposal only. A global A -> B would
        // still close a cycle live on that proposal, so the all-scope
        // reachability must see the specific edge.
        let edges = vec![edge(2, 1, Some(URL))];
        assert!(reaches_any_scope(&edges, 2, 1));

        // And the other way round: a global edge threatens a
        // proposal-specific closing edge too.
        let globals = vec![edge(1, 2, None)];
        assert!(reaches_any_scope(&globals, 1, 2));
    }

    #[test]
    fn traversal_terminates_on_corrupted_cycle() {
        // Should never validate at write time, but the read path must not
        // loop or double-count if the rows exist anyway.
        let edges = vec![edge(1, 2, None), edge(2, 3, None), edge(3, 1, None)];
        let snapshot = GraphSnapshot::for_proposal(URL, &edges, []);

        let delegators = snapshot.transitive_delegators(1);
        assert_eq!(delegators, HashSet::from([2, 3]));
        assert!(!snapshot.reaches(1, 99));
    }

    #[test]
    fn unrelated_proposal_edges_are_ignored() {
        let edges = vec![edge(2, 1, Some("https://proposals.example/other"))];
        let snapshot = GraphSnapshot::for_proposal(URL, &edges, [1]);
        assert_eq!(snapshot.vote_weight(1), 1);
    }

    #[test]
    fn all_scope_reachability_tolerates_cycles_and_branches() {
        // A delegator can hold one global and several proposal-specific
        // edges at once; the walk must branch over all of them and
        // terminate on loops.
        let edges = vec![
            edge(1, 2, None),
            edge(1, 3, Some(URL)),
            edge(3, 1, Some("https://proposals.example/other")),
        ];
        assert!(reaches_any_scope(&edges, 1, 3));
        assert!(reaches_any_scope(&edges, 3, 2));
        assert!(!reaches_any_scope(&edges, 2, 1));
    }
}
