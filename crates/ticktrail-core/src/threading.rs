//! Incremental threading: linking nodes into chronological chains.
//!
//! A chain is a sequence of nodes in one scope (a session for frames and
//! events, a session and actor for states) where each node points at its
//! immediate predecessor by ordering key. The latest node, the head, has
//! no incoming link.
//!
//! Each run only looks at nodes with no incoming link: the current head
//! of every scope plus nodes created since the last run. [`plan_links`]
//! decides, from those candidates alone, which new links to create. The
//! plan is the same whichever store executes it, and re-running it after
//! it was applied yields an empty plan.
//!
//! A node whose key is lower than the head it would attach to arrived
//! late (a reordered batch). Appending it would break key order, so it is
//! reported in [`ChainPlan::late`] and the store splices it in front of
//! its in-chain successor (see [`Splice`]).

use std::collections::BTreeSet;

use crate::gateway::{Mutation, ThreadStep};

/// The fixed threading sequence run after every committed batch.
pub fn sequence() -> Vec<Mutation> {
    ThreadStep::ALL.into_iter().map(Mutation::Thread).collect()
}

/// A node with no incoming link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<K> {
    /// The ordering key (`tic` or `counter`).
    pub key: K,
    /// Whether the node already links to a predecessor, i.e. it heads an
    /// existing chain rather than standing alone.
    pub linked: bool,
}

/// A new link: `node` points at `prev`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link<K> {
    /// The later node.
    pub node: K,
    /// Its immediate predecessor.
    pub prev: K,
}

/// The outcome of [`plan_links`] for one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPlan<K> {
    /// Links to create, in ascending key order.
    pub links: Vec<Link<K>>,
    /// Standalone nodes older than the chain head, in ascending order.
    pub late: Vec<K>,
}

impl<K> ChainPlan<K> {
    /// Whether the plan changes nothing.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty() && self.late.is_empty()
    }
}

impl<K> Default for ChainPlan<K> {
    fn default() -> Self {
        Self {
            links: Vec::new(),
            late: Vec::new(),
        }
    }
}

/// Plan the links for one chain scope.
///
/// The anchor is the greatest candidate that already links to a
/// predecessor. Standalone candidates with keys at or above the anchor are
/// chained in ascending order behind it. Standalone candidates below it are
/// late. Without an anchor every candidate is standalone and they are all
/// chained together.
///
/// Linked candidates other than the anchor are left untouched.
pub fn plan_links<K: Ord + Clone>(mut candidates: Vec<Candidate<K>>) -> ChainPlan<K> {
    candidates.sort_by(|a, b| a.key.cmp(&b.key));

    let anchor = candidates
        .iter()
        .filter(|candidate| candidate.linked)
        .map(|candidate| candidate.key.clone())
        .max();

    let mut plan = ChainPlan::default();
    let mut tail = anchor.clone();
    for candidate in candidates.into_iter().filter(|candidate| !candidate.linked) {
        if anchor.as_ref().is_some_and(|anchor| candidate.key < *anchor) {
            plan.late.push(candidate.key);
            continue;
        }
        if let Some(prev) = tail.replace(candidate.key.clone()) {
            plan.links.push(Link {
                node: candidate.key,
                prev,
            });
        }
    }
    plan
}

/// How to thread one late node into an existing chain.
///
/// `successor` is the in-chain node with the smallest key greater than
/// `late`; `predecessor` is what `successor` pointed at before the splice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splice<K> {
    /// The late node.
    pub late: K,
    /// Its in-chain successor.
    pub successor: K,
    /// The successor's previous predecessor, if it had one.
    pub predecessor: Option<K>,
}

impl<K: Clone> Splice<K> {
    /// The links after splicing: `successor -> late` replaces
    /// `successor -> predecessor`, and `late -> predecessor` is added.
    pub fn links(&self) -> (Link<K>, Option<Link<K>>) {
        let repointed = Link {
            node: self.successor.clone(),
            prev: self.late.clone(),
        };
        let added = self.predecessor.clone().map(|prev| Link {
            node: self.late.clone(),
            prev,
        });
        (repointed, added)
    }
}

/// A chain walk revisited a node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("previous-link cycle detected after {steps} steps")]
pub struct ChainCycle {
    /// Nodes visited before the cycle was found.
    pub steps: usize,
}

/// Follow previous links from `start` until a node with no predecessor.
///
/// A chain of one node is its own tail.
///
/// # Errors
///
/// Returns [`ChainCycle`] if a node is reached twice.
pub fn walk_to_tail<K, F>(start: K, mut prev_of: F) -> Result<K, ChainCycle>
where
    K: Ord + Clone,
    F: FnMut(&K) -> Option<K>,
{
    let mut visited = BTreeSet::new();
    let mut node = start;
    loop {
        if !visited.insert(node.clone()) {
            return Err(ChainCycle {
                steps: visited.len(),
            });
        }
        match prev_of(&node) {
            Some(prev) => node = prev,
            None => return Ok(node),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn fresh(key: u64) -> Candidate<u64> {
        Candidate { key, linked: false }
    }

    fn head(key: u64) -> Candidate<u64> {
        Candidate { key, linked: true }
    }

    fn link(node: u64, prev: u64) -> Link<u64> {
        Link { node, prev }
    }

    #[test]
    fn first_run_chains_everything_in_key_order() {
        let plan = plan_links(vec![fresh(33), fresh(1), fresh(44), fresh(21)]);
        assert_eq!(plan.links, vec![link(21, 1), link(33, 21), link(44, 33)]);
        assert!(plan.late.is_empty());
    }

    #[test]
    fn new_nodes_attach_behind_existing_head() {
        let plan = plan_links(vec![fresh(12), head(10), fresh(11)]);
        assert_eq!(plan.links, vec![link(11, 10), link(12, 11)]);
    }

    #[test]
    fn single_candidate_needs_no_link() {
        assert!(plan_links(vec![fresh(5)]).is_empty());
        assert!(plan_links(vec![head(5)]).is_empty());
        assert!(plan_links::<u64>(Vec::new()).is_empty());
    }

    #[test]
    fn replanning_after_apply_is_empty() {
        // After applying [21->1, 33->21, 44->33] only 44 has no incoming
        // link, and it links to 33.
        assert!(plan_links(vec![head(44)]).is_empty());
    }

    #[test]
    fn lone_previous_node_is_chained_like_a_fresh_one() {
        // A chain of one node has no link yet, so it is indistinguishable
        // from a new node and the whole set is ordered together.
        let plan = plan_links(vec![fresh(7), fresh(3)]);
        assert_eq!(plan.links, vec![link(7, 3)]);
    }

    #[test]
    fn nodes_older_than_head_are_late() {
        let plan = plan_links(vec![head(50), fresh(20), fresh(60), fresh(40)]);
        assert_eq!(plan.links, vec![link(60, 50)]);
        assert_eq!(plan.late, vec![20, 40]);
    }

    #[test]
    fn equal_keys_still_form_a_total_order() {
        let plan = plan_links(vec![fresh(2), fresh(2), fresh(1)]);
        assert_eq!(plan.links.len(), 2);
        let prevs: BTreeSet<_> = plan.links.iter().map(|l| l.prev).collect();
        assert_eq!(prevs.len(), 2);
    }

    #[test]
    fn splice_repoints_successor() {
        let splice = Splice {
            late: 20,
            successor: 30,
            predecessor: Some(10),
        };
        let (repointed, added) = splice.links();
        assert_eq!(repointed, link(30, 20));
        assert_eq!(added, Some(link(20, 10)));

        let at_tail = Splice {
            late: 5,
            successor: 10,
            predecessor: None,
        };
        assert_eq!(at_tail.links(), (link(10, 5), None));
    }

    #[test]
    fn walk_reaches_tail() {
        let prev: BTreeMap<u64, u64> = [(44, 33), (33, 21), (21, 1)].into_iter().collect();
        let tail = walk_to_tail(44, |node| prev.get(node).copied()).unwrap();
        assert_eq!(tail, 1);
        assert_eq!(walk_to_tail(9, |_| None).unwrap(), 9);
    }

    #[test]
    fn walk_detects_cycles() {
        let prev: BTreeMap<u64, u64> = [(3, 2), (2, 1), (1, 3)].into_iter().collect();
        let err = walk_to_tail(3, |node| prev.get(node).copied()).unwrap_err();
        assert_eq!(err.steps, 3);
    }

    #[test]
    fn sequence_is_five_thread_steps() {
        let steps = sequence();
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0], Mutation::Thread(ThreadStep::Frames));
        assert_eq!(steps[4], Mutation::Thread(ThreadStep::SetInitial));
    }
}
