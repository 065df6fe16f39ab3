//! Ranking of eligible nodes into ordered addresses.

use std::{cmp::Ordering, collections::HashSet, fmt};

use crate::{node::Node, snapshot::TopologySnapshot};

/// An address with its dense 0-based rank in the current topology.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RankedAddress {
    /// Address the host runtime connects to.
    pub address: String,
    /// Position in comparator order; lower is preferred.
    pub order_index: usize,
}

impl RankedAddress {
    /// Creates a ranked address.
    pub fn new(address: impl Into<String>, order_index: usize) -> Self {
        Self { address: address.into(), order_index }
    }
}

impl fmt::Display for RankedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.order_index)
    }
}

/// Filters a snapshot to eligible nodes, sorts them and assigns dense ranks.
///
/// The sort is stable over the snapshot's canonical order, so nodes the
/// comparator considers equal always rank the same way. If several eligible
/// nodes share an address, the best-ranked one wins and the rest are dropped
/// before indices are assigned.
pub fn rank_snapshot<F>(snapshot: &TopologySnapshot, compare: F) -> Vec<RankedAddress>
where
    F: Fn(&Node, &Node) -> Ordering,
{
    let mut eligible: Vec<&Node> = snapshot.eligible().collect();
    eligible.sort_by(|a, b| compare(*a, *b));

    let mut seen = HashSet::with_capacity(eligible.len());
    eligible
        .into_iter()
        .filter(|node| seen.insert(node.address()))
        .enumerate()
        .map(|(order_index, node)| RankedAddress::new(node.address(), order_index))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::node::by_priority;

    #[test]
    fn test_rank_by_priority() {
        let snapshot = TopologySnapshot::new([
            Node::new("c:1", 2),
            Node::new("a:1", 0),
            Node::new("b:1", 1),
        ]);

        let ranked = rank_snapshot(&snapshot, by_priority);
        assert_eq!(
            ranked,
            vec![
                RankedAddress::new("a:1", 0),
                RankedAddress::new("b:1", 1),
                RankedAddress::new("c:1", 2),
            ]
        );
    }

    #[test]
    fn test_ineligible_nodes_excluded() {
        let snapshot = TopologySnapshot::new([
            Node::new("a:1", 0).with_eligible(false),
            Node::new("b:1", 1),
        ]);

        let ranked = rank_snapshot(&snapshot, by_priority);
        assert_eq!(ranked, vec![RankedAddress::new("b:1", 0)]);
    }

    #[test]
    fn test_ties_follow_canonical_order() {
        let forward = TopologySnapshot::new([Node::new("b:1", 0), Node::new("a:1", 0)]);
        let reverse = TopologySnapshot::new([Node::new("a:1", 0), Node::new("b:1", 0)]);

        assert_eq!(rank_snapshot(&forward, by_priority), rank_snapshot(&reverse, by_priority));
        assert_eq!(rank_snapshot(&forward, by_priority)[0].address, "a:1");
    }

    #[test]
    fn test_custom_comparator() {
        let snapshot = TopologySnapshot::new([Node::new("a:1", 0), Node::new("b:1", 9)]);
        let ranked = rank_snapshot(&snapshot, |a, b| b.priority().cmp(&a.priority()));
        assert_eq!(ranked[0].address, "b:1");
    }

    #[test]
    fn test_duplicate_address_keeps_best_rank() {
        let snapshot = TopologySnapshot::new([
            Node::new("a:1", 5),
            Node::new("a:1", 0).with_attribute("role", "leader"),
            Node::new("b:1", 1),
        ]);

        let ranked = rank_snapshot(&snapshot, by_priority);
        assert_eq!(ranked, vec![RankedAddress::new("a:1", 0), RankedAddress::new("b:1", 1)]);
    }

    #[test]
    fn test_no_eligible_nodes() {
        let snapshot = TopologySnapshot::new([Node::new("a:1", 0).with_eligible(false)]);
        assert!(rank_snapshot(&snapshot, by_priority).is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(RankedAddress::new("a:1", 3).to_string(), "a:1#3");
    }
}
