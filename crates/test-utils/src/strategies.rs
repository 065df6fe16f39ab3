//! Proptest strategies for topology values.
//!
//! Addresses are drawn from a small pool so generated snapshots regularly
//! contain duplicate addresses and priority ties.
//!
//! # Usage
//!
//! ```no_run
//! use inferadb_ledger_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn eligible_count_bounded(snapshot in strategies::arb_snapshot()) {
//!         prop_assert!(snapshot.eligible_count() <= snapshot.len());
//!     }
//! }
//! ```

use inferadb_ledger_topology::{Node, RankedAddress, Seed, TopologySnapshot};
use proptest::prelude::*;

/// Generates a `10.0.0.N:5000` address with `N` in `0..32`.
pub fn arb_address() -> impl Strategy<Value = String> {
    (0u8..32).prop_map(|host| format!("10.0.0.{host}:5000"))
}

/// Generates a priority in `-4..4`, small enough to produce frequent ties.
pub fn arb_priority() -> impl Strategy<Value = i32> {
    -4i32..4
}

/// Generates a node with up to two attributes from a fixed key set.
pub fn arb_node() -> impl Strategy<Value = Node> {
    (
        arb_address(),
        arb_priority(),
        any::<bool>(),
        prop::collection::btree_map(
            prop::sample::select(vec!["zone".to_string(), "role".to_string()]),
            prop::collection::vec(any::<u8>(), 0..8),
            0..=2,
        ),
    )
        .prop_map(|(address, priority, eligible, attributes)| {
            attributes
                .into_iter()
                .fold(Node::new(address, priority).with_eligible(eligible), |node, (key, value)| {
                    node.with_attribute(key, value)
                })
        })
}

/// Generates a snapshot of 0-24 nodes.
pub fn arb_snapshot() -> impl Strategy<Value = TopologySnapshot> {
    prop::collection::vec(arb_node(), 0..24).prop_map(TopologySnapshot::new)
}

/// Generates a snapshot with at least one eligible node.
pub fn arb_live_snapshot() -> impl Strategy<Value = TopologySnapshot> {
    (arb_node(), prop::collection::vec(arb_node(), 0..24)).prop_map(|(first, rest)| {
        TopologySnapshot::new(std::iter::once(first.with_eligible(true)).chain(rest))
    })
}

/// Generates a valid seed such as `ledger-3:5000`.
pub fn arb_seed() -> impl Strategy<Value = Seed> {
    (0u8..16, 1u16..=u16::MAX).prop_filter_map("valid seed", |(index, port)| {
        Seed::new(format!("ledger-{index}"), port).ok()
    })
}

/// Generates a densely ranked address list of 0-16 distinct addresses.
pub fn arb_ranked_addresses() -> impl Strategy<Value = Vec<RankedAddress>> {
    prop::collection::btree_set(arb_address(), 0..16)
        .prop_map(|addresses| addresses.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
        .prop_map(|addresses| {
            addresses
                .into_iter()
                .enumerate()
                .map(|(order_index, address)| RankedAddress::new(address, order_index))
                .collect()
        })
}
