//! Node values reported by a topology source.

use std::{cmp::Ordering, collections::BTreeMap};

/// Opaque per-node attributes (datacenter, zone, role tags, ...).
///
/// Values are raw bytes; the engine never interprets them. They only take part
/// in node identity and in source-defined ordering.
pub type NodeAttributes = BTreeMap<String, Vec<u8>>;

/// A backend node as reported by a topology source.
///
/// Nodes are plain values: two nodes with identical address, eligibility,
/// priority and attributes are interchangeable. Updates produce new values.
///
/// # Example
///
/// ```no_run
/// use inferadb_ledger_topology::Node;
///
/// let leader = Node::builder().address("10.0.0.1:5000").priority(0).build();
/// let learner = Node::builder()
///     .address("10.0.0.2:5000")
///     .priority(1)
///     .eligible(false)
///     .build()
///     .with_attribute("zone", "us-east-1a");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, bon::Builder)]
pub struct Node {
    /// Address the host runtime connects to (`host:port`).
    #[builder(into)]
    address: String,

    /// Whether the node may receive traffic.
    #[builder(default = true)]
    eligible: bool,

    /// Preference tier; lower is preferred by [`by_priority`].
    #[builder(default)]
    priority: i32,

    /// Source-defined attributes.
    #[builder(default)]
    attributes: NodeAttributes,
}

impl Node {
    /// Creates an eligible node with the given priority and no attributes.
    #[must_use]
    pub fn new(address: impl Into<String>, priority: i32) -> Self {
        Self {
            address: address.into(),
            eligible: true,
            priority,
            attributes: NodeAttributes::new(),
        }
    }

    /// Returns the node address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns whether the node may receive traffic.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.eligible
    }

    /// Returns the node priority.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Returns the node attributes.
    #[must_use]
    pub fn attributes(&self) -> &NodeAttributes {
        &self.attributes
    }

    /// Returns a single attribute value.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&[u8]> {
        self.attributes.get(key).map(Vec::as_slice)
    }

    /// Returns a copy of this node with a different eligibility.
    #[must_use]
    pub fn with_eligible(mut self, eligible: bool) -> Self {
        self.eligible = eligible;
        self
    }

    /// Returns a copy of this node with one attribute set.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns a copy of this node with a different priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Orders nodes by ascending priority.
///
/// Equal priorities compare as equal. Sorting is stable over the snapshot's
/// canonical node order, so ties resolve the same way on every run.
#[must_use]
pub fn by_priority(a: &Node, b: &Node) -> Ordering {
    a.priority.cmp(&b.priority)
}
