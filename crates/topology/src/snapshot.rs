//! Immutable topology snapshots.

use std::{fmt, sync::Arc};

use sha2::{Digest, Sha256};

use crate::node::Node;

/// SHA-256 digest of a snapshot's canonical encoding.
pub type ContentHash = [u8; 32];

/// An immutable set of nodes reported by one fetch or push.
///
/// Insertion order is irrelevant: nodes are stored in canonical order and exact
/// duplicates are collapsed, so two snapshots built independently from the same
/// node set compare equal and share a content hash.
#[derive(Clone)]
pub struct TopologySnapshot {
    nodes: Arc<[Node]>,
    eligible_count: usize,
    content_hash: ContentHash,
}

impl TopologySnapshot {
    /// Creates a snapshot from any collection of nodes.
    pub fn new(nodes: impl IntoIterator<Item = Node>) -> Self {
        let mut nodes: Vec<Node> = nodes.into_iter().collect();
        nodes.sort();
        nodes.dedup();

        let eligible_count = nodes.iter().filter(|node| node.is_eligible()).count();
        let content_hash = content_hash(&nodes);

        Self { nodes: nodes.into(), eligible_count, content_hash }
    }

    /// Creates a snapshot with no nodes.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Returns the nodes in canonical order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Returns the eligible nodes in canonical order.
    pub fn eligible(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|node| node.is_eligible())
    }

    /// Returns the total node count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the snapshot has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the number of eligible nodes.
    #[must_use]
    pub fn eligible_count(&self) -> usize {
        self.eligible_count
    }

    /// Returns the content hash.
    #[must_use]
    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }
}

impl PartialEq for TopologySnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.content_hash == other.content_hash && self.nodes == other.nodes
    }
}

impl Eq for TopologySnapshot {}

impl FromIterator<Node> for TopologySnapshot {
    fn from_iter<I: IntoIterator<Item = Node>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Debug for TopologySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopologySnapshot")
            .field("total", &self.nodes.len())
            .field("eligible", &self.eligible_count)
            .field("hash", &format_args!("{}", short_hex(&self.content_hash)))
            .field("nodes", &self.nodes)
            .finish()
    }
}

/// Hashes nodes using a length-prefixed encoding.
///
/// Layout: `count:u64 || for each node: len:u32 || address || eligible:u8 ||
/// priority:i32 || attr_count:u32 || (len:u32 || key || len:u32 || value)*`.
/// All integers are big-endian.
fn content_hash(nodes: &[Node]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update((nodes.len() as u64).to_be_bytes());
    for node in nodes {
        update_len_prefixed(&mut hasher, node.address().as_bytes());
        hasher.update([u8::from(node.is_eligible())]);
        hasher.update(node.priority().to_be_bytes());
        hasher.update((node.attributes().len() as u32).to_be_bytes());
        for (key, value) in node.attributes() {
            update_len_prefixed(&mut hasher, key.as_bytes());
            update_len_prefixed(&mut hasher, value);
        }
    }
    hasher.finalize().into()
}

fn update_len_prefixed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u32).to_be_bytes());
    hasher.update(bytes);
}

/// First 8 bytes of a hash as hex, for logs.
pub(crate) fn short_hex(hash: &ContentHash) -> String {
    hash[..8].iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn nodes() -> Vec<Node> {
        vec![
            Node::new("10.0.0.2:5000", 1),
            Node::new("10.0.0.1:5000", 0),
            Node::new("10.0.0.3:5000", 2).with_eligible(false),
        ]
    }

    #[test]
    fn test_counts() {
        let snapshot = TopologySnapshot::new(nodes());
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.eligible_count(), 2);
        assert!(!snapshot.is_empty());
        assert_eq!(snapshot.eligible().count(), 2);
    }

    #[test]
    fn test_empty() {
        let snapshot = TopologySnapshot::empty();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.eligible_count(), 0);
    }

    #[test]
    fn test_equality_ignores_insertion_order() {
        let forward = TopologySnapshot::new(nodes());
        let reversed: TopologySnapshot = nodes().into_iter().rev().collect();

        assert_eq!(forward, reversed);
        assert_eq!(forward.content_hash(), reversed.content_hash());
    }

    #[test]
    fn test_duplicates_collapse() {
        let mut doubled = nodes();
        doubled.extend(nodes());
        assert_eq!(TopologySnapshot::new(doubled), TopologySnapshot::new(nodes()));
    }

    #[test]
    fn test_hash_changes_with_eligibility() {
        let before = TopologySnapshot::new(nodes());
        let mut changed = nodes();
        changed[0] = changed[0].clone().with_eligible(false);
        let after = TopologySnapshot::new(changed);

        assert_ne!(before, after);
        assert_ne!(before.content_hash(), after.content_hash());
    }

    #[test]
    fn test_hash_changes_with_attributes() {
        let plain = TopologySnapshot::new([Node::new("a:1", 0)]);
        let tagged = TopologySnapshot::new([Node::new("a:1", 0).with_attribute("dc", "x")]);
        assert_ne!(plain.content_hash(), tagged.content_hash());
    }

    #[test]
    fn test_length_prefix_prevents_ambiguity() {
        let split = TopologySnapshot::new([Node::new("a:1", 0).with_attribute("ab", "c")]);
        let joined = TopologySnapshot::new([Node::new("a:1", 0).with_attribute("a", "bc")]);
        assert_ne!(split.content_hash(), joined.content_hash());
    }

    #[test]
    fn test_short_hex() {
        let hash = [0xab; 32];
        assert_eq!(short_hex(&hash), "abababababababab");
    }
}
