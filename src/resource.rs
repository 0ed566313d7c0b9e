use serde::{Deserialize, Serialize};

use crate::message::NodeId;

/// A pool of available execution slots stored in the key-value store.
///
/// The slot count is the length of the node list, so splitting and merging
/// conserve node identifiers by construction. A record is only ever mutated
/// by its owning shard through compare-and-swap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub nodes: Vec<NodeId>,
}

impl Resource {
    pub fn new(nodes: Vec<NodeId>) -> Self {
        Self { nodes }
    }

    pub fn available(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn push(&mut self, node: NodeId) {
        self.nodes.push(node);
    }

    /// Split off the first `n` slots, leaving the remainder behind.
    /// Returns `(taken, remainder)`.
    pub fn split(&self, n: usize) -> (Resource, Resource) {
        let n = n.min(self.nodes.len());
        let taken = Resource::new(self.nodes[..n].to_vec());
        let rest = Resource::new(self.nodes[n..].to_vec());
        (taken, rest)
    }

    /// Append every slot of `other` onto this record.
    pub fn merge(&mut self, other: &Resource) {
        self.nodes.extend_from_slice(&other.nodes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_conserves_nodes() {
        let res = Resource::new(vec![1, 2, 3, 4]);
        let (taken, rest) = res.split(3);
        assert_eq!(taken.nodes, vec![1, 2, 3]);
        assert_eq!(rest.nodes, vec![4]);
        assert_eq!(taken.available() + rest.available(), res.available());
    }

    #[test]
    fn test_split_more_than_available() {
        let res = Resource::new(vec![7, 8]);
        let (taken, rest) = res.split(5);
        assert_eq!(taken.nodes, vec![7, 8]);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_merge_preserves_order() {
        let mut a = Resource::new(vec![1, 2]);
        let b = Resource::new(vec![3]);
        a.merge(&b);
        assert_eq!(a.nodes, vec![1, 2, 3]);
        assert_eq!(a.available(), 3);
    }

    #[test]
    fn test_split_then_merge_round_trips() {
        let res = Resource::new(vec![5, 6, 7]);
        let (taken, mut rest) = res.split(1);
        let mut rebuilt = taken;
        rebuilt.merge(&rest);
        rest.nodes.clear();
        assert_eq!(rebuilt.nodes, vec![5, 6, 7]);
    }
}
