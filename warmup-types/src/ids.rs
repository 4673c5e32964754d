//! Node identity and node-indexed bit vectors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a node in the cluster.
///
/// Node ids are a single byte on the wire, so a cluster holds at most
/// [`NodeId::MAX_NODES`] nodes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u8);

impl NodeId {
    /// Number of distinct node ids.
    pub const MAX_NODES: usize = 256;

    /// Create a NodeId from its raw value.
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// Get the raw value of this NodeId.
    pub const fn value(&self) -> u8 {
        self.0
    }
}

impl From<u8> for NodeId {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

const WORDS: usize = NodeId::MAX_NODES / 64;

/// Fixed-capacity set of node ids, one bit per possible node.
///
/// Set, query and population count are all O(1). The count is derived from
/// the bits themselves, so inserting an id twice counts it once.
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdBitVector {
    storage: [u64; WORDS],
}

impl NodeIdBitVector {
    /// Create an empty vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the bit of `node_id` is set.
    pub fn contains(&self, node_id: NodeId) -> bool {
        let (word, mask) = Self::locate(node_id);
        self.storage[word] & mask != 0
    }

    /// Set the bit of `node_id`.
    ///
    /// Returns `true` if the bit was not already set.
    pub fn insert(&mut self, node_id: NodeId) -> bool {
        let (word, mask) = Self::locate(node_id);
        if self.storage[word] & mask != 0 {
            return false;
        }
        self.storage[word] |= mask;
        true
    }

    /// Clear the bit of `node_id`.
    ///
    /// Returns `true` if the bit was set.
    pub fn remove(&mut self, node_id: NodeId) -> bool {
        let (word, mask) = Self::locate(node_id);
        if self.storage[word] & mask == 0 {
            return false;
        }
        self.storage[word] &= !mask;
        true
    }

    /// Number of bits set.
    pub fn set_bits_count(&self) -> usize {
        self.storage
            .iter()
            .map(|word| word.count_ones() as usize)
            .sum()
    }

    /// Whether no bit is set.
    pub fn is_empty(&self) -> bool {
        self.storage.iter().all(|&word| word == 0)
    }

    /// Clear every bit.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Iterate over the node ids whose bit is set, in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..NodeId::MAX_NODES)
            .map(|raw| NodeId::new(raw as u8))
            .filter(move |id| self.contains(*id))
    }

    fn locate(node_id: NodeId) -> (usize, u64) {
        let raw = node_id.value();
        (usize::from(raw >> 6), 1u64 << (raw & 0b11_1111))
    }
}

impl FromIterator<NodeId> for NodeIdBitVector {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> Self {
        let mut bits = Self::new();
        for node_id in iter {
            bits.insert(node_id);
        }
        bits
    }
}

impl fmt::Debug for NodeIdBitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|id| id.value())).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_display() {
        assert_eq!(NodeId::new(7).to_string(), "7");
        assert_eq!(format!("{:?}", NodeId::new(7)), "NodeId(7)");
    }

    #[test]
    fn insert_is_idempotent() {
        let mut bits = NodeIdBitVector::new();
        assert!(bits.insert(NodeId::new(3)));
        assert!(!bits.insert(NodeId::new(3)));
        assert_eq!(bits.set_bits_count(), 1);
        assert!(bits.contains(NodeId::new(3)));
    }

    #[test]
    fn bits_in_every_word() {
        let ids = [0u8, 63, 64, 127, 128, 191, 192, 255];
        let bits: NodeIdBitVector = ids.iter().map(|&id| NodeId::new(id)).collect();

        assert_eq!(bits.set_bits_count(), ids.len());
        for id in ids {
            assert!(bits.contains(NodeId::new(id)));
        }
        assert!(!bits.contains(NodeId::new(1)));
        assert_eq!(
            bits.iter().map(|id| id.value()).collect::<Vec<_>>(),
            ids.to_vec()
        );
    }

    #[test]
    fn remove_updates_count() {
        let mut bits: NodeIdBitVector = [1u8, 2, 3].into_iter().map(NodeId::new).collect();
        assert!(bits.remove(NodeId::new(2)));
        assert!(!bits.remove(NodeId::new(2)));
        assert_eq!(bits.set_bits_count(), 2);
    }

    #[test]
    fn clear_empties_the_vector() {
        let mut bits: NodeIdBitVector = [9u8, 200].into_iter().map(NodeId::new).collect();
        bits.clear();
        assert!(bits.is_empty());
        assert_eq!(bits, NodeIdBitVector::new());
    }

    #[test]
    fn debug_lists_set_ids() {
        let bits: NodeIdBitVector = [4u8, 1].into_iter().map(NodeId::new).collect();
        assert_eq!(format!("{:?}", bits), "{1, 4}");
    }

    #[test]
    fn count_follows_bits_after_deserialization() {
        // A stale count from an older encoding must not override the bits.
        let mut bits: NodeIdBitVector =
            serde_json::from_str(r#"{"storage":[6,0,0,0],"set_bits":0}"#).unwrap();

        assert!(bits.contains(NodeId::new(1)));
        assert!(bits.contains(NodeId::new(2)));
        assert_eq!(bits.set_bits_count(), 2);
        assert!(!bits.is_empty());

        assert!(bits.remove(NodeId::new(1)));
        assert!(bits.remove(NodeId::new(2)));
        assert!(bits.is_empty());
    }

    #[test]
    fn serializes_bits_only() {
        let bits: NodeIdBitVector = [0u8, 65].into_iter().map(NodeId::new).collect();
        let json = serde_json::to_string(&bits).unwrap();
        assert_eq!(json, r#"{"storage":[1,2,0,0]}"#);
        assert_eq!(serde_json::from_str::<NodeIdBitVector>(&json).unwrap(), bits);
    }
}
