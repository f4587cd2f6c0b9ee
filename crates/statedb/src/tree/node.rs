// Path: crates/statedb/src/tree/node.rs

use crate::hasher::TreeHasher;
use parity_scale_codec::{Decode, Encode};
use tally_types::error::StateError;
use tally_types::ids::Hash32;

/// A canonical hash for an empty/nil child node.
pub(crate) const EMPTY_NODE_HASH: Hash32 = [0u8; 32];

/// A tree node. Nodes are immutable and content-addressed: the node's
/// canonical encoding is stored under its own hash, so reopening the
/// backend reconstructs any root without re-hashing.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) enum Node {
    /// A key-value leaf. An empty value is a tombstone: the key stays in
    /// the tree and keeps hashing as an empty-valued leaf marker.
    Leaf { key: Vec<u8>, value: Vec<u8> },
    /// An internal node referencing children by hash; absent children are
    /// the all-zero digest.
    Branch { left: Hash32, right: Hash32 },
}

impl Node {
    /// Computes this node's content hash under the given hash function.
    pub(crate) fn hash(&self, hasher: &TreeHasher) -> Result<Hash32, StateError> {
        match self {
            Node::Leaf { key, value } => hasher.hash_leaf(key, value),
            Node::Branch { left, right } => hasher.hash_branch(left, right),
        }
    }
}
