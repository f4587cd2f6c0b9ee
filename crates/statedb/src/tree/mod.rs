// Path: crates/statedb/src/tree/mod.rs

//! A sparse binary Merkle tree over a key-value namespace.
//!
//! Nodes are content-addressed and fetched on demand from the backend, so
//! a root digest plus the namespace is enough to materialize any
//! historical version of the tree. Leaves sit at the first bit depth that
//! distinguishes their key from every other key (lazy placement), which
//! keeps paths short for sparse key spaces. Nothing is ever physically
//! removed from the namespace: deletion stores a tombstone leaf (empty
//! value) whose marker hash replaces the previous leaf digest.

mod node;
mod proof;

pub use proof::{verify_proof, MerkleProof};

use crate::hasher::TreeHasher;
use node::{Node, EMPTY_NODE_HASH};
use tally_storage::{KvRead, Overlay};
use tally_types::codec;
use tally_types::error::StateError;
use tally_types::ids::{Hash32, EMPTY_HASH};

/// Whether an insert overwrites existing live values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertMode {
    /// Fail with `AlreadyExists` when the key holds a non-empty value.
    Add,
    /// Unconditionally store; an empty value tombstones the key.
    Set,
}

/// A single authenticated key-value map within a KV namespace.
///
/// The struct is stateless: every operation takes the root to operate on,
/// which is what makes immutable snapshots and pending write overlays
/// share one implementation.
#[derive(Debug, Clone)]
pub struct Tree {
    hasher: TreeHasher,
    key_bits: usize,
    ns: Vec<u8>,
}

impl Tree {
    /// Creates a tree descriptor over the given namespace. `key_bits`
    /// caps the key length (in bits) and bounds the path depth.
    pub fn new(hasher: TreeHasher, key_bits: usize, ns: Vec<u8>) -> Self {
        debug_assert!(key_bits % 8 == 0, "key width must be whole bytes");
        Self {
            hasher,
            key_bits,
            ns,
        }
    }

    /// The tree's hash function.
    pub fn hasher(&self) -> TreeHasher {
        self.hasher
    }

    /// Maximum key bit-length.
    pub fn key_bits(&self) -> usize {
        self.key_bits
    }

    fn node_key(&self, hash: &Hash32) -> Vec<u8> {
        let mut k = Vec::with_capacity(self.ns.len() + 1 + hash.len());
        k.extend_from_slice(&self.ns);
        k.push(b'n');
        k.extend_from_slice(hash);
        k
    }

    /// Zero-pads a key to the tree's key width for path derivation.
    fn pad_key(&self, key: &[u8]) -> Result<Vec<u8>, StateError> {
        pad_key_to(key, self.key_bits)
    }

    fn load_node(&self, kv: &dyn KvRead, hash: &Hash32) -> Result<Node, StateError> {
        let bytes = kv
            .get(&self.node_key(hash))?
            .ok_or_else(|| StateError::Corrupted(format!("missing tree node {}", hex::encode(hash))))?;
        codec::from_bytes_canonical(&bytes).map_err(StateError::Corrupted)
    }

    fn store_node(&self, ov: &mut Overlay, node: &Node) -> Result<Hash32, StateError> {
        let hash = node.hash(&self.hasher)?;
        ov.put(self.node_key(&hash), codec::to_bytes_canonical(node));
        Ok(hash)
    }

    /// Point lookup. Tombstones report absent.
    pub fn get(
        &self,
        kv: &dyn KvRead,
        root: &Hash32,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StateError> {
        let padded = self.pad_key(key)?;
        let mut hash = *root;
        let mut depth = 0usize;
        loop {
            if hash == EMPTY_NODE_HASH {
                return Ok(None);
            }
            match self.load_node(kv, &hash)? {
                Node::Leaf { key: ekey, value } => {
                    if ekey == key && !value.is_empty() {
                        return Ok(Some(value));
                    }
                    return Ok(None);
                }
                Node::Branch { left, right } => {
                    if depth >= self.key_bits {
                        return Err(StateError::Corrupted(
                            "branch below the maximum tree depth".into(),
                        ));
                    }
                    hash = if bit_at(&padded, depth) == 0 { left } else { right };
                    depth += 1;
                }
            }
        }
    }

    /// Inserts a new entry. Fails with `AlreadyExists` when the key is
    /// already present with a non-empty value; adding over a tombstone
    /// succeeds. Returns the new root.
    pub fn add(
        &self,
        ov: &mut Overlay,
        root: &Hash32,
        key: &[u8],
        value: &[u8],
    ) -> Result<Hash32, StateError> {
        self.insert(ov, root, key, value, InsertMode::Add)
    }

    /// Unconditionally stores an entry; an empty value is a tombstone.
    /// Returns the new root.
    pub fn set(
        &self,
        ov: &mut Overlay,
        root: &Hash32,
        key: &[u8],
        value: &[u8],
    ) -> Result<Hash32, StateError> {
        self.insert(ov, root, key, value, InsertMode::Set)
    }

    pub(crate) fn insert(
        &self,
        ov: &mut Overlay,
        root: &Hash32,
        key: &[u8],
        value: &[u8],
        mode: InsertMode,
    ) -> Result<Hash32, StateError> {
        let padded = self.pad_key(key)?;
        self.insert_at(ov, *root, 0, &padded, key, value, mode)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_at(
        &self,
        ov: &mut Overlay,
        node_hash: Hash32,
        depth: usize,
        padded: &[u8],
        key: &[u8],
        value: &[u8],
        mode: InsertMode,
    ) -> Result<Hash32, StateError> {
        if node_hash == EMPTY_NODE_HASH {
            return self.store_node(
                ov,
                &Node::Leaf {
                    key: key.to_vec(),
                    value: value.to_vec(),
                },
            );
        }
        match self.load_node(&*ov, &node_hash)? {
            Node::Leaf {
                key: ekey,
                value: evalue,
            } => {
                if ekey == key {
                    if mode == InsertMode::Add && !evalue.is_empty() {
                        return Err(StateError::AlreadyExists);
                    }
                    return self.store_node(
                        ov,
                        &Node::Leaf {
                            key: key.to_vec(),
                            value: value.to_vec(),
                        },
                    );
                }
                // Two distinct keys competing for the same slot: push both
                // leaves down to the first bit that separates them. The
                // old leaf node is already stored (content-addressed).
                let epadded = self.pad_key(&ekey)?;
                let new_leaf = self.store_node(
                    ov,
                    &Node::Leaf {
                        key: key.to_vec(),
                        value: value.to_vec(),
                    },
                )?;
                self.split_leaves(ov, depth, padded, new_leaf, &epadded, node_hash)
            }
            Node::Branch { left, right } => {
                if depth >= self.key_bits {
                    return Err(StateError::Corrupted(
                        "branch below the maximum tree depth".into(),
                    ));
                }
                let (new_left, new_right) = if bit_at(padded, depth) == 0 {
                    (
                        self.insert_at(ov, left, depth + 1, padded, key, value, mode)?,
                        right,
                    )
                } else {
                    (
                        left,
                        self.insert_at(ov, right, depth + 1, padded, key, value, mode)?,
                    )
                };
                self.store_node(
                    ov,
                    &Node::Branch {
                        left: new_left,
                        right: new_right,
                    },
                )
            }
        }
    }

    /// Builds the branch chain that separates two leaves whose paths agree
    /// from `depth` until their first divergence.
    fn split_leaves(
        &self,
        ov: &mut Overlay,
        depth: usize,
        padded_a: &[u8],
        leaf_a: Hash32,
        padded_b: &[u8],
        leaf_b: Hash32,
    ) -> Result<Hash32, StateError> {
        let mut diverge = depth;
        while diverge < self.key_bits && bit_at(padded_a, diverge) == bit_at(padded_b, diverge) {
            diverge += 1;
        }
        if diverge == self.key_bits {
            return Err(StateError::InvalidArgument(
                "distinct keys collide after padding to the tree's key width".into(),
            ));
        }

        let mut hash = if bit_at(padded_a, diverge) == 0 {
            self.store_node(
                ov,
                &Node::Branch {
                    left: leaf_a,
                    right: leaf_b,
                },
            )?
        } else {
            self.store_node(
                ov,
                &Node::Branch {
                    left: leaf_b,
                    right: leaf_a,
                },
            )?
        };
        for level in (depth..diverge).rev() {
            hash = if bit_at(padded_a, level) == 0 {
                self.store_node(
                    ov,
                    &Node::Branch {
                        left: hash,
                        right: EMPTY_NODE_HASH,
                    },
                )?
            } else {
                self.store_node(
                    ov,
                    &Node::Branch {
                        left: EMPTY_NODE_HASH,
                        right: hash,
                    },
                )?
            };
        }
        Ok(hash)
    }

    /// Walks the leaves in ascending (padded) key order. Tombstones are
    /// yielded too; callers that only want live entries skip empty values.
    /// Safe to run on an immutable snapshot concurrently with writers on
    /// another overlay.
    pub fn iter<'a>(&'a self, kv: &'a dyn KvRead, root: &Hash32) -> TreeIter<'a> {
        TreeIter {
            tree: self,
            kv,
            stack: vec![*root],
        }
    }

    /// Number of live (non-tombstone) leaves. Tombstoned keys remain in
    /// the tree but are not counted.
    pub fn size(&self, kv: &dyn KvRead, root: &Hash32) -> Result<u64, StateError> {
        let mut count = 0u64;
        for entry in self.iter(kv, root) {
            let (_, value) = entry?;
            if !value.is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Produces a Merkle proof of inclusion or exclusion for `key`,
    /// verifiable against the root with [`verify_proof`].
    pub fn prove(
        &self,
        kv: &dyn KvRead,
        root: &Hash32,
        key: &[u8],
    ) -> Result<MerkleProof, StateError> {
        let padded = self.pad_key(key)?;
        let mut siblings = Vec::new();
        let mut hash = *root;
        let mut depth = 0usize;
        loop {
            if hash == EMPTY_NODE_HASH {
                return Ok(MerkleProof {
                    key: key.to_vec(),
                    value: Vec::new(),
                    existence: false,
                    siblings,
                    other_leaf: None,
                });
            }
            match self.load_node(kv, &hash)? {
                Node::Leaf {
                    key: ekey,
                    value: evalue,
                } => {
                    if ekey == key && !evalue.is_empty() {
                        return Ok(MerkleProof {
                            key: key.to_vec(),
                            value: evalue,
                            existence: true,
                            siblings,
                            other_leaf: None,
                        });
                    }
                    // Either a tombstone for this key or a different leaf
                    // occupying the path prefix; both prove exclusion.
                    return Ok(MerkleProof {
                        key: key.to_vec(),
                        value: Vec::new(),
                        existence: false,
                        siblings,
                        other_leaf: Some((ekey, evalue)),
                    });
                }
                Node::Branch { left, right } => {
                    if depth >= self.key_bits {
                        return Err(StateError::Corrupted(
                            "branch below the maximum tree depth".into(),
                        ));
                    }
                    if bit_at(&padded, depth) == 0 {
                        siblings.push(right);
                        hash = left;
                    } else {
                        siblings.push(left);
                        hash = right;
                    }
                    depth += 1;
                }
            }
        }
    }
}

/// Returns the `depth`-th bit of a padded key, MSB first.
pub(crate) fn bit_at(padded: &[u8], depth: usize) -> u8 {
    (padded[depth / 8] >> (7 - depth % 8)) & 1
}

/// Zero-pads `key` to `key_bits`, mirroring the tree's path derivation.
/// Used by proof verification, which runs without a `Tree` instance.
pub(crate) fn pad_key_to(key: &[u8], key_bits: usize) -> Result<Vec<u8>, StateError> {
    if key.is_empty() || key.len() * 8 > key_bits {
        return Err(StateError::InvalidArgument(format!(
            "key of {} bytes out of range for a {}-bit tree",
            key.len(),
            key_bits
        )));
    }
    let mut padded = vec![0u8; key_bits / 8];
    padded[..key.len()].copy_from_slice(key);
    Ok(padded)
}

/// Lazy depth-first iterator over a tree's leaves.
pub struct TreeIter<'a> {
    tree: &'a Tree,
    kv: &'a dyn KvRead,
    stack: Vec<Hash32>,
}

impl<'a> Iterator for TreeIter<'a> {
    type Item = Result<(Vec<u8>, Vec<u8>), StateError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(hash) = self.stack.pop() {
            if hash == EMPTY_NODE_HASH {
                continue;
            }
            match self.tree.load_node(self.kv, &hash) {
                Ok(Node::Leaf { key, value }) => return Some(Ok((key, value))),
                Ok(Node::Branch { left, right }) => {
                    // Right below left so the left subtree drains first.
                    self.stack.push(right);
                    self.stack.push(left);
                }
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Re-exported zero root: an all-zero digest denotes an empty tree.
pub const EMPTY_TREE_ROOT: Hash32 = EMPTY_HASH;
