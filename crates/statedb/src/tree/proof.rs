// Path: crates/statedb/src/tree/proof.rs

//! Merkle proofs of inclusion and exclusion.

use super::{bit_at, pad_key_to, node::EMPTY_NODE_HASH};
use crate::hasher::TreeHasher;
use parity_scale_codec::{Decode, Encode};
use tally_types::error::StateError;
use tally_types::ids::Hash32;

/// A proof that a key is (or is not) bound to a value under a tree root.
///
/// For exclusion there are three shapes: the path ends in an empty slot
/// (`other_leaf` is `None`), the path ends in a tombstone for the same key
/// (`other_leaf` carries the key with an empty value), or a different leaf
/// occupies the path prefix (`other_leaf` carries that leaf).
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct MerkleProof {
    /// The key the proof speaks about.
    pub key: Vec<u8>,
    /// The proven value; empty for exclusion proofs.
    pub value: Vec<u8>,
    /// Whether the proof asserts inclusion.
    pub existence: bool,
    /// Sibling digests from the root down to the terminal node.
    pub siblings: Vec<Hash32>,
    /// The leaf actually found at the path's end, when it is not a live
    /// leaf for `key`.
    pub other_leaf: Option<(Vec<u8>, Vec<u8>)>,
}

/// Verifies a proof against a root. `hasher` and `key_bits` must match the
/// tree the proof was generated from.
pub fn verify_proof(
    hasher: TreeHasher,
    key_bits: usize,
    root: &Hash32,
    proof: &MerkleProof,
) -> Result<bool, StateError> {
    let padded = pad_key_to(&proof.key, key_bits)?;
    if proof.siblings.len() > key_bits {
        return Ok(false);
    }

    let terminal = match (proof.existence, &proof.other_leaf) {
        (true, None) => {
            if proof.value.is_empty() {
                return Ok(false);
            }
            hasher.hash_leaf(&proof.key, &proof.value)?
        }
        (false, None) => EMPTY_NODE_HASH,
        (false, Some((other_key, other_value))) => {
            // A leaf for the same key only proves exclusion when it is a
            // tombstone; a different key proves the slot is taken by
            // someone else.
            if other_key == &proof.key && !other_value.is_empty() {
                return Ok(false);
            }
            if other_key != &proof.key {
                // The conflicting leaf must actually live on the key's
                // path prefix, otherwise the proof proves nothing.
                let other_padded = pad_key_to(other_key, key_bits)?;
                for depth in 0..proof.siblings.len() {
                    if bit_at(&padded, depth) != bit_at(&other_padded, depth) {
                        return Ok(false);
                    }
                }
            }
            hasher.hash_leaf(other_key, other_value)?
        }
        (true, Some(_)) => return Ok(false),
    };

    let mut current = terminal;
    for (depth, sibling) in proof.siblings.iter().enumerate().rev() {
        current = if bit_at(&padded, depth) == 0 {
            hasher.hash_branch(&current, sibling)?
        } else {
            hasher.hash_branch(sibling, &current)?
        };
    }
    Ok(&current == root)
}
