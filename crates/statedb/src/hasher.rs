// Path: crates/statedb/src/hasher.rs
//! Hash-function policy for the authenticated trees.
//!
//! Every tree fixes its hash function at configuration time; changing it
//! after initialization is not supported. Both variants produce 32-byte
//! digests with domain-separated leaf (`0x00`) and branch (`0x01`)
//! preimages, so a leaf can never be confused with an internal node.

use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonBytesHasher};
use sha2::{Digest, Sha256};
use tally_types::error::StateError;
use tally_types::ids::Hash32;

/// Available tree hash functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeHasher {
    /// SHA-256; used by every tree except the zk-friendly census.
    Sha256,
    /// Poseidon over the BN254 scalar field; used by the census tree that
    /// feeds the zero-knowledge prover collaborator.
    Poseidon,
}

impl TreeHasher {
    /// Digest width in bytes.
    pub fn len(&self) -> usize {
        32
    }

    /// Hashes a leaf. The key is length-delimited so `key ‖ value`
    /// boundaries are unambiguous.
    pub fn hash_leaf(&self, key: &[u8], value: &[u8]) -> Result<Hash32, StateError> {
        match self {
            TreeHasher::Sha256 => {
                let mut preimage = Vec::with_capacity(5 + key.len() + value.len());
                preimage.push(0x00);
                preimage.extend_from_slice(&(key.len() as u32).to_be_bytes());
                preimage.extend_from_slice(key);
                preimage.extend_from_slice(value);
                Ok(Sha256::digest(&preimage).into())
            }
            TreeHasher::Poseidon => {
                // Key as a right-aligned field element; the value enters
                // through a SHA-256 compression so arbitrary payloads fit
                // a single sponge input.
                let key_fe = field_element_from_key(key)?;
                let value_fe = mask_to_field(Sha256::digest(value).into());
                poseidon_two(&key_fe, &value_fe)
            }
        }
    }

    /// Hashes an internal node from its two child digests. Absent children
    /// are the all-zero digest.
    pub fn hash_branch(&self, left: &Hash32, right: &Hash32) -> Result<Hash32, StateError> {
        match self {
            TreeHasher::Sha256 => {
                let mut preimage = Vec::with_capacity(65);
                preimage.push(0x01);
                preimage.extend_from_slice(left);
                preimage.extend_from_slice(right);
                Ok(Sha256::digest(&preimage).into())
            }
            // Child digests are already field elements (Poseidon outputs
            // or the zero digest), so they enter the sponge unmasked.
            TreeHasher::Poseidon => poseidon_two(left, right),
        }
    }
}

/// Clears the top byte so a 32-byte big-endian value always fits below the
/// BN254 scalar modulus (whose top byte is 0x30).
fn mask_to_field(mut bytes: Hash32) -> Hash32 {
    bytes[0] &= 0x1f;
    bytes
}

fn field_element_from_key(key: &[u8]) -> Result<Hash32, StateError> {
    if key.len() > 32 {
        return Err(StateError::InvalidArgument(format!(
            "key of {} bytes does not fit a field element",
            key.len()
        )));
    }
    let mut buf = [0u8; 32];
    buf[32 - key.len()..].copy_from_slice(key);
    Ok(mask_to_field(buf))
}

fn poseidon_two(a: &Hash32, b: &Hash32) -> Result<Hash32, StateError> {
    let mut hasher = Poseidon::<Fr>::new_circom(2)
        .map_err(|e| StateError::Corrupted(format!("poseidon init: {}", e)))?;
    hasher
        .hash_bytes_be(&[a.as_slice(), b.as_slice()])
        .map_err(|e| StateError::Corrupted(format!("poseidon hash: {}", e)))
}
