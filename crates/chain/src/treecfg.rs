// Path: crates/chain/src/treecfg.rs

//! The chain's tree layout: one well-known sub-tree per actor set plus
//! per-process census and vote families.
//!
//! Names are part of the persisted layout and must never change.

use tally_statedb::{root_leaf_get_root, root_leaf_set_root, TreeConfig, TreeHasher};
use tally_types::codec;
use tally_types::error::StateError;
use tally_types::ids::EMPTY_HASH;
use tally_types::StateDbProcess;

/// Trusted oracle addresses. Root-leaf hosted by the main tree.
pub static ORACLES_CFG: TreeConfig = TreeConfig::single(
    "oracs",
    TreeHasher::Sha256,
    256,
    root_leaf_get_root,
    root_leaf_set_root,
);

/// Consensus validators. Root-leaf hosted by the main tree.
pub static VALIDATORS_CFG: TreeConfig = TreeConfig::single(
    "valids",
    TreeHasher::Sha256,
    256,
    root_leaf_get_root,
    root_leaf_set_root,
);

/// Election processes. Root-leaf hosted by the main tree; each of its
/// leaves is a [`StateDbProcess`] record hosting the per-process trees.
pub static PROCESSES_CFG: TreeConfig = TreeConfig::single(
    "procs",
    TreeHasher::Sha256,
    256,
    root_leaf_get_root,
    root_leaf_set_root,
);

/// Per-process census, SHA-256 flavor. Derived-leaf: the root is embedded
/// in the process record.
pub static CENSUS_CFG: TreeConfig = TreeConfig::family(
    "cen",
    TreeHasher::Sha256,
    256,
    process_get_census_root,
    process_set_census_root,
);

/// Per-process census for zk-rollup processes: Poseidon hashes, 64-bit
/// keys, so paths fit the prover's circuit.
pub static CENSUS_POSEIDON_CFG: TreeConfig = TreeConfig::family(
    "cenPos",
    TreeHasher::Poseidon,
    64,
    process_get_census_root,
    process_set_census_root,
);

/// Per-process votes. Keys are `process_id ‖ nullifier` (64 bytes), hence
/// the 512-bit key width.
pub static VOTES_CFG: TreeConfig = TreeConfig::family(
    "votes",
    TreeHasher::Sha256,
    512,
    process_get_votes_root,
    process_set_votes_root,
);

fn decode_process(value: &[u8]) -> Result<StateDbProcess, StateError> {
    codec::from_bytes_canonical(value).map_err(StateError::Corrupted)
}

fn process_get_census_root(value: &[u8]) -> Result<Vec<u8>, StateError> {
    let rec = decode_process(value)?;
    // A process created without an anchored census carries no root yet.
    if rec.process.census_root.is_empty() {
        return Ok(EMPTY_HASH.to_vec());
    }
    Ok(rec.process.census_root)
}

fn process_set_census_root(value: &[u8], root: &[u8]) -> Result<Vec<u8>, StateError> {
    let mut rec = decode_process(value)?;
    rec.process.census_root = root.to_vec();
    Ok(codec::to_bytes_canonical(&rec))
}

fn process_get_votes_root(value: &[u8]) -> Result<Vec<u8>, StateError> {
    let rec = decode_process(value)?;
    Ok(rec.votes_root.to_vec())
}

fn process_set_votes_root(value: &[u8], root: &[u8]) -> Result<Vec<u8>, StateError> {
    let mut rec = decode_process(value)?;
    rec.votes_root = root
        .try_into()
        .map_err(|_| StateError::Corrupted("votes root is not 32 bytes".into()))?;
    Ok(codec::to_bytes_canonical(&rec))
}
