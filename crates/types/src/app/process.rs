// Path: crates/types/src/app/process.rs
//! Election process records.

use crate::ids::{Hash32, EMPTY_HASH, MAX_PROCESS_KEYS};
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an election process.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum ProcessStatus {
    /// Accepting votes.
    Ready,
    /// Temporarily not accepting votes.
    Paused,
    /// Voting period over.
    Ended,
    /// Aborted by its entity; final.
    Canceled,
    /// Results published; final.
    Results,
}

/// A single election instance. The record travels through the state trees
/// in its canonical encoding, so field order is consensus-critical.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Process {
    /// 32-byte process identifier.
    pub process_id: Vec<u8>,
    /// Identifier of the entity that created the process.
    pub entity_id: Vec<u8>,
    /// Root of the census this process votes against. For anchored
    /// censuses this mirrors the census sub-tree root; for off-chain
    /// censuses it is opaque data.
    pub census_root: Vec<u8>,
    /// Where the census data can be fetched from.
    pub census_uri: String,
    /// Block at which the process starts accepting votes.
    pub start_block: u32,
    /// Number of blocks the process lasts.
    pub block_count: u32,
    /// Current lifecycle status.
    pub status: ProcessStatus,
    /// Maximum number of choices a ballot may carry.
    pub max_count: u32,
    /// Maximum value of a single choice.
    pub max_value: u32,
    /// Published encryption public keys, indexed by key index.
    pub encryption_public_keys: Vec<String>,
    /// Revealed encryption private keys, indexed by key index.
    pub encryption_private_keys: Vec<String>,
    /// Published commitment keys, indexed by key index.
    pub commitment_keys: Vec<String>,
    /// Revealed commitment keys, indexed by key index.
    pub reveal_keys: Vec<String>,
    /// Number of key slots currently published and not yet revealed.
    pub key_index: u32,
    /// Final results, once ingested.
    pub results: Option<ProcessResult>,
}

impl Process {
    /// Creates a process record with empty key slots and no results.
    pub fn new(process_id: Vec<u8>, entity_id: Vec<u8>) -> Self {
        let empty_slots = || vec![String::new(); MAX_PROCESS_KEYS];
        Self {
            process_id,
            entity_id,
            census_root: Vec::new(),
            census_uri: String::new(),
            start_block: 0,
            block_count: 0,
            status: ProcessStatus::Ready,
            max_count: 0,
            max_value: 0,
            encryption_public_keys: empty_slots(),
            encryption_private_keys: empty_slots(),
            commitment_keys: empty_slots(),
            reveal_keys: empty_slots(),
            key_index: 0,
            results: None,
        }
    }
}

/// Aggregated results of a process: one tally vector per question.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default, Encode, Decode)]
pub struct ProcessResult {
    /// For each question, the accumulated count per option.
    pub votes: Vec<Vec<u64>>,
}

/// The tree-resident wrapper for a process: the record itself plus the
/// projected root of its per-process vote tree. The census root lives
/// inside the process record; both are re-injected by the state layer so
/// the main root authenticates them transitively.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct StateDbProcess {
    /// The process definition.
    pub process: Process,
    /// Root of the per-process vote tree.
    pub votes_root: Hash32,
}

impl StateDbProcess {
    /// Wraps a freshly added process; its vote tree starts empty.
    pub fn new(process: Process) -> Self {
        Self {
            process,
            votes_root: EMPTY_HASH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn statedb_process_roundtrip() {
        let mut p = Process::new(vec![0xAA; 32], vec![0xBB; 20]);
        p.max_count = 16;
        p.max_value = 16;
        let rec = StateDbProcess::new(p);
        let bytes = codec::to_bytes_canonical(&rec);
        let back: StateDbProcess = codec::from_bytes_canonical(&bytes).unwrap();
        assert_eq!(rec, back);
        assert_eq!(back.votes_root, EMPTY_HASH);
    }

    #[test]
    fn key_slots_are_preallocated() {
        let p = Process::new(vec![1; 32], vec![2; 20]);
        assert_eq!(p.commitment_keys.len(), MAX_PROCESS_KEYS);
        assert_eq!(p.key_index, 0);
    }
}
