// Path: crates/types/src/app/vote.rs
//! Vote envelopes and the admin payload that rotates process keys.

use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// A vote envelope. The state engine stores only a commitment to this
/// record (the hash of its canonical encoding); the ballot body is held by
/// the indexer collaborator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Vote {
    /// 32-byte identifier of the process voted in.
    pub process_id: Vec<u8>,
    /// 32-byte anti-double-vote tag, unique per (process, voter).
    pub nullifier: Vec<u8>,
    /// Block height at which the vote was applied; stamped by the engine.
    pub height: u32,
    /// The (possibly encrypted) ballot payload.
    pub vote_package: Vec<u8>,
    /// Indexes of the encryption keys used, for encrypted processes.
    pub encryption_key_indexes: Vec<u32>,
}

/// Admin payload adding or revealing process key material.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default, Encode, Decode)]
pub struct AdminKeysUpdate {
    /// Target process.
    pub process_id: Vec<u8>,
    /// Key slot being added or revealed.
    pub key_index: Option<u32>,
    /// Commitment key being published.
    pub commitment_key: Option<Vec<u8>>,
    /// Encryption public key being published.
    pub encryption_public_key: Option<Vec<u8>>,
    /// Commitment key being revealed.
    pub reveal_key: Option<Vec<u8>>,
    /// Encryption private key being revealed.
    pub encryption_private_key: Option<Vec<u8>>,
}
