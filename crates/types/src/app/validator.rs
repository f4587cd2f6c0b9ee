// Path: crates/types/src/app/validator.rs
//! Validator records stored in the `valids` sub-tree.

use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// A consensus validator. Keyed in its sub-tree by `address`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Validator {
    /// 20-byte address, the sub-tree key.
    pub address: Vec<u8>,
    /// Consensus public key.
    pub pub_key: Vec<u8>,
    /// Voting power.
    pub power: u64,
    /// Optional human-readable name.
    pub name: String,
}
