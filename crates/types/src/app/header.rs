// Path: crates/types/src/app/header.rs
//! The block header stored in the main tree.

use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// The committed block header, stored under the main tree's `header` key.
/// The consensus collaborator writes it once per block before saving.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default, Encode, Decode)]
pub struct BlockHeader {
    /// Committed block height.
    pub height: u32,
    /// Application hash carried by the block.
    pub app_hash: Vec<u8>,
    /// Chain identifier.
    pub chain_id: String,
    /// Block timestamp, seconds since the epoch.
    pub timestamp: i64,
}

impl BlockHeader {
    /// The header a freshly initialized state starts from.
    pub fn genesis() -> Self {
        Self {
            height: 0,
            app_hash: Vec::new(),
            chain_id: "empty".into(),
            timestamp: 0,
        }
    }
}
