// Path: crates/types/src/ids.rs
//! Fixed identifier sizes and digest aliases.
//!
//! All identifiers are opaque byte strings with enforced lengths; the state
//! engine never interprets them beyond equality and ordering.

/// A 32-byte digest, the width of every tree root in the engine.
pub type Hash32 = [u8; 32];

/// The canonical all-zero digest; denotes an empty (but existing) tree.
pub const EMPTY_HASH: Hash32 = [0u8; 32];

/// Size in bytes of a process (election) identifier.
pub const PROCESS_ID_SIZE: usize = 32;

/// Size in bytes of a vote nullifier.
pub const VOTE_NULLIFIER_SIZE: usize = 32;

/// Size in bytes of an oracle or validator address.
pub const ADDRESS_SIZE: usize = 20;

/// Size in bytes of a vote identifier (`process_id ‖ nullifier`).
pub const VOTE_ID_SIZE: usize = PROCESS_ID_SIZE + VOTE_NULLIFIER_SIZE;

/// Number of key slots a process record reserves for encryption and
/// commitment key material.
pub const MAX_PROCESS_KEYS: usize = 16;
