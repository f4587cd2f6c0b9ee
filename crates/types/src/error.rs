// Path: crates/types/src/error.rs
//! Error types for the storage and state layers.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors surfaced by the key-value backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested key was not found.
    #[error("Key not found in store")]
    NotFound,
    /// Stored bytes failed to decode.
    #[error("Decode error: {0}")]
    Corrupted(String),
    /// An error occurred in the storage engine.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl ErrorCode for StorageError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "STORE_KEY_NOT_FOUND",
            Self::Corrupted(_) => "STORE_DECODE_ERROR",
            Self::Backend(_) => "STORE_BACKEND_ERROR",
        }
    }
}

/// Errors surfaced by the authenticated state engine.
#[derive(Debug, Error)]
pub enum StateError {
    /// The requested key was not found in a tree.
    #[error("Key not found in state")]
    NotFound,
    /// The process referenced by the operation does not exist.
    #[error("Process not found")]
    ProcessNotFound,
    /// The vote envelope referenced by the operation does not exist.
    #[error("Vote does not exist")]
    VoteNotFound,
    /// `add` was called on a key that already holds a live value.
    #[error("Key already exists")]
    AlreadyExists,
    /// A malformed key, value or size was supplied by the caller.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// A nested-tree path or tree configuration is unusable.
    #[error("Invalid tree config: {0}")]
    InvalidConfig(String),
    /// Stored bytes failed to deserialize, or a hash did not line up.
    #[error("Corrupted state: {0}")]
    Corrupted(String),
    /// An error occurred in the key-value backend.
    #[error("State backend error: {0}")]
    Backend(String),
    /// A process has no published keys left to reveal.
    #[error("no keys to reveal, key index is < 1")]
    NoKeysToReveal,
    /// Sentinel returned by an event listener that must stop block
    /// processing; surfaces up to the block-commit caller unchanged.
    #[error("halting chain: {0}")]
    Halt(String),
}

impl StateError {
    /// Whether this error is the fatal halt sentinel.
    pub fn is_halt(&self) -> bool {
        matches!(self, Self::Halt(_))
    }
}

impl ErrorCode for StateError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "STATE_KEY_NOT_FOUND",
            Self::ProcessNotFound => "STATE_PROCESS_NOT_FOUND",
            Self::VoteNotFound => "STATE_VOTE_NOT_FOUND",
            Self::AlreadyExists => "STATE_ALREADY_EXISTS",
            Self::InvalidArgument(_) => "STATE_INVALID_ARGUMENT",
            Self::InvalidConfig(_) => "STATE_INVALID_CONFIG",
            Self::Corrupted(_) => "STATE_CORRUPTED",
            Self::Backend(_) => "STATE_BACKEND_ERROR",
            Self::NoKeysToReveal => "STATE_NO_KEYS_TO_REVEAL",
            Self::Halt(_) => "STATE_HALT",
        }
    }
}

impl From<StorageError> for StateError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => StateError::NotFound,
            StorageError::Corrupted(msg) => StateError::Corrupted(msg),
            StorageError::Backend(msg) => StateError::Backend(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halt_sentinel_is_detectable() {
        let err = StateError::Halt("listener requested shutdown".into());
        assert!(err.is_halt());
        assert!(!StateError::NotFound.is_halt());
        assert_eq!(err.code(), "STATE_HALT");
    }

    #[test]
    fn storage_errors_map_into_state_errors() {
        let err: StateError = StorageError::Backend("disk full".into()).into();
        assert_eq!(err.code(), "STATE_BACKEND_ERROR");
        let err: StateError = StorageError::NotFound.into();
        assert_eq!(err.code(), "STATE_KEY_NOT_FOUND");
    }
}
