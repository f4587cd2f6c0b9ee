// Path: crates/types/src/codec.rs
//! The canonical, deterministic binary codec for all tree-resident state.
//!
//! Thin wrappers around `parity-scale-codec` (SCALE). Every record that
//! lands in an authenticated tree goes through these two functions, so
//! equal structures always produce identical bytes and therefore identical
//! tree roots.

use parity_scale_codec::{Decode, DecodeAll, Encode};

/// Encodes a value into its canonical byte representation.
pub fn to_bytes_canonical<T: Encode>(v: &T) -> Vec<u8> {
    v.encode()
}

/// Decodes a value from its canonical byte representation, rejecting
/// trailing bytes. Fails fast with a descriptive message so malformed
/// state never propagates silently.
pub fn from_bytes_canonical<T: Decode>(b: &[u8]) -> Result<T, String> {
    T::decode_all(&mut &*b).map_err(|e| format!("canonical decode failed: {}", e))
}
