// Path: crates/chain/src/lib.rs
//! Domain-level state for the voting chain.
//!
//! [`State`] is the typed façade consensus talks to: it maps oracle,
//! validator, process and vote operations onto the authenticated state
//! store, publishes an immutable snapshot per committed block for
//! concurrent read queries, and fans block-lifecycle events out to
//! registered listeners.

pub mod events;
pub mod state;
pub mod treecfg;

pub use events::EventListener;
pub use state::{State, VOTE_CACHE_SIZE};
pub use treecfg::{
    CENSUS_CFG, CENSUS_POSEIDON_CFG, ORACLES_CFG, PROCESSES_CFG, VALIDATORS_CFG, VOTES_CFG,
};
