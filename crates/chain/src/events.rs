// Path: crates/chain/src/events.rs

//! Block-lifecycle event listeners.
//!
//! Listeners receive method calls synchronously, in registration order,
//! during block processing. The sequence over a block is: `rollback` (if
//! the block is aborted), the per-operation callbacks as operations are
//! applied, then `commit` once the block is saved. The process is not
//! re-entrant: there is never more than one block in flight.

use tally_types::error::StateError;
use tally_types::{ProcessResult, ProcessStatus, Vote};

/// Receives custom callbacks during the events of the block creation
/// process.
///
/// If `commit` returns the halt sentinel ([`StateError::Halt`]), the
/// error is treated as a consensus failure and block processing stops.
///
/// If `on_process_results` returns an error, the results are not ingested
/// by that listener; the decision is delegated to the listener because the
/// chain state does not validate results itself.
pub trait EventListener: Send + Sync {
    /// A vote was added to a process.
    fn on_vote(&self, _vote: &Vote, _tx_index: i32) {}

    /// A transaction was applied to the pending block.
    fn on_new_tx(&self, _block_height: u32, _tx_index: i32) {}

    /// A process was created.
    fn on_process(
        &self,
        _pid: &[u8],
        _entity_id: &[u8],
        _census_root: &str,
        _census_uri: &str,
        _tx_index: i32,
    ) {
    }

    /// A process changed status.
    fn on_process_status_change(&self, _pid: &[u8], _status: ProcessStatus, _tx_index: i32) {}

    /// A process was canceled.
    fn on_cancel(&self, _pid: &[u8], _tx_index: i32) {}

    /// Key material was published for a process.
    fn on_process_keys(&self, _pid: &[u8], _encryption_pub: &str, _commitment: &str, _tx_index: i32) {
    }

    /// Key material was revealed for a process.
    fn on_reveal_keys(&self, _pid: &[u8], _encryption_priv: &str, _reveal: &str, _tx_index: i32) {}

    /// Results were submitted for a process. An error blocks ingestion
    /// for this listener only; the state itself is not rolled back.
    fn on_process_results(
        &self,
        _pid: &[u8],
        _results: &ProcessResult,
        _tx_index: i32,
    ) -> Result<(), StateError> {
        Ok(())
    }

    /// The block was committed at `height`. Returning
    /// [`StateError::Halt`] aborts further processing and surfaces to the
    /// block-commit caller.
    fn commit(&self, _height: u32) -> Result<(), StateError> {
        Ok(())
    }

    /// The pending block was discarded.
    fn rollback(&self) {}
}
