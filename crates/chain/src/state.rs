// Path: crates/chain/src/state.rs

//! The typed state façade used by the consensus collaborator.

use crate::events::EventListener;
use crate::treecfg::{
    CENSUS_CFG, CENSUS_POSEIDON_CFG, ORACLES_CFG, PROCESSES_CFG, VALIDATORS_CFG, VOTES_CFG,
};
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tally_statedb::{StateDb, TreeConfig, TreeTx, TreeView, TreeViewer};
use tally_types::codec;
use tally_types::error::StateError;
use tally_types::ids::{
    ADDRESS_SIZE, EMPTY_HASH, MAX_PROCESS_KEYS, PROCESS_ID_SIZE, VOTE_NULLIFIER_SIZE,
};
use tally_types::prelude::OptionExt;
use tally_types::{
    AdminKeysUpdate, BlockHeader, Hash32, Process, ProcessResult, ProcessStatus, StateDbProcess,
    Validator, Vote,
};
use tracing::{debug, info, warn};

/// Capacity of the advisory vote-id LRU.
pub const VOTE_CACHE_SIZE: usize = 50_000;

/// Main-tree key of the committed block header.
const HEADER_KEY: &[u8] = b"header";

/// The canonical chain state.
///
/// One writer at a time populates the pending block through the typed
/// mutations; concurrent readers query the last committed snapshot. The
/// snapshot is published through an atomic-swap cell: readers clone the
/// `Arc` and keep using their copy for the whole query, immune to later
/// saves.
pub struct State {
    store: StateDb,
    tx: RwLock<Option<TreeTx>>,
    main_view: RwLock<Arc<TreeView>>,
    vote_cache: Mutex<LruCache<Vec<u8>, ()>>,
    listeners: Vec<Arc<dyn EventListener>>,
    tx_counter: AtomicI32,
    height: AtomicU32,
}

impl State {
    /// Opens (or initializes) the state under `data_dir`.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self, StateError> {
        let store = StateDb::open(data_dir)?;
        if store.version()? == 0 {
            Self::init_state_db(&store)?;
        }
        let version = store.version()?;
        let root = store.hash()?;
        info!(
            version,
            root = %hex::encode(root),
            "state database is ready"
        );
        let tx = store.begin_tx()?;
        let main_view = Arc::new(store.tree_view(None)?);

        let state = Self {
            store,
            tx: RwLock::new(Some(tx)),
            main_view: RwLock::new(main_view),
            vote_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(VOTE_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            )),
            listeners: Vec::new(),
            tx_counter: AtomicI32::new(0),
            height: AtomicU32::new(0),
        };
        // Resume the height of the last committed block.
        let height = state.header(false)?.height;
        state.height.store(height, Ordering::SeqCst);
        Ok(state)
    }

    /// First-open initialization: zeroed roots for each well-known
    /// sub-tree and an empty header.
    fn init_state_db(store: &StateDb) -> Result<(), StateError> {
        info!("initializing state trees");
        let mut tx = store.begin_tx()?;
        for cfg in [&ORACLES_CFG, &VALIDATORS_CFG, &PROCESSES_CFG] {
            tx.add(cfg.name().as_bytes(), &EMPTY_HASH)?;
        }
        tx.add(
            HEADER_KEY,
            &codec::to_bytes_canonical(&BlockHeader::genesis()),
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Registers a listener to receive block-event callbacks. Listeners
    /// are registered once, before block processing starts.
    pub fn add_event_listener(&mut self, listener: Arc<dyn EventListener>) {
        self.listeners.push(listener);
    }

    fn with_tx_mut<T>(
        &self,
        f: impl FnOnce(&mut TreeTx) -> Result<T, StateError>,
    ) -> Result<T, StateError> {
        let mut guard = self.tx.write().unwrap();
        let tx = guard
            .as_mut()
            .ok_or_else(|| StateError::Corrupted("write transaction not open".into()))?;
        f(tx)
    }

    /// Runs `f` against the pending transaction view (`is_query` false)
    /// or the last committed snapshot (`is_query` true).
    fn with_main_viewer<T>(
        &self,
        is_query: bool,
        f: impl FnOnce(&dyn TreeViewer) -> Result<T, StateError>,
    ) -> Result<T, StateError> {
        if is_query {
            let view = self.main_view.read().unwrap().clone();
            f(view.as_ref())
        } else {
            let guard = self.tx.read().unwrap();
            let tx = guard
                .as_ref()
                .ok_or_else(|| StateError::Corrupted("write transaction not open".into()))?;
            f(&tx.as_view())
        }
    }

    // --- Oracles -------------------------------------------------------

    /// Adds a trusted oracle by address.
    pub fn add_oracle(&self, address: &[u8]) -> Result<(), StateError> {
        check_size("address", address, ADDRESS_SIZE)?;
        self.with_tx_mut(|tx| tx.deep_set(&[ORACLES_CFG.clone()], address, &[1]))
    }

    /// Removes a trusted oracle; the entry stays as a tombstone.
    pub fn remove_oracle(&self, address: &[u8]) -> Result<(), StateError> {
        check_size("address", address, ADDRESS_SIZE)?;
        self.with_tx_mut(|tx| {
            let path = [ORACLES_CFG.clone()];
            if tx.deep_get(&path, address)?.is_none() {
                return Err(StateError::NotFound);
            }
            tx.deep_set(&path, address, &[])
        })
    }

    /// The current oracle list. Tombstoned entries are skipped.
    pub fn oracles(&self, is_query: bool) -> Result<Vec<Vec<u8>>, StateError> {
        self.with_main_viewer(is_query, |viewer| {
            let sub = viewer.subtree(&ORACLES_CFG)?;
            let mut oracles = Vec::new();
            for entry in sub.iter() {
                let (key, value) = entry?;
                if value.is_empty() {
                    continue;
                }
                oracles.push(key);
            }
            Ok(oracles)
        })
    }

    // --- Validators ----------------------------------------------------

    /// Adds (or replaces) a validator, keyed by its address.
    pub fn add_validator(&self, validator: &Validator) -> Result<(), StateError> {
        check_size("address", &validator.address, ADDRESS_SIZE)?;
        let bytes = codec::to_bytes_canonical(validator);
        self.with_tx_mut(|tx| tx.deep_set(&[VALIDATORS_CFG.clone()], &validator.address, &bytes))
    }

    /// Removes a validator; the entry stays as a tombstone.
    pub fn remove_validator(&self, address: &[u8]) -> Result<(), StateError> {
        check_size("address", address, ADDRESS_SIZE)?;
        self.with_tx_mut(|tx| {
            let path = [VALIDATORS_CFG.clone()];
            if tx.deep_get(&path, address)?.is_none() {
                return Err(StateError::NotFound);
            }
            tx.deep_set(&path, address, &[])
        })
    }

    /// The current validator set. Tombstoned entries are skipped.
    pub fn validators(&self, is_query: bool) -> Result<Vec<Validator>, StateError> {
        self.with_main_viewer(is_query, |viewer| {
            let sub = viewer.subtree(&VALIDATORS_CFG)?;
            let mut validators = Vec::new();
            for entry in sub.iter() {
                let (_, value) = entry?;
                if value.is_empty() {
                    continue;
                }
                validators.push(codec::from_bytes_canonical(&value).map_err(StateError::Corrupted)?);
            }
            Ok(validators)
        })
    }

    // --- Processes -----------------------------------------------------

    /// Creates a new process. Its vote tree starts empty.
    pub fn add_process(&self, process: &Process) -> Result<(), StateError> {
        check_size("process id", &process.process_id, PROCESS_ID_SIZE)?;
        let record = StateDbProcess::new(process.clone());
        let bytes = codec::to_bytes_canonical(&record);
        self.with_tx_mut(|tx| {
            tx.deep_add(&[PROCESSES_CFG.clone()], &process.process_id, &bytes)
        })?;
        for l in &self.listeners {
            l.on_process(
                &process.process_id,
                &process.entity_id,
                &hex::encode(&process.census_root),
                &process.census_uri,
                self.tx_counter(),
            );
        }
        Ok(())
    }

    /// Replaces the process definition, preserving the stored votes root.
    pub fn update_process(&self, process: &Process, pid: &[u8]) -> Result<(), StateError> {
        check_size("process id", pid, PROCESS_ID_SIZE)?;
        self.with_tx_mut(|tx| {
            let path = [PROCESSES_CFG.clone()];
            let stored = tx
                .deep_get(&path, pid)?
                .required(StateError::ProcessNotFound)?;
            let mut record: StateDbProcess =
                codec::from_bytes_canonical(&stored).map_err(StateError::Corrupted)?;
            record.process = process.clone();
            tx.deep_set(&path, pid, &codec::to_bytes_canonical(&record))
        })
    }

    /// The process definition, by id.
    pub fn process(&self, pid: &[u8], is_query: bool) -> Result<Process, StateError> {
        Ok(self.process_record(pid, is_query)?.process)
    }

    /// The full tree-resident process record, including the projected
    /// votes root. Collaborators (e.g. the indexer) use it to follow
    /// per-process tree advancement.
    pub fn process_record(&self, pid: &[u8], is_query: bool) -> Result<StateDbProcess, StateError> {
        check_size("process id", pid, PROCESS_ID_SIZE)?;
        self.with_main_viewer(is_query, |viewer| {
            let sub = viewer.subtree(&PROCESSES_CFG)?;
            let stored = sub.get(pid)?.required(StateError::ProcessNotFound)?;
            codec::from_bytes_canonical(&stored).map_err(StateError::Corrupted)
        })
    }

    /// Cancels a process.
    pub fn cancel_process(&self, pid: &[u8]) -> Result<(), StateError> {
        let mut process = self.process(pid, false)?;
        process.status = ProcessStatus::Canceled;
        self.update_process(&process, pid)?;
        for l in &self.listeners {
            l.on_cancel(pid, self.tx_counter());
        }
        Ok(())
    }

    /// Updates a process's lifecycle status.
    pub fn set_process_status(
        &self,
        pid: &[u8],
        status: ProcessStatus,
    ) -> Result<(), StateError> {
        let mut process = self.process(pid, false)?;
        process.status = status;
        self.update_process(&process, pid)?;
        for l in &self.listeners {
            l.on_process_status_change(pid, status, self.tx_counter());
        }
        Ok(())
    }

    /// Stores the submitted results and offers them to every listener.
    /// A listener error blocks ingestion for that listener only.
    pub fn set_process_results(
        &self,
        pid: &[u8],
        results: &ProcessResult,
    ) -> Result<(), StateError> {
        let mut process = self.process(pid, false)?;
        process.results = Some(results.clone());
        self.update_process(&process, pid)?;
        for l in &self.listeners {
            if let Err(e) = l.on_process_results(pid, results, self.tx_counter()) {
                warn!(pid = %hex::encode(pid), "listener rejected process results: {}", e);
            }
        }
        Ok(())
    }

    // --- Process keys --------------------------------------------------

    /// Publishes commitment or encryption key material for a process and
    /// bumps its key index.
    pub fn add_process_keys(&self, tx: &AdminKeysUpdate) -> Result<(), StateError> {
        let (pid, key_index) = keys_update_target(tx)?;
        let mut process = self.process(pid, false)?;
        ensure_key_slots(&mut process);
        let slot = key_slot(key_index)?;
        if let Some(commitment_key) = &tx.commitment_key {
            process.commitment_keys[slot] = hex::encode(commitment_key);
            debug!(
                key_index,
                pid = %hex::encode(pid),
                "added commitment key"
            );
        }
        if let Some(encryption_key) = &tx.encryption_public_key {
            process.encryption_public_keys[slot] = hex::encode(encryption_key);
            debug!(
                key_index,
                pid = %hex::encode(pid),
                "added encryption key"
            );
        }
        process.key_index += 1;
        self.update_process(&process, pid)?;
        let encryption = hex_or_empty(&tx.encryption_public_key);
        let commitment = hex_or_empty(&tx.commitment_key);
        for l in &self.listeners {
            l.on_process_keys(pid, &encryption, &commitment, self.tx_counter());
        }
        Ok(())
    }

    /// Reveals previously published key material and decrements the key
    /// index. Fails when the process has no keys to reveal.
    pub fn reveal_process_keys(&self, tx: &AdminKeysUpdate) -> Result<(), StateError> {
        let (pid, key_index) = keys_update_target(tx)?;
        let mut process = self.process(pid, false)?;
        if process.key_index < 1 {
            return Err(StateError::NoKeysToReveal);
        }
        ensure_key_slots(&mut process);
        let slot = key_slot(key_index)?;
        if let Some(reveal_key) = &tx.reveal_key {
            process.reveal_keys[slot] = hex::encode(reveal_key);
            debug!(
                key_index,
                pid = %hex::encode(pid),
                "revealed commitment key"
            );
        }
        if let Some(encryption_key) = &tx.encryption_private_key {
            process.encryption_private_keys[slot] = hex::encode(encryption_key);
            debug!(
                key_index,
                pid = %hex::encode(pid),
                "revealed encryption key"
            );
        }
        process.key_index -= 1;
        self.update_process(&process, pid)?;
        let encryption = hex_or_empty(&tx.encryption_private_key);
        let reveal = hex_or_empty(&tx.reveal_key);
        for l in &self.listeners {
            l.on_reveal_keys(pid, &encryption, &reveal, self.tx_counter());
        }
        Ok(())
    }

    // --- Census --------------------------------------------------------

    /// Registers a claim in a process's anchored census. The new census
    /// root is injected into the process record, so the main root
    /// authenticates it transitively. Only censuses that grow on-chain
    /// (the process starts with an empty census root) can be extended.
    pub fn add_census_claim(
        &self,
        pid: &[u8],
        key: &[u8],
        value: &[u8],
    ) -> Result<(), StateError> {
        check_size("process id", pid, PROCESS_ID_SIZE)?;
        self.with_tx_mut(|tx| {
            tx.deep_add(
                &[PROCESSES_CFG.clone(), CENSUS_CFG.with_key(pid)],
                key,
                value,
            )
            .map_err(not_found_as_process)
        })
    }

    /// Registers a claim in a process's zk census (Poseidon hashes,
    /// 64-bit keys).
    pub fn add_census_claim_zk(
        &self,
        pid: &[u8],
        key: &[u8],
        value: &[u8],
    ) -> Result<(), StateError> {
        check_size("process id", pid, PROCESS_ID_SIZE)?;
        self.with_tx_mut(|tx| {
            tx.deep_add(
                &[PROCESSES_CFG.clone(), CENSUS_POSEIDON_CFG.with_key(pid)],
                key,
                value,
            )
            .map_err(not_found_as_process)
        })
    }

    /// The census root of a process, as recorded in its process leaf.
    pub fn census_root(&self, pid: &[u8], is_query: bool) -> Result<Vec<u8>, StateError> {
        Ok(self.process_record(pid, is_query)?.process.census_root)
    }

    // --- Votes ---------------------------------------------------------

    /// Adds a vote to its process's vote tree. The stored value is the
    /// hash of the canonical vote encoding; re-adding the same
    /// `(process, nullifier)` pair fails with `AlreadyExists`.
    pub fn add_vote(&self, vote: &Vote) -> Result<(), StateError> {
        let vid = vote_id(&vote.process_id, &vote.nullifier)?;
        // Advisory fast path; the tree below remains authoritative. The
        // cache only ever holds ids that were committed into the pending
        // block, and is dropped wholesale on rollback.
        if self.vote_cache.lock().unwrap().contains(&vid) {
            return Err(StateError::AlreadyExists);
        }
        let mut vote = vote.clone();
        vote.height = self.height();
        let vote_hash: Vec<u8> =
            Sha256::digest(codec::to_bytes_canonical(&vote)).to_vec();
        self.with_tx_mut(|tx| {
            tx.deep_add(&votes_path(&vote.process_id), &vid, &vote_hash)
                .map_err(not_found_as_process)
        })?;
        self.vote_cache.lock().unwrap().put(vid, ());
        for l in &self.listeners {
            l.on_vote(&vote, self.tx_counter());
        }
        Ok(())
    }

    /// The stored hash of a vote envelope, if present.
    pub fn envelope(
        &self,
        process_id: &[u8],
        nullifier: &[u8],
        is_query: bool,
    ) -> Result<Vec<u8>, StateError> {
        let vid = vote_id(process_id, nullifier)?;
        self.with_main_viewer(is_query, |viewer| {
            let sub = viewer
                .deep_subtree(&votes_path(process_id))
                .map_err(not_found_as_process)?;
            sub.get(&vid)?.required(StateError::VoteNotFound)
        })
    }

    /// Whether the envelope identified by `(process, nullifier)` exists.
    pub fn envelope_exists(
        &self,
        process_id: &[u8],
        nullifier: &[u8],
        is_query: bool,
    ) -> Result<bool, StateError> {
        match self.envelope(process_id, nullifier, is_query) {
            Ok(_) => Ok(true),
            Err(StateError::VoteNotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Number of votes registered for a process.
    pub fn count_votes(&self, process_id: &[u8], is_query: bool) -> Result<u32, StateError> {
        check_size("process id", process_id, PROCESS_ID_SIZE)?;
        self.with_main_viewer(is_query, |viewer| {
            let sub = viewer
                .deep_subtree(&votes_path(process_id))
                .map_err(not_found_as_process)?;
            Ok(sub.size()? as u32)
        })
    }

    /// Nullifiers of the registered envelopes of a process, for indices
    /// `[from, from + list_size)` in ascending vote-id order.
    pub fn envelope_list(
        &self,
        process_id: &[u8],
        from: usize,
        list_size: usize,
        is_query: bool,
    ) -> Result<Vec<Vec<u8>>, StateError> {
        check_size("process id", process_id, PROCESS_ID_SIZE)?;
        self.with_main_viewer(is_query, |viewer| {
            let sub = viewer
                .deep_subtree(&votes_path(process_id))
                .map_err(not_found_as_process)?;
            let mut nullifiers = Vec::new();
            let mut idx = 0usize;
            for entry in sub.iter() {
                let (key, value) = entry?;
                if value.is_empty() {
                    continue;
                }
                if idx >= from + list_size {
                    break;
                }
                if idx >= from {
                    nullifiers.push(key.get(PROCESS_ID_SIZE..).unwrap_or_default().to_vec());
                }
                idx += 1;
            }
            Ok(nullifiers)
        })
    }

    // --- Header & block lifecycle --------------------------------------

    /// The last committed block header (or the pending one when
    /// `is_query` is false and the block already wrote it).
    pub fn header(&self, is_query: bool) -> Result<BlockHeader, StateError> {
        self.with_main_viewer(is_query, |viewer| {
            let bytes = viewer
                .get(HEADER_KEY)?
                .required(StateError::Corrupted("missing block header".into()))?;
            codec::from_bytes_canonical(&bytes).map_err(StateError::Corrupted)
        })
    }

    /// Writes the pending block's header.
    pub fn set_header(&self, header: &BlockHeader) -> Result<(), StateError> {
        let bytes = codec::to_bytes_canonical(header);
        self.with_tx_mut(|tx| tx.set(HEADER_KEY, &bytes))
    }

    /// Main-tree root over the pending state.
    pub fn working_hash(&self) -> Result<Hash32, StateError> {
        let guard = self.tx.read().unwrap();
        let tx = guard
            .as_ref()
            .ok_or_else(|| StateError::Corrupted("write transaction not open".into()))?;
        Ok(tx.root())
    }

    /// Commits the pending block: applies the transaction atomically,
    /// opens a fresh one, publishes the new snapshot, advances the
    /// height, and fires `commit` on every listener. A listener halt
    /// aborts processing and surfaces; other listener errors are logged.
    /// Returns the committed main root.
    pub fn save(&self) -> Result<Hash32, StateError> {
        let root = {
            let mut guard = self.tx.write().unwrap();
            let tx = guard
                .take()
                .ok_or_else(|| StateError::Corrupted("write transaction not open".into()))?;
            let commit_result = tx.commit();
            // Reopen over whatever version is now current, so the state
            // stays usable whether or not the commit landed.
            *guard = Some(self.store.begin_tx()?);
            let (_, root) = commit_result?;
            root
        };

        let view = Arc::new(self.store.tree_view(None)?);
        *self.main_view.write().unwrap() = view;

        let height = self.header(false)?.height;
        self.height.store(height, Ordering::SeqCst);
        for l in &self.listeners {
            if let Err(e) = l.commit(height) {
                if e.is_halt() {
                    return Err(e);
                }
                warn!("event callback error on commit: {}", e);
            }
        }
        Ok(root)
    }

    /// Discards the pending block and reverts to the last committed
    /// version. Infallible from the caller's perspective; failure to
    /// reopen the write transaction is fatal, since later writes would
    /// otherwise be silently dropped.
    pub fn rollback(&self) {
        for l in &self.listeners {
            l.rollback();
        }
        let mut guard = self.tx.write().unwrap();
        if let Some(tx) = guard.take() {
            tx.discard();
        }
        match self.store.begin_tx() {
            Ok(tx) => *guard = Some(tx),
            Err(e) => panic!("cannot reopen state transaction after rollback: {}", e),
        }
        self.tx_counter.store(0, Ordering::SeqCst);
        self.vote_cache.lock().unwrap().clear();
    }

    /// Height of the last committed block.
    pub fn height(&self) -> u32 {
        self.height.load(Ordering::SeqCst)
    }

    /// Number of transactions applied to the pending block.
    pub fn tx_counter(&self) -> i32 {
        self.tx_counter.load(Ordering::SeqCst)
    }

    /// Counts an applied transaction and notifies listeners.
    pub fn tx_counter_add(&self) {
        let index = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        for l in &self.listeners {
            l.on_new_tx(self.height(), index);
        }
    }
}

fn votes_path(process_id: &[u8]) -> [TreeConfig; 2] {
    [PROCESSES_CFG.clone(), VOTES_CFG.with_key(process_id)]
}

/// `vote_id = process_id ‖ nullifier`, sizes enforced exactly.
fn vote_id(process_id: &[u8], nullifier: &[u8]) -> Result<Vec<u8>, StateError> {
    check_size("process id", process_id, PROCESS_ID_SIZE)?;
    check_size("nullifier", nullifier, VOTE_NULLIFIER_SIZE)?;
    Ok([process_id, nullifier].concat())
}

fn check_size(what: &str, bytes: &[u8], expected: usize) -> Result<(), StateError> {
    if bytes.len() != expected {
        return Err(StateError::InvalidArgument(format!(
            "wrong {} size {}, expected {}",
            what,
            bytes.len(),
            expected
        )));
    }
    Ok(())
}

fn keys_update_target(tx: &AdminKeysUpdate) -> Result<(&[u8], u32), StateError> {
    let key_index = tx.key_index.ok_or_else(|| {
        StateError::InvalidArgument("no process id or key index provided".into())
    })?;
    if tx.process_id.is_empty() {
        return Err(StateError::InvalidArgument(
            "no process id or key index provided".into(),
        ));
    }
    Ok((&tx.process_id, key_index))
}

fn key_slot(key_index: u32) -> Result<usize, StateError> {
    let slot = key_index as usize;
    if slot >= MAX_PROCESS_KEYS {
        return Err(StateError::InvalidArgument(format!(
            "key index {} out of range",
            key_index
        )));
    }
    Ok(slot)
}

/// Decoded records may carry fewer key slots than the engine writes;
/// normalize before indexed assignment.
fn ensure_key_slots(process: &mut Process) {
    for slots in [
        &mut process.encryption_public_keys,
        &mut process.encryption_private_keys,
        &mut process.commitment_keys,
        &mut process.reveal_keys,
    ] {
        if slots.len() < MAX_PROCESS_KEYS {
            slots.resize(MAX_PROCESS_KEYS, String::new());
        }
    }
}

fn hex_or_empty(bytes: &Option<Vec<u8>>) -> String {
    bytes.as_ref().map(hex::encode).unwrap_or_default()
}

/// Vote-tree descents report a missing process leaf as `NotFound`; at the
/// façade level that means the process itself does not exist.
fn not_found_as_process(err: StateError) -> StateError {
    match err {
        StateError::NotFound => StateError::ProcessNotFound,
        other => other,
    }
}
