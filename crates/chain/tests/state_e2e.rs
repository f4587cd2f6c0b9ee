// Path: crates/chain/tests/state_e2e.rs

//! End-to-end scenarios over the chain state: block lifecycle, nested
//! tree propagation, event dispatch and the concurrency surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tally_chain::{EventListener, State};
use tally_types::error::StateError;
use tally_types::ids::EMPTY_HASH;
use tally_types::{AdminKeysUpdate, BlockHeader, Process, ProcessResult, Validator, Vote};

fn hexv(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap()
}

fn oracle_a() -> Vec<u8> {
    hexv("0fa7a3a02a5d9589421ab973c1b21a135bd16a3a")
}

fn oracle_b() -> Vec<u8> {
    hexv("1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e")
}

fn process_id() -> Vec<u8> {
    hexv("e9d5e8d791f51179d218c486b9d9a4ea1839f20a9d74c0b6c48b5f762c1d5105")
}

fn entity_id() -> Vec<u8> {
    hexv("180dd5765d9f7ecef810b565a2e5bd14a3ccd536")
}

fn census_root() -> Vec<u8> {
    hexv("0a975f5cf517fc40ea8bd1f9a22612bde71349a6b1a025a718c0ea89419852fe")
}

fn nullifier_1() -> Vec<u8> {
    hexv("5592f1c18e2a26266e20ce1b326dbee4871e7f13e0064ce5d1eedf64914cc6c0")
}

fn nullifier_2() -> Vec<u8> {
    hexv("66a3f1c18e2a26266e20ce1b326dbee4871e7f13e0064ce5d1eedf64914cc6c1")
}

fn header(height: u32) -> BlockHeader {
    BlockHeader {
        height,
        app_hash: Vec::new(),
        chain_id: "test".into(),
        timestamp: 1_600_000_000 + height as i64,
    }
}

fn test_process() -> Process {
    let mut p = Process::new(process_id(), entity_id());
    p.census_root = census_root();
    p.census_uri = "ipfs://test-census".into();
    p.max_count = 16;
    p.max_value = 16;
    p
}

fn test_vote(nullifier: Vec<u8>) -> Vote {
    Vote {
        process_id: process_id(),
        nullifier,
        height: 0,
        vote_package: b"ballot-package".to_vec(),
        encryption_key_indexes: Vec::new(),
    }
}

fn open_state() -> (tempfile::TempDir, State) {
    let dir = tempfile::tempdir().unwrap();
    let state = State::new(dir.path()).unwrap();
    (dir, state)
}

fn save_at(state: &State, height: u32) -> [u8; 32] {
    state.set_header(&header(height)).unwrap();
    state.save().unwrap()
}

// --- Scenarios -----------------------------------------------------------

#[test]
fn s1_oracle_add_remove_across_blocks() {
    let (_dir, state) = open_state();

    state.add_oracle(&oracle_a()).unwrap();
    let root_1 = save_at(&state, 1);
    assert_eq!(state.oracles(true).unwrap(), vec![oracle_a()]);
    assert_eq!(state.height(), 1);

    state.remove_oracle(&oracle_a()).unwrap();
    let root_2 = save_at(&state, 2);
    assert!(state.oracles(true).unwrap().is_empty());
    assert_eq!(state.height(), 2);

    assert_ne!(root_1, root_2);
}

#[test]
fn s2_process_and_vote() {
    let (_dir, state) = open_state();

    state.add_process(&test_process()).unwrap();
    save_at(&state, 1);

    state.add_vote(&test_vote(nullifier_1())).unwrap();
    assert_eq!(state.count_votes(&process_id(), false).unwrap(), 1);
    // The committed snapshot does not see the pending vote yet.
    assert!(!state
        .envelope_exists(&process_id(), &nullifier_1(), true)
        .unwrap());

    save_at(&state, 2);
    assert!(state
        .envelope_exists(&process_id(), &nullifier_1(), true)
        .unwrap());
    assert_eq!(state.count_votes(&process_id(), true).unwrap(), 1);

    // The stored envelope value is a 32-byte commitment.
    let envelope = state.envelope(&process_id(), &nullifier_1(), true).unwrap();
    assert_eq!(envelope.len(), 32);
}

#[test]
fn s3_rollback_restores_last_committed_state() {
    let (_dir, state) = open_state();

    state.add_oracle(&oracle_a()).unwrap();
    state.add_oracle(&oracle_b()).unwrap();
    let root_1 = save_at(&state, 1);

    state
        .add_oracle(&hexv("2222222222222222222222222222222222222222"))
        .unwrap();
    assert_ne!(state.working_hash().unwrap(), root_1);
    state.rollback();

    let mut oracles = state.oracles(false).unwrap();
    oracles.sort();
    let mut expected = vec![oracle_a(), oracle_b()];
    expected.sort();
    assert_eq!(oracles, expected);
    assert_eq!(state.working_hash().unwrap(), root_1);
    assert_eq!(state.tx_counter(), 0);
}

#[test]
fn s4_duplicate_vote_is_rejected_and_leaves_the_tree_unchanged() {
    let (dir, state) = open_state();

    state.add_process(&test_process()).unwrap();
    save_at(&state, 1);
    state.add_vote(&test_vote(nullifier_1())).unwrap();
    let root_after_vote = state.working_hash().unwrap();

    // Fast path: the advisory cache already knows the vote id.
    let err = state.add_vote(&test_vote(nullifier_1())).unwrap_err();
    assert!(matches!(err, StateError::AlreadyExists));
    assert_eq!(state.working_hash().unwrap(), root_after_vote);
    assert_eq!(state.count_votes(&process_id(), false).unwrap(), 1);
    save_at(&state, 2);

    // Authoritative path: a fresh process (empty cache) must hit the
    // tree's own uniqueness check.
    drop(state);
    let state = State::new(dir.path()).unwrap();
    let root_before = state.working_hash().unwrap();
    let err = state.add_vote(&test_vote(nullifier_1())).unwrap_err();
    assert!(matches!(err, StateError::AlreadyExists));
    assert_eq!(state.working_hash().unwrap(), root_before);
    assert_eq!(state.count_votes(&process_id(), true).unwrap(), 1);
}

#[test]
fn s5_vote_root_propagates_into_the_process_leaf_and_main_root() {
    let (_dir, state) = open_state();

    state.add_process(&test_process()).unwrap();
    save_at(&state, 1);
    state.add_vote(&test_vote(nullifier_1())).unwrap();
    let root_0 = save_at(&state, 2);
    let votes_root_0 = state.process_record(&process_id(), true).unwrap().votes_root;

    state.add_vote(&test_vote(nullifier_2())).unwrap();
    let root_1 = save_at(&state, 3);
    let votes_root_1 = state.process_record(&process_id(), true).unwrap().votes_root;

    assert_ne!(root_0, root_1);
    assert_ne!(votes_root_0, votes_root_1);
    assert_ne!(votes_root_0, EMPTY_HASH);
    assert_ne!(votes_root_1, EMPTY_HASH);

    // Both envelopes resolve through the projected root.
    assert!(state
        .envelope_exists(&process_id(), &nullifier_1(), true)
        .unwrap());
    assert!(state
        .envelope_exists(&process_id(), &nullifier_2(), true)
        .unwrap());
    assert_eq!(state.count_votes(&process_id(), true).unwrap(), 2);
}

#[test]
fn census_claims_propagate_into_the_process_record() {
    let (_dir, state) = open_state();

    // An on-chain census starts empty.
    let mut process = test_process();
    process.census_root = Vec::new();
    state.add_process(&process).unwrap();
    save_at(&state, 1);
    assert!(state.census_root(&process_id(), true).unwrap().is_empty());

    let root_before = save_at(&state, 2);
    state
        .add_census_claim(&process_id(), &[0x11; 20], b"claim-1")
        .unwrap();
    let root_after = save_at(&state, 3);

    assert_ne!(root_before, root_after);
    let census_root = state.census_root(&process_id(), true).unwrap();
    assert_eq!(census_root.len(), 32);
    assert_ne!(census_root, EMPTY_HASH.to_vec());

    // The zk census uses 64-bit keys; oversized keys are rejected.
    let mut zk_process = test_process();
    zk_process.process_id = hexv(
        "aaaa5e8d791f51179d218c486b9d9a4ea1839f20a9d74c0b6c48b5f762c1aaaa",
    );
    zk_process.census_root = Vec::new();
    state.add_process(&zk_process).unwrap();
    save_at(&state, 4);
    state
        .add_census_claim_zk(&zk_process.process_id, &[1, 2, 3, 4, 5, 6, 7, 8], b"zk-claim")
        .unwrap();
    assert!(matches!(
        state
            .add_census_claim_zk(&zk_process.process_id, &[0u8; 9], b"too-wide")
            .unwrap_err(),
        StateError::InvalidArgument(_)
    ));
}

#[test]
fn s6_reveal_without_published_keys_fails() {
    let (_dir, state) = open_state();

    state.add_process(&test_process()).unwrap();
    save_at(&state, 1);
    let before = state.process(&process_id(), false).unwrap();
    assert_eq!(before.key_index, 0);

    let reveal = AdminKeysUpdate {
        process_id: process_id(),
        key_index: Some(0),
        reveal_key: Some(vec![7; 32]),
        ..Default::default()
    };
    let err = state.reveal_process_keys(&reveal).unwrap_err();
    assert!(matches!(err, StateError::NoKeysToReveal));
    assert_eq!(state.process(&process_id(), false).unwrap(), before);
}

// --- Properties ----------------------------------------------------------

#[test]
fn identical_mutation_sequences_yield_identical_roots() {
    let (_da, a) = open_state();
    let (_db, b) = open_state();

    for state in [&a, &b] {
        state.add_oracle(&oracle_a()).unwrap();
        state
            .add_validator(&Validator {
                address: oracle_b(),
                pub_key: vec![3; 32],
                power: 10,
                name: "val-1".into(),
            })
            .unwrap();
        state.add_process(&test_process()).unwrap();
    }
    assert_eq!(save_at(&a, 1), save_at(&b, 1));

    for state in [&a, &b] {
        state.add_vote(&test_vote(nullifier_1())).unwrap();
        state.remove_oracle(&oracle_a()).unwrap();
    }
    assert_eq!(save_at(&a, 2), save_at(&b, 2));
}

#[test]
fn uncommitted_writes_are_invisible_to_queries() {
    let (_dir, state) = open_state();
    state.add_oracle(&oracle_a()).unwrap();

    // The writer's view sees it; the committed snapshot does not.
    assert_eq!(state.oracles(false).unwrap(), vec![oracle_a()]);
    assert!(state.oracles(true).unwrap().is_empty());

    save_at(&state, 1);
    assert_eq!(state.oracles(true).unwrap(), vec![oracle_a()]);
}

#[test]
fn vote_id_sizes_are_enforced_exactly() {
    let (_dir, state) = open_state();
    state.add_process(&test_process()).unwrap();
    save_at(&state, 1);

    let mut short_pid = test_vote(nullifier_1());
    short_pid.process_id.truncate(31);
    assert!(matches!(
        state.add_vote(&short_pid).unwrap_err(),
        StateError::InvalidArgument(_)
    ));

    let mut long_nullifier = test_vote(nullifier_1());
    long_nullifier.nullifier.push(0xFF);
    assert!(matches!(
        state.add_vote(&long_nullifier).unwrap_err(),
        StateError::InvalidArgument(_)
    ));

    assert!(matches!(
        state.envelope(&process_id(), &[0u8; 31], false).unwrap_err(),
        StateError::InvalidArgument(_)
    ));
}

#[test]
fn height_is_monotonic_and_follows_the_header() {
    let (_dir, state) = open_state();
    assert_eq!(state.height(), 0);
    let mut last = 0;
    for h in [1u32, 2, 5, 9] {
        save_at(&state, h);
        assert_eq!(state.height(), h);
        assert!(state.height() >= last);
        assert_eq!(state.header(true).unwrap().height, h);
        last = h;
    }
}

#[test]
fn envelope_list_windows_nullifiers_in_order() {
    let (_dir, state) = open_state();
    state.add_process(&test_process()).unwrap();
    save_at(&state, 1);

    let mut nullifiers: Vec<Vec<u8>> = (0u8..5)
        .map(|i| {
            let mut n = vec![i + 1; 32];
            n[31] = i;
            n
        })
        .collect();
    for n in &nullifiers {
        state.add_vote(&test_vote(n.clone())).unwrap();
    }
    save_at(&state, 2);
    // The tree iterates vote ids (pid ‖ nullifier) in ascending order.
    nullifiers.sort();

    let all = state.envelope_list(&process_id(), 0, 10, true).unwrap();
    assert_eq!(all, nullifiers);

    let window = state.envelope_list(&process_id(), 1, 2, true).unwrap();
    assert_eq!(window, nullifiers[1..3].to_vec());

    let empty = state.envelope_list(&process_id(), 5, 2, true).unwrap();
    assert!(empty.is_empty());
}

#[test]
fn validators_roundtrip_and_tombstone() {
    let (_dir, state) = open_state();
    let validator = Validator {
        address: oracle_a(),
        pub_key: vec![1; 32],
        power: 42,
        name: "v".into(),
    };
    state.add_validator(&validator).unwrap();
    save_at(&state, 1);
    assert_eq!(state.validators(true).unwrap(), vec![validator]);

    state.remove_validator(&oracle_a()).unwrap();
    save_at(&state, 2);
    assert!(state.validators(true).unwrap().is_empty());
    assert!(matches!(
        state.remove_validator(&oracle_a()).unwrap_err(),
        StateError::NotFound
    ));
}

#[test]
fn process_key_lifecycle() {
    let (_dir, state) = open_state();
    state.add_process(&test_process()).unwrap();
    save_at(&state, 1);

    let add = AdminKeysUpdate {
        process_id: process_id(),
        key_index: Some(0),
        commitment_key: Some(vec![0xC0; 32]),
        encryption_public_key: Some(vec![0xE0; 32]),
        ..Default::default()
    };
    state.add_process_keys(&add).unwrap();
    let p = state.process(&process_id(), false).unwrap();
    assert_eq!(p.key_index, 1);
    assert_eq!(p.commitment_keys[0], hex::encode(vec![0xC0; 32]));
    assert_eq!(p.encryption_public_keys[0], hex::encode(vec![0xE0; 32]));

    let reveal = AdminKeysUpdate {
        process_id: process_id(),
        key_index: Some(0),
        reveal_key: Some(vec![0xC1; 32]),
        encryption_private_key: Some(vec![0xE1; 32]),
        ..Default::default()
    };
    state.reveal_process_keys(&reveal).unwrap();
    let p = state.process(&process_id(), false).unwrap();
    assert_eq!(p.key_index, 0);
    assert_eq!(p.reveal_keys[0], hex::encode(vec![0xC1; 32]));

    // A second reveal finds nothing left.
    assert!(matches!(
        state.reveal_process_keys(&reveal).unwrap_err(),
        StateError::NoKeysToReveal
    ));
}

#[test]
fn votes_against_unknown_process_fail() {
    let (_dir, state) = open_state();
    let err = state.add_vote(&test_vote(nullifier_1())).unwrap_err();
    assert!(matches!(err, StateError::ProcessNotFound));
    let err = state
        .envelope(&process_id(), &nullifier_1(), false)
        .unwrap_err();
    assert!(matches!(err, StateError::ProcessNotFound));
}

// --- Event listeners -----------------------------------------------------

#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<String>>,
    halt_on_commit: AtomicBool,
    reject_results: AtomicBool,
}

impl RecordingListener {
    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl EventListener for RecordingListener {
    fn on_vote(&self, vote: &Vote, _tx_index: i32) {
        self.record(format!("vote:{}", hex::encode(&vote.nullifier[..4])));
    }

    fn on_new_tx(&self, block_height: u32, tx_index: i32) {
        self.record(format!("tx:{}:{}", block_height, tx_index));
    }

    fn on_process(&self, pid: &[u8], _eid: &[u8], _root: &str, _uri: &str, _tx_index: i32) {
        self.record(format!("process:{}", hex::encode(&pid[..4])));
    }

    fn on_cancel(&self, _pid: &[u8], _tx_index: i32) {
        self.record("cancel");
    }

    fn on_process_keys(&self, _pid: &[u8], _enc: &str, _com: &str, _tx_index: i32) {
        self.record("keys");
    }

    fn on_reveal_keys(&self, _pid: &[u8], _enc: &str, _rev: &str, _tx_index: i32) {
        self.record("reveal");
    }

    fn on_process_results(
        &self,
        _pid: &[u8],
        _results: &ProcessResult,
        _tx_index: i32,
    ) -> Result<(), StateError> {
        self.record("results");
        if self.reject_results.load(Ordering::SeqCst) {
            return Err(StateError::InvalidArgument("bad results".into()));
        }
        Ok(())
    }

    fn commit(&self, height: u32) -> Result<(), StateError> {
        self.record(format!("commit:{}", height));
        if self.halt_on_commit.load(Ordering::SeqCst) {
            return Err(StateError::Halt("listener requested halt".into()));
        }
        Ok(())
    }

    fn rollback(&self) {
        self.record("rollback");
    }
}

#[test]
fn listeners_receive_operation_and_commit_events_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = State::new(dir.path()).unwrap();
    let listener = Arc::new(RecordingListener::default());
    state.add_event_listener(listener.clone());

    state.add_process(&test_process()).unwrap();
    save_at(&state, 1);
    state.add_vote(&test_vote(nullifier_1())).unwrap();
    state.tx_counter_add();
    save_at(&state, 2);

    let events = listener.events();
    let process_tag = format!("process:{}", hex::encode(&process_id()[..4]));
    let vote_tag = format!("vote:{}", hex::encode(&nullifier_1()[..4]));
    assert_eq!(
        events,
        vec![
            process_tag,
            "commit:1".to_string(),
            vote_tag,
            "tx:1:0".to_string(),
            "commit:2".to_string(),
        ]
    );
}

#[test]
fn rollback_notifies_listeners_first() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = State::new(dir.path()).unwrap();
    let listener = Arc::new(RecordingListener::default());
    state.add_event_listener(listener.clone());

    state.add_oracle(&oracle_a()).unwrap();
    state.rollback();
    assert_eq!(listener.events(), vec!["rollback".to_string()]);
    assert!(state.oracles(false).unwrap().is_empty());
}

#[test]
fn listener_halt_surfaces_through_save() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = State::new(dir.path()).unwrap();
    let listener = Arc::new(RecordingListener::default());
    state.add_event_listener(listener.clone());
    listener.halt_on_commit.store(true, Ordering::SeqCst);

    state.add_oracle(&oracle_a()).unwrap();
    state.set_header(&header(1)).unwrap();
    let err = state.save().unwrap_err();
    assert!(err.is_halt());

    // The state itself committed; only block processing stops.
    assert_eq!(state.oracles(true).unwrap(), vec![oracle_a()]);
}

#[test]
fn rejected_results_do_not_roll_back_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = State::new(dir.path()).unwrap();
    let listener = Arc::new(RecordingListener::default());
    state.add_event_listener(listener.clone());
    listener.reject_results.store(true, Ordering::SeqCst);

    state.add_process(&test_process()).unwrap();
    save_at(&state, 1);

    let results = ProcessResult {
        votes: vec![vec![1, 2, 3]],
    };
    state.set_process_results(&process_id(), &results).unwrap();
    assert_eq!(
        state.process(&process_id(), false).unwrap().results,
        Some(results)
    );
    assert!(listener.events().contains(&"results".to_string()));
}

#[test]
fn concurrent_queries_share_the_published_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(State::new(dir.path()).unwrap());
    state.add_oracle(&oracle_a()).unwrap();
    state.set_header(&header(1)).unwrap();
    state.save().unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let state = state.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..50 {
                let oracles = state.oracles(true).unwrap();
                assert!(!oracles.is_empty());
            }
        }));
    }
    // Writer keeps mutating while readers query the snapshot.
    for i in 0u8..20 {
        let mut addr = oracle_b();
        addr[19] = i;
        state.add_oracle(&addr).unwrap();
    }
    for handle in handles {
        handle.join().unwrap();
    }
}
