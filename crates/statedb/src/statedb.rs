// Path: crates/statedb/src/statedb.rs

//! The versioned forest: a main tree plus named sub-trees whose roots are
//! projected into parent leaves.
//!
//! Writes run inside a [`TreeTx`] backed by a copy-on-write overlay; a
//! commit applies the overlay as one atomic batch and advances the
//! version. Reads run against a [`TreeView`] pinned to a committed
//! version; because tree nodes are content-addressed and never deleted,
//! a view stays consistent no matter what later transactions commit.

use crate::config::TreeConfig;
use crate::hasher::TreeHasher;
use crate::tree::{InsertMode, MerkleProof, Tree, TreeIter};
use log::debug;
use std::sync::Arc;
use tally_storage::{KvRead, KvStore, Overlay, RedbStore, WriteBatch};
use tally_types::error::StateError;
use tally_types::ids::{Hash32, EMPTY_HASH};
use tally_types::prelude::OptionExt;

const META_VERSION_KEY: &[u8] = b"m/version";
const META_ROOT_PREFIX: &[u8] = b"m/root/";
const MAIN_NS: &[u8] = b"t/main/";
const MAIN_KEY_BITS: usize = 256;

fn meta_root_key(version: u32) -> Vec<u8> {
    [META_ROOT_PREFIX, version.to_be_bytes().as_slice()].concat()
}

fn main_tree() -> Tree {
    Tree::new(TreeHasher::Sha256, MAIN_KEY_BITS, MAIN_NS.to_vec())
}

fn decode_root(bytes: Vec<u8>) -> Result<Hash32, StateError> {
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| StateError::Corrupted("stored root is not 32 bytes".into()))
}

/// The versioned, hierarchical Merkle-tree store.
pub struct StateDb {
    store: Arc<RedbStore>,
    main: Tree,
}

impl StateDb {
    /// Opens or creates the store inside `dir`. A fresh store starts at
    /// version 0 with an empty main tree; subsequent opens load the
    /// latest committed version.
    pub fn open<P: AsRef<std::path::Path>>(dir: P) -> Result<Self, StateError> {
        let store = Arc::new(RedbStore::open(dir)?);
        let db = Self {
            store,
            main: main_tree(),
        };
        if db.store.get(META_VERSION_KEY)?.is_none() {
            let mut batch = WriteBatch::new();
            batch.put(META_VERSION_KEY.to_vec(), 0u32.to_be_bytes().to_vec());
            batch.put(meta_root_key(0), EMPTY_HASH.to_vec());
            db.store.write(batch)?;
            debug!("initialized empty state database");
        }
        Ok(db)
    }

    /// The latest committed version. Increments by one on every commit.
    pub fn version(&self) -> Result<u32, StateError> {
        let bytes = self
            .store
            .get(META_VERSION_KEY)?
            .required(StateError::Corrupted("missing version marker".into()))?;
        let arr: [u8; 4] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| StateError::Corrupted("malformed version marker".into()))?;
        Ok(u32::from_be_bytes(arr))
    }

    /// Main-tree root at the latest committed version.
    pub fn hash(&self) -> Result<Hash32, StateError> {
        self.root_at(self.version()?)
    }

    fn root_at(&self, version: u32) -> Result<Hash32, StateError> {
        let bytes = self
            .store
            .get(&meta_root_key(version))?
            .required(StateError::NotFound)?;
        decode_root(bytes)
    }

    /// Opens a write transaction over the latest committed version. The
    /// caller is responsible for the single-writer discipline.
    pub fn begin_tx(&self) -> Result<TreeTx, StateError> {
        let version = self.version()?;
        let root = self.root_at(version)?;
        Ok(TreeTx {
            store: self.store.clone(),
            main: self.main.clone(),
            overlay: Overlay::new(self.store.clone()),
            root,
            version,
        })
    }

    /// Opens an immutable view of a committed version (`None` = latest).
    /// The view pins a backend snapshot and never observes later writes.
    pub fn tree_view(&self, version: Option<u32>) -> Result<TreeView, StateError> {
        let version = match version {
            Some(v) => v,
            None => self.version()?,
        };
        let root = self.root_at(version)?;
        let kv: Arc<dyn KvRead> = Arc::new(self.store.snapshot()?);
        Ok(TreeView {
            kv,
            main: self.main.clone(),
            root,
            version,
        })
    }
}

/// One level of a nested-tree descent: the parent tree, its root, and the
/// parent leaf hosting the child root.
struct DescentLevel {
    tree: Tree,
    root: Hash32,
    leaf_key: Vec<u8>,
    leaf_value: Vec<u8>,
}

/// Walks a config path from the main tree down, projecting each child
/// root out of its parent leaf. Returns the traversed levels plus the
/// deepest tree and its root.
fn resolve_path(
    kv: &dyn KvRead,
    main: &Tree,
    main_root: &Hash32,
    path: &[TreeConfig],
) -> Result<(Vec<DescentLevel>, Tree, Hash32), StateError> {
    if path.is_empty() {
        return Err(StateError::InvalidConfig("empty sub-tree path".into()));
    }
    let mut levels = Vec::with_capacity(path.len());
    let mut parent_tree = main.clone();
    let mut parent_root = *main_root;
    for cfg in path {
        let leaf_key = cfg.parent_leaf_key()?;
        let leaf_value = parent_tree
            .get(kv, &parent_root, &leaf_key)?
            .required(StateError::NotFound)?;
        let child_root = cfg.project_root(&leaf_value)?;
        let child_tree = cfg.tree()?;
        levels.push(DescentLevel {
            tree: parent_tree,
            root: parent_root,
            leaf_key,
            leaf_value,
        });
        parent_tree = child_tree;
        parent_root = child_root;
    }
    Ok((levels, parent_tree, parent_root))
}

/// Read-only access to a main tree and its nested sub-trees. Implemented
/// by committed snapshots ([`TreeView`]) and by the writer's pending view
/// ([`TxView`]).
pub trait TreeViewer {
    /// Reads a main-tree entry.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError>;
    /// Opens a read-only view of a well-known sub-tree.
    fn subtree(&self, cfg: &TreeConfig) -> Result<SubTreeView<'_>, StateError>;
    /// Opens a read-only view of a nested sub-tree.
    fn deep_subtree(&self, path: &[TreeConfig]) -> Result<SubTreeView<'_>, StateError>;
    /// Current main-tree root.
    fn root(&self) -> Hash32;
}

/// A read-only handle on one sub-tree at a fixed root.
pub struct SubTreeView<'a> {
    kv: &'a dyn KvRead,
    tree: Tree,
    root: Hash32,
}

impl<'a> SubTreeView<'a> {
    /// The sub-tree's current root.
    pub fn root(&self) -> Hash32 {
        self.root
    }

    /// Point lookup; tombstones report absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        self.tree.get(self.kv, &self.root, key)
    }

    /// Walks the leaves in ascending key order, tombstones included.
    pub fn iter(&self) -> TreeIter<'_> {
        self.tree.iter(self.kv, &self.root)
    }

    /// Merkle proof of inclusion or exclusion for `key`.
    pub fn prove(&self, key: &[u8]) -> Result<MerkleProof, StateError> {
        self.tree.prove(self.kv, &self.root, key)
    }

    /// Number of live (non-tombstone) leaves.
    pub fn size(&self) -> Result<u64, StateError> {
        self.tree.size(self.kv, &self.root)
    }

    /// The hash function of this sub-tree, for proof verification.
    pub fn hasher(&self) -> TreeHasher {
        self.tree.hasher()
    }

    /// The key width of this sub-tree, for proof verification.
    pub fn key_bits(&self) -> usize {
        self.tree.key_bits()
    }
}

/// An immutable snapshot of the whole forest at a committed version.
pub struct TreeView {
    kv: Arc<dyn KvRead>,
    main: Tree,
    root: Hash32,
    version: u32,
}

impl TreeView {
    /// The committed version this view is pinned to.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The main-tree root at this version.
    pub fn hash(&self) -> Hash32 {
        self.root
    }
}

impl TreeViewer for TreeView {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        self.main.get(&*self.kv, &self.root, key)
    }

    fn subtree(&self, cfg: &TreeConfig) -> Result<SubTreeView<'_>, StateError> {
        self.deep_subtree(std::slice::from_ref(cfg))
    }

    fn deep_subtree(&self, path: &[TreeConfig]) -> Result<SubTreeView<'_>, StateError> {
        let (_, tree, root) = resolve_path(&*self.kv, &self.main, &self.root, path)?;
        Ok(SubTreeView {
            kv: &*self.kv,
            tree,
            root,
        })
    }

    fn root(&self) -> Hash32 {
        self.root
    }
}

/// The writer's read view over the pending transaction state.
pub struct TxView<'a> {
    kv: &'a Overlay,
    main: &'a Tree,
    root: Hash32,
}

impl TreeViewer for TxView<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        self.main.get(self.kv, &self.root, key)
    }

    fn subtree(&self, cfg: &TreeConfig) -> Result<SubTreeView<'_>, StateError> {
        self.deep_subtree(std::slice::from_ref(cfg))
    }

    fn deep_subtree(&self, path: &[TreeConfig]) -> Result<SubTreeView<'_>, StateError> {
        let (_, tree, root) = resolve_path(self.kv, self.main, &self.root, path)?;
        Ok(SubTreeView {
            kv: self.kv,
            tree,
            root,
        })
    }

    fn root(&self) -> Hash32 {
        self.root
    }
}

/// A block-scoped write transaction over the forest.
///
/// All mutations accumulate in a copy-on-write overlay; nothing touches
/// the backend until [`TreeTx::commit`], which applies the overlay as one
/// atomic batch and advances the version. Deep mutations re-inject every
/// affected parent leaf bottom-up, so the main root always reflects the
/// pending state.
pub struct TreeTx {
    store: Arc<RedbStore>,
    main: Tree,
    overlay: Overlay,
    root: Hash32,
    version: u32,
}

impl TreeTx {
    /// Reads a main-tree entry through the pending overlay.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        self.main.get(&self.overlay, &self.root, key)
    }

    /// Inserts a main-tree entry; fails with `AlreadyExists` on a live key.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<(), StateError> {
        let root = self.root;
        self.root = self.main.add(&mut self.overlay, &root, key, value)?;
        Ok(())
    }

    /// Unconditionally stores a main-tree entry.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), StateError> {
        let root = self.root;
        self.root = self.main.set(&mut self.overlay, &root, key, value)?;
        Ok(())
    }

    /// `add` on the nested tree addressed by `path`.
    pub fn deep_add(
        &mut self,
        path: &[TreeConfig],
        key: &[u8],
        value: &[u8],
    ) -> Result<(), StateError> {
        self.deep_write(path, key, value, InsertMode::Add)
    }

    /// `set` on the nested tree addressed by `path`.
    pub fn deep_set(
        &mut self,
        path: &[TreeConfig],
        key: &[u8],
        value: &[u8],
    ) -> Result<(), StateError> {
        self.deep_write(path, key, value, InsertMode::Set)
    }

    /// Reads from the nested tree addressed by `path`.
    pub fn deep_get(
        &self,
        path: &[TreeConfig],
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StateError> {
        let (_, tree, root) = resolve_path(&self.overlay, &self.main, &self.root, path)?;
        tree.get(&self.overlay, &root, key)
    }

    fn deep_write(
        &mut self,
        path: &[TreeConfig],
        key: &[u8],
        value: &[u8],
        mode: InsertMode,
    ) -> Result<(), StateError> {
        let (levels, tree, root) = resolve_path(&self.overlay, &self.main, &self.root, path)?;
        let mut new_root = tree.insert(&mut self.overlay, &root, key, value, mode)?;
        // Re-inject the new child root into each parent leaf, bottom-up;
        // every rewrite recomputes that parent's root in turn.
        for (cfg, level) in path.iter().zip(levels).rev() {
            let new_leaf = cfg.inject_root(&level.leaf_value, &new_root)?;
            new_root = level
                .tree
                .set(&mut self.overlay, &level.root, &level.leaf_key, &new_leaf)?;
        }
        self.root = new_root;
        Ok(())
    }

    /// Main-tree root over the pending state.
    pub fn root(&self) -> Hash32 {
        self.root
    }

    /// The writer's read view of the pending state.
    pub fn as_view(&self) -> TxView<'_> {
        TxView {
            kv: &self.overlay,
            main: &self.main,
            root: self.root,
        }
    }

    /// Atomically applies the pending writes and advances the version.
    /// Returns the new version and the committed main root.
    pub fn commit(self) -> Result<(u32, Hash32), StateError> {
        let version = self.version.checked_add(1).required(StateError::Corrupted(
            "version counter overflow".into(),
        ))?;
        let mut overlay = self.overlay;
        overlay.put(META_VERSION_KEY.to_vec(), version.to_be_bytes().to_vec());
        overlay.put(meta_root_key(version), self.root.to_vec());
        self.store.write(overlay.into_batch())?;
        debug!(
            "committed state version {} root {}",
            version,
            hex::encode(self.root)
        );
        Ok((version, self.root))
    }

    /// Drops the pending writes.
    pub fn discard(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{root_leaf_get_root, root_leaf_set_root};

    static ITEMS_CFG: TreeConfig = TreeConfig::single(
        "items",
        TreeHasher::Sha256,
        256,
        root_leaf_get_root,
        root_leaf_set_root,
    );

    // A derived-leaf family: the parent leaf is `child_root ‖ payload`.
    fn record_get_root(value: &[u8]) -> Result<Vec<u8>, StateError> {
        value
            .get(..32)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| StateError::Corrupted("record shorter than a root".into()))
    }

    fn record_set_root(value: &[u8], root: &[u8]) -> Result<Vec<u8>, StateError> {
        let payload = value
            .get(32..)
            .ok_or_else(|| StateError::Corrupted("record shorter than a root".into()))?;
        Ok([root, payload].concat())
    }

    static BOXES_CFG: TreeConfig = TreeConfig::family(
        "boxes",
        TreeHasher::Sha256,
        256,
        record_get_root,
        record_set_root,
    );

    fn open_temp() -> (tempfile::TempDir, StateDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = StateDb::open(dir.path()).unwrap();
        (dir, db)
    }

    fn init_items(db: &StateDb) {
        let mut tx = db.begin_tx().unwrap();
        tx.add(b"items", &EMPTY_HASH).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn fresh_store_starts_at_version_zero_with_empty_root() {
        let (_dir, db) = open_temp();
        assert_eq!(db.version().unwrap(), 0);
        assert_eq!(db.hash().unwrap(), EMPTY_HASH);
    }

    #[test]
    fn commit_advances_version_by_one_and_persists() {
        let (dir, db) = open_temp();
        let mut tx = db.begin_tx().unwrap();
        tx.add(b"items", &EMPTY_HASH).unwrap();
        tx.set(b"header", b"h1").unwrap();
        let (version, root) = tx.commit().unwrap();
        assert_eq!(version, 1);
        assert_eq!(db.version().unwrap(), 1);
        assert_eq!(db.hash().unwrap(), root);
        assert_ne!(root, EMPTY_HASH);

        drop(db);
        let db = StateDb::open(dir.path()).unwrap();
        assert_eq!(db.version().unwrap(), 1);
        assert_eq!(db.hash().unwrap(), root);
    }

    #[test]
    fn discard_leaves_committed_state_untouched() {
        let (_dir, db) = open_temp();
        init_items(&db);
        let before = db.hash().unwrap();

        let mut tx = db.begin_tx().unwrap();
        tx.deep_set(&[ITEMS_CFG.clone()], b"key", b"value").unwrap();
        assert_ne!(tx.root(), before);
        tx.discard();

        assert_eq!(db.hash().unwrap(), before);
        assert_eq!(db.version().unwrap(), 1);
    }

    #[test]
    fn subtree_writes_propagate_to_the_main_root() {
        let (_dir, db) = open_temp();
        init_items(&db);
        let root_before = db.hash().unwrap();

        let mut tx = db.begin_tx().unwrap();
        tx.deep_set(&[ITEMS_CFG.clone()], b"key", b"value").unwrap();
        let (_, root_after) = tx.commit().unwrap();
        assert_ne!(root_before, root_after);

        // The projected root in the parent leaf matches the sub-tree root.
        let view = db.tree_view(None).unwrap();
        let sub = view.subtree(&ITEMS_CFG).unwrap();
        assert_eq!(sub.get(b"key").unwrap(), Some(b"value".to_vec()));
        let hosted = view.get(b"items").unwrap().unwrap();
        assert_eq!(hosted, sub.root().to_vec());
    }

    #[test]
    fn deep_paths_descend_through_derived_leaves() {
        let (_dir, db) = open_temp();
        let mut tx = db.begin_tx().unwrap();
        tx.add(b"items", &EMPTY_HASH).unwrap();
        // A record leaf inside `items` hosting its own child root.
        let record = [EMPTY_HASH.as_slice(), b"payload"].concat();
        tx.deep_set(&[ITEMS_CFG.clone()], b"rec1", &record).unwrap();

        let path = [ITEMS_CFG.clone(), BOXES_CFG.with_key(b"rec1")];
        tx.deep_add(&path, b"deep-key", b"deep-value").unwrap();
        let (_, committed_root) = tx.commit().unwrap();

        let view = db.tree_view(None).unwrap();
        let sub = view.deep_subtree(&path).unwrap();
        assert_eq!(sub.get(b"deep-key").unwrap(), Some(b"deep-value".to_vec()));

        // The record payload survived the root injection.
        let items = view.subtree(&ITEMS_CFG).unwrap();
        let stored = items.get(b"rec1").unwrap().unwrap();
        assert_eq!(&stored[..32], sub.root().as_slice());
        assert_eq!(&stored[32..], b"payload");
        assert_eq!(view.hash(), committed_root);
    }

    #[test]
    fn deep_write_on_missing_parent_leaf_is_not_found() {
        let (_dir, db) = open_temp();
        init_items(&db);
        let mut tx = db.begin_tx().unwrap();
        let path = [ITEMS_CFG.clone(), BOXES_CFG.with_key(b"absent")];
        let err = tx.deep_add(&path, b"k", b"v").unwrap_err();
        assert!(matches!(err, StateError::NotFound));
    }

    #[test]
    fn views_are_isolated_from_later_commits() {
        let (_dir, db) = open_temp();
        init_items(&db);
        let mut tx = db.begin_tx().unwrap();
        tx.deep_set(&[ITEMS_CFG.clone()], b"key", b"old").unwrap();
        tx.commit().unwrap();

        let view = db.tree_view(None).unwrap();
        let frozen_version = view.version();

        let mut tx = db.begin_tx().unwrap();
        tx.deep_set(&[ITEMS_CFG.clone()], b"key", b"new").unwrap();
        tx.commit().unwrap();

        let sub = view.subtree(&ITEMS_CFG).unwrap();
        assert_eq!(sub.get(b"key").unwrap(), Some(b"old".to_vec()));
        assert_eq!(view.version(), frozen_version);

        let fresh = db.tree_view(None).unwrap();
        let sub = fresh.subtree(&ITEMS_CFG).unwrap();
        assert_eq!(sub.get(b"key").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn historical_views_remain_addressable() {
        let (_dir, db) = open_temp();
        init_items(&db);
        let v1_root = db.hash().unwrap();

        let mut tx = db.begin_tx().unwrap();
        tx.deep_set(&[ITEMS_CFG.clone()], b"k", b"v").unwrap();
        tx.commit().unwrap();

        let v1 = db.tree_view(Some(1)).unwrap();
        assert_eq!(v1.hash(), v1_root);
        let v0 = db.tree_view(Some(0)).unwrap();
        assert_eq!(v0.hash(), EMPTY_HASH);
        assert!(db.tree_view(Some(99)).is_err());
    }

    #[test]
    fn identical_histories_produce_identical_roots() {
        let (_da, a) = open_temp();
        let (_db_dir, b) = open_temp();
        for db in [&a, &b] {
            init_items(db);
            let mut tx = db.begin_tx().unwrap();
            tx.deep_set(&[ITEMS_CFG.clone()], b"alpha", b"1").unwrap();
            tx.deep_set(&[ITEMS_CFG.clone()], b"beta", b"2").unwrap();
            tx.commit().unwrap();
        }
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
        assert_eq!(a.version().unwrap(), b.version().unwrap());
    }

    #[test]
    fn writer_view_sees_pending_state_snapshots_do_not() {
        let (_dir, db) = open_temp();
        init_items(&db);
        let snapshot = db.tree_view(None).unwrap();

        let mut tx = db.begin_tx().unwrap();
        tx.deep_set(&[ITEMS_CFG.clone()], b"pending", b"yes").unwrap();

        let pending = tx.as_view();
        let sub = pending.subtree(&ITEMS_CFG).unwrap();
        assert_eq!(sub.get(b"pending").unwrap(), Some(b"yes".to_vec()));

        let sub = snapshot.subtree(&ITEMS_CFG).unwrap();
        assert_eq!(sub.get(b"pending").unwrap(), None);
    }
}
