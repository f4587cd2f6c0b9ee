// Path: crates/statedb/src/lib.rs
//! A versioned, hierarchical Merkle-tree store.
//!
//! The store manages a forest of named authenticated sub-trees rooted in a
//! single *main tree*: each sub-tree's root is projected into a leaf of its
//! parent, so the main root authenticates every leaf of every tree
//! transitively. Writes happen inside a block-scoped [`TreeTx`] that
//! commits atomically and advances a monotonic version; reads happen
//! against immutable [`TreeView`] snapshots that are unaffected by
//! concurrent writers.

pub mod config;
pub mod hasher;
pub mod statedb;
pub mod tree;

pub use config::{root_leaf_get_root, root_leaf_set_root, GetRootFn, SetRootFn, TreeConfig};
pub use hasher::TreeHasher;
pub use statedb::{StateDb, SubTreeView, TreeTx, TreeView, TreeViewer, TxView};
pub use tree::{verify_proof, MerkleProof, Tree, TreeIter, EMPTY_TREE_ROOT};
