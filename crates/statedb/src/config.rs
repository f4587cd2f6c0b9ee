// Path: crates/statedb/src/config.rs

//! Tree configurations: the immutable descriptors that identify each
//! sub-tree class and how a parent leaf encodes the sub-tree's root.
//!
//! The projector/injector pair replaces the function-valued fields of
//! dynamic designs: both are plain `fn` pointers, passed by value, that
//! map leaf bytes to the embedded child root and back.

use crate::hasher::TreeHasher;
use crate::tree::Tree;
use tally_types::error::StateError;
use tally_types::ids::Hash32;

/// Extracts the child tree root embedded in a parent leaf value.
pub type GetRootFn = fn(&[u8]) -> Result<Vec<u8>, StateError>;

/// Returns the parent leaf value rewritten with a new child root.
pub type SetRootFn = fn(&[u8], &[u8]) -> Result<Vec<u8>, StateError>;

/// Projector for a *root-leaf*: the leaf value bytes are exactly the
/// child root.
pub fn root_leaf_get_root(value: &[u8]) -> Result<Vec<u8>, StateError> {
    if value.len() != 32 {
        return Err(StateError::Corrupted(format!(
            "root leaf holds {} bytes, expected 32",
            value.len()
        )));
    }
    Ok(value.to_vec())
}

/// Injector for a *root-leaf*: the new value is the new root.
pub fn root_leaf_set_root(value: &[u8], root: &[u8]) -> Result<Vec<u8>, StateError> {
    if value.len() != 32 {
        return Err(StateError::Corrupted(format!(
            "root leaf holds {} bytes, expected 32",
            value.len()
        )));
    }
    Ok(root.to_vec())
}

/// An immutable descriptor for one class of sub-tree.
///
/// A *single* config identifies one well-known tree whose root lives in a
/// parent leaf keyed by the config name. A *family* config describes a
/// set of trees, one per parent key; [`TreeConfig::with_key`] instantiates
/// the member whose root lives under that key.
#[derive(Debug, Clone)]
pub struct TreeConfig {
    name: &'static str,
    hasher: TreeHasher,
    key_bits: usize,
    single: bool,
    parent_key: Option<Vec<u8>>,
    get_root: GetRootFn,
    set_root: SetRootFn,
}

impl TreeConfig {
    /// Describes one well-known tree.
    pub const fn single(
        name: &'static str,
        hasher: TreeHasher,
        key_bits: usize,
        get_root: GetRootFn,
        set_root: SetRootFn,
    ) -> Self {
        Self {
            name,
            hasher,
            key_bits,
            single: true,
            parent_key: None,
            get_root,
            set_root,
        }
    }

    /// Describes a family of trees instantiated per parent key.
    pub const fn family(
        name: &'static str,
        hasher: TreeHasher,
        key_bits: usize,
        get_root: GetRootFn,
        set_root: SetRootFn,
    ) -> Self {
        Self {
            name,
            hasher,
            key_bits,
            single: false,
            parent_key: None,
            get_root,
            set_root,
        }
    }

    /// Instantiates a family member: the returned config addresses the
    /// tree whose root is hosted by the parent leaf at `key`.
    pub fn with_key(&self, key: &[u8]) -> Self {
        let mut cfg = self.clone();
        cfg.parent_key = Some(key.to_vec());
        cfg
    }

    /// The config's name, also the first namespace component.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Key of the parent leaf hosting this tree's root.
    pub(crate) fn parent_leaf_key(&self) -> Result<Vec<u8>, StateError> {
        if self.single {
            return Ok(self.name.as_bytes().to_vec());
        }
        self.parent_key.clone().ok_or_else(|| {
            StateError::InvalidConfig(format!(
                "family config '{}' used without with_key",
                self.name
            ))
        })
    }

    /// Backend namespace of this tree's nodes.
    pub(crate) fn namespace(&self) -> Result<Vec<u8>, StateError> {
        let mut ns = Vec::new();
        ns.extend_from_slice(b"t/");
        ns.extend_from_slice(self.name.as_bytes());
        ns.push(b'/');
        if !self.single {
            let key = self.parent_key.as_deref().ok_or_else(|| {
                StateError::InvalidConfig(format!(
                    "family config '{}' used without with_key",
                    self.name
                ))
            })?;
            ns.extend_from_slice(key);
            ns.push(b'/');
        }
        Ok(ns)
    }

    /// Materializes the tree descriptor for this config.
    pub(crate) fn tree(&self) -> Result<Tree, StateError> {
        Ok(Tree::new(self.hasher, self.key_bits, self.namespace()?))
    }

    /// Runs the projector and checks the digest width.
    pub(crate) fn project_root(&self, leaf_value: &[u8]) -> Result<Hash32, StateError> {
        let root = (self.get_root)(leaf_value)?;
        root.as_slice().try_into().map_err(|_| {
            StateError::Corrupted(format!(
                "projected root of '{}' has {} bytes, expected 32",
                self.name,
                root.len()
            ))
        })
    }

    /// Runs the injector, producing the rewritten parent leaf value.
    pub(crate) fn inject_root(
        &self,
        leaf_value: &[u8],
        root: &Hash32,
    ) -> Result<Vec<u8>, StateError> {
        (self.set_root)(leaf_value, root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_config_parent_key_is_its_name() {
        let cfg = TreeConfig::single(
            "oracs",
            TreeHasher::Sha256,
            256,
            root_leaf_get_root,
            root_leaf_set_root,
        );
        assert_eq!(cfg.parent_leaf_key().unwrap(), b"oracs".to_vec());
        assert_eq!(cfg.namespace().unwrap(), b"t/oracs/".to_vec());
    }

    #[test]
    fn family_config_requires_with_key() {
        let cfg = TreeConfig::family(
            "votes",
            TreeHasher::Sha256,
            512,
            root_leaf_get_root,
            root_leaf_set_root,
        );
        assert!(matches!(
            cfg.parent_leaf_key(),
            Err(StateError::InvalidConfig(_))
        ));

        let keyed = cfg.with_key(&[0xAB; 32]);
        assert_eq!(keyed.parent_leaf_key().unwrap(), vec![0xAB; 32]);
        let ns = keyed.namespace().unwrap();
        assert!(ns.starts_with(b"t/votes/"));
        assert!(ns.ends_with(b"/"));
    }

    #[test]
    fn root_leaf_projectors_roundtrip() {
        let root = [7u8; 32];
        let value = vec![0u8; 32];
        let injected = root_leaf_set_root(&value, &root).unwrap();
        assert_eq!(injected, root.to_vec());
        assert_eq!(root_leaf_get_root(&injected).unwrap(), root.to_vec());
        assert!(root_leaf_get_root(&[0u8; 31]).is_err());
    }
}
