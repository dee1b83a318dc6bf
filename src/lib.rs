//! Embedded, single-file, memory-mapped key/value store.
//!
//! Three layers, leaves first: [`store`] owns the backing file and
//! hands out typed byte-addressable blocks; [`btree`] builds a
//! persistent B-tree of ordered byte-string keys to block addresses
//! over those blocks; [`sequential`] stores an arbitrary-length byte
//! blob as a chain of data blocks. Composing these into a path-walking
//! directory hierarchy, write transactions, or a CLI is left to
//! whatever sits on top of this crate.

pub mod btree;
pub mod error;
pub mod sequential;
pub mod store;

pub use error::{Error, Result};
pub use store::{Address, BlockType, Memory, Store, DEFAULT_MAX_SIZE, GROWTH_INCREMENT, NIL_ADDRESS};

#[cfg(test)]
mod tests {
    use super::*;

    /// A tree nested at the value position of another tree, addressed
    /// through a plain byte-string path component, exercising the
    /// "recursively as directory structure" design described for the
    /// store.
    #[test]
    fn nested_tree_as_a_directory_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 1 << 20).unwrap();

        let root = btree::create_empty(&store, 2, 16).unwrap();
        let inner = btree::create_empty(&store, 2, 16).unwrap();
        btree::put(&store, inner, b"leaf-key", 42).unwrap();
        btree::put(&store, root, b"subdir", inner).unwrap();

        let found_inner = btree::get(&store, root, b"subdir").unwrap();
        assert_eq!(found_inner, inner);
        assert_eq!(btree::get(&store, found_inner, b"leaf-key").unwrap(), 42);
    }

    #[test]
    fn blob_value_referenced_from_a_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 1 << 20).unwrap();

        let root = btree::create_empty(&store, 2, 16).unwrap();
        let blob = sequential::create_empty(&store, 64).unwrap();
        sequential::append(&store, blob, b"blob contents").unwrap();
        btree::put(&store, root, b"file.txt", blob).unwrap();

        let blob_addr = btree::get(&store, root, b"file.txt").unwrap();
        use std::io::Read;
        let mut out = Vec::new();
        sequential::reader(&store, blob_addr)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"blob contents");
    }
}
