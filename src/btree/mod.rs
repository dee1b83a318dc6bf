//! Persistent B-tree of minimum degree `t`, used both as a per-map
//! index and recursively as directory structure. Keys are byte
//! strings; values are [`Address`]es of whatever the caller's layer
//! stores at that key (another tree's meta block, a sequential
//! stream's meta block, or anything else addressable).

mod meta;
mod node;

use crate::error::Result;
use crate::store::{Address, Memory};

/// Creates a new, empty tree and returns its meta block's address.
///
/// `key_size_hint` sizes node blocks so that typical keys don't force
/// an [`crate::error::Error::OverflowBlock`]; it is advisory, not a
/// hard limit, since nodes are re-checked against their actual
/// serialized size on every write.
pub fn create_empty(memory: &dyn Memory, t: u8, key_size_hint: u16) -> Result<Address> {
    let meta_addr = meta::create_meta(memory, t, key_size_hint)?;
    let root_addr = node::create_leaf(memory, t, key_size_hint, Vec::new())?;
    meta::meta_set_root(memory, meta_addr, root_addr)?;
    Ok(meta_addr)
}

/// Inserts `key => value`, overwriting any existing value for `key`.
/// Splits the root preemptively if it is full before descending.
pub fn put(memory: &dyn Memory, meta_addr: Address, key: &[u8], value: Address) -> Result<()> {
    let t = meta::meta_t(memory, meta_addr)?;
    let key_size_hint = meta::meta_key_size_hint(memory, meta_addr)?;
    let mut root_addr = meta::meta_root(memory, meta_addr)?;

    let root_full = match node::load_node(memory, root_addr)? {
        node::Node::Leaf(records) => node::is_full(records.len(), t),
        node::Node::Internal(records, _) => node::is_full(records.len(), t),
    };
    if root_full {
        let (middle, left_addr, right_addr) =
            node::split_node(memory, root_addr, t, key_size_hint)?;
        let new_root = node::create_internal(
            memory,
            t,
            key_size_hint,
            vec![middle],
            vec![left_addr, right_addr],
        )?;
        meta::meta_set_root(memory, meta_addr, new_root)?;
        root_addr = new_root;
    }

    let inserted = node::put_recursive(memory, root_addr, t, key_size_hint, key, value)?;
    if inserted {
        meta::meta_increment_count(memory, meta_addr)?;
    }
    Ok(())
}

/// Looks up `key`, returning [`crate::error::Error::NotFound`] if
/// absent.
pub fn get(memory: &dyn Memory, meta_addr: Address, key: &[u8]) -> Result<Address> {
    let root_addr = meta::meta_root(memory, meta_addr)?;
    node::get_recursive(memory, root_addr, key)
}

/// Returns the number of distinct keys ever inserted.
pub fn count(memory: &dyn Memory, meta_addr: Address) -> Result<u64> {
    meta::meta_count(memory, meta_addr)
}

/// Returns a JSON description of the tree's structure, for tests and
/// introspection. Not part of the on-disk format.
pub fn dump(memory: &dyn Memory, meta_addr: Address) -> Result<String> {
    let t = meta::meta_t(memory, meta_addr)?;
    let key_size_hint = meta::meta_key_size_hint(memory, meta_addr)?;
    let root_addr = meta::meta_root(memory, meta_addr)?;
    let root_structure = match node::structure(memory, root_addr) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("dump: failed to walk tree rooted at {root_addr}: {err}");
            return Err(err);
        }
    };
    let value = serde_json::json!({
        "type": "meta",
        "address": meta_addr,
        "t": t,
        "key_size_hint": key_size_hint,
        "count": meta::meta_count(memory, meta_addr)?,
        "root": root_structure,
    });
    Ok(serde_json::to_string_pretty(&value).expect("json serialization of tree dump"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn key(bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }

    #[test]
    fn empty_tree_reports_zero_count_and_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 1 << 20).unwrap();
        let tree = create_empty(&store, 2, 32).unwrap();
        assert_eq!(count(&store, tree).unwrap(), 0);
        assert!(matches!(
            get(&store, tree, &key(&[1, 2, 3])),
            Err(crate::error::Error::NotFound)
        ));
    }

    #[test]
    fn leaf_root_split_on_fourth_insert_with_t2() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 1 << 20).unwrap();
        let tree = create_empty(&store, 2, 32).unwrap();

        put(&store, tree, &key(&[1, 2, 3]), 666).unwrap();
        put(&store, tree, &key(&[1, 2, 4]), 667).unwrap();
        put(&store, tree, &key(&[1, 2, 5]), 668).unwrap();
        assert_eq!(count(&store, tree).unwrap(), 3);

        put(&store, tree, &key(&[1, 2, 6]), 669).unwrap();
        assert_eq!(count(&store, tree).unwrap(), 4);
        assert_eq!(get(&store, tree, &key(&[1, 2, 3])).unwrap(), 666);
        assert_eq!(get(&store, tree, &key(&[1, 2, 6])).unwrap(), 669);
    }

    #[test]
    fn internal_root_split_with_t3_sixteen_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 1 << 20).unwrap();
        let tree = create_empty(&store, 3, 32).unwrap();

        let mut value = 333u64;
        for k in 3u8..=9 {
            put(&store, tree, &key(&[1, 2, k]), value).unwrap();
            value += 1;
        }
        for k in 0u8..=7 {
            put(&store, tree, &key(&[1, 3, k]), value).unwrap();
            value += 1;
        }
        assert_eq!(count(&store, tree).unwrap(), 15);

        put(&store, tree, &key(&[1, 3, 8]), 348).unwrap();
        assert_eq!(count(&store, tree).unwrap(), 16);
        assert_eq!(get(&store, tree, &key(&[1, 2, 3])).unwrap(), 333);
        assert_eq!(get(&store, tree, &key(&[1, 3, 8])).unwrap(), 348);
    }

    #[test]
    fn overwriting_an_existing_key_leaves_count_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 1 << 20).unwrap();
        let tree = create_empty(&store, 2, 32).unwrap();

        put(&store, tree, &key(&[9]), 1).unwrap();
        put(&store, tree, &key(&[9]), 2).unwrap();
        assert_eq!(count(&store, tree).unwrap(), 1);
        assert_eq!(get(&store, tree, &key(&[9])).unwrap(), 2);
    }

    #[test]
    fn many_inserts_stay_retrievable_and_ascending() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 4 << 20).unwrap();
        let tree = create_empty(&store, 4, 16).unwrap();

        let mut keys: Vec<u8> = (0u8..=200).step_by(3).collect();
        for (i, &k) in keys.iter().enumerate() {
            put(&store, tree, &[k], i as u64).unwrap();
        }
        assert_eq!(count(&store, tree).unwrap(), keys.len() as u64);
        for (i, &k) in keys.iter().enumerate() {
            assert_eq!(get(&store, tree, &[k]).unwrap(), i as u64);
        }
        keys.sort();
        let dump = dump(&store, tree).unwrap();
        assert!(dump.contains("\"type\": \"meta\""));
    }

    #[test]
    fn durability_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let tree;
        {
            let store = Store::open(dir.path(), 1 << 20).unwrap();
            tree = create_empty(&store, 2, 32).unwrap();
            for i in 0u8..20 {
                put(&store, tree, &[i], i as u64 * 10).unwrap();
            }
            store.close().unwrap();
        }
        {
            let store = Store::open(dir.path(), 1 << 20).unwrap();
            assert_eq!(count(&store, tree).unwrap(), 20);
            for i in 0u8..20 {
                assert_eq!(get(&store, tree, &[i]).unwrap(), i as u64 * 10);
            }
        }
    }
}
