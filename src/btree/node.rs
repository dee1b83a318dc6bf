//! Leaf and internal B-tree nodes: on-disk record layout, splitting,
//! and the preemptive-split descent used by `put`.

use crate::error::{Error, Result};
use crate::store::{Address, BlockType, Memory};

/// One key/value entry. Internal nodes carry records too (every key
/// that has ever been inserted maps to a value somewhere in the tree,
/// even once it becomes a separator), in addition to child pointers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Record {
    pub key: Vec<u8>,
    pub value: Address,
}

pub(crate) enum Node {
    Leaf(Vec<Record>),
    Internal(Vec<Record>, Vec<Address>),
}

fn capacity_bytes(t: u8, key_size_hint: u16, internal: bool) -> usize {
    let max_records = 2 * t as usize - 1;
    let record_len = 2 + key_size_hint as usize + 8;
    let mut total = 1 + max_records * record_len;
    if internal {
        total += (2 * t as usize) * 8;
    }
    total
}

pub(crate) fn is_full(record_count: usize, t: u8) -> bool {
    record_count >= 2 * t as usize - 1
}

/// Writes the record table shared by leaf and internal payloads,
/// returning the offset immediately after it (where internal nodes
/// continue with their child address table).
fn encode_records_into(buf: &mut [u8], records: &[Record]) -> Result<usize> {
    if records.len() > u8::MAX as usize {
        return Err(Error::InvariantViolation(
            "node holds more records than a single byte count can express".into(),
        ));
    }
    for pair in records.windows(2) {
        if pair[0].key >= pair[1].key {
            return Err(Error::InvariantViolation(
                "node records must be strictly ascending and unique".into(),
            ));
        }
    }
    let mut offset = 1usize;
    for record in records {
        let klen = record.key.len();
        let end = offset + 2 + klen + 8;
        if end > buf.len() {
            return Err(Error::OverflowBlock {
                capacity: end,
                available: buf.len(),
            });
        }
        buf[offset..offset + 2].copy_from_slice(&(klen as u16).to_le_bytes());
        buf[offset + 2..offset + 2 + klen].copy_from_slice(&record.key);
        buf[offset + 2 + klen..end].copy_from_slice(&record.value.to_le_bytes());
        offset = end;
    }
    buf[0] = records.len() as u8;
    Ok(offset)
}

fn decode_records(buf: &[u8], address: Address) -> Result<(Vec<Record>, usize)> {
    if buf.is_empty() {
        return Err(Error::Malformed {
            address,
            reason: "node payload is empty".into(),
        });
    }
    let n = buf[0] as usize;
    let mut offset = 1usize;
    let mut records = Vec::with_capacity(n);
    for _ in 0..n {
        if offset + 2 > buf.len() {
            return Err(Error::Malformed {
                address,
                reason: "node payload truncated while reading key length".into(),
            });
        }
        let klen = u16::from_le_bytes(buf[offset..offset + 2].try_into().unwrap()) as usize;
        offset += 2;
        if offset + klen + 8 > buf.len() {
            return Err(Error::Malformed {
                address,
                reason: "node payload truncated while reading a record".into(),
            });
        }
        let key = buf[offset..offset + klen].to_vec();
        offset += klen;
        let value = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
        offset += 8;
        records.push(Record { key, value });
    }
    Ok((records, offset))
}

fn encode_leaf(buf: &mut [u8], records: &[Record]) -> Result<()> {
    encode_records_into(buf, records)?;
    Ok(())
}

fn decode_leaf(buf: &[u8], address: Address) -> Result<Vec<Record>> {
    Ok(decode_records(buf, address)?.0)
}

fn encode_internal(buf: &mut [u8], records: &[Record], children: &[Address]) -> Result<()> {
    let offset = encode_records_into(buf, records)?;
    let end = offset + children.len() * 8;
    if end > buf.len() {
        return Err(Error::OverflowBlock {
            capacity: end,
            available: buf.len(),
        });
    }
    let mut off = offset;
    for child in children {
        buf[off..off + 8].copy_from_slice(&child.to_le_bytes());
        off += 8;
    }
    Ok(())
}

fn decode_internal(buf: &[u8], address: Address) -> Result<(Vec<Record>, Vec<Address>)> {
    let (records, mut offset) = decode_records(buf, address)?;
    let child_count = records.len() + 1;
    let mut children = Vec::with_capacity(child_count);
    for _ in 0..child_count {
        if offset + 8 > buf.len() {
            return Err(Error::Malformed {
                address,
                reason: "node payload truncated while reading a child address".into(),
            });
        }
        children.push(u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap()));
        offset += 8;
    }
    Ok((records, children))
}

pub(crate) fn load_node(memory: &dyn Memory, address: Address) -> Result<Node> {
    let (payload, block_type) = memory.get_block(address)?;
    match block_type {
        BlockType::BTreeLeaf => Ok(Node::Leaf(decode_leaf(payload, address)?)),
        BlockType::BTreeInternal => {
            let (records, children) = decode_internal(payload, address)?;
            Ok(Node::Internal(records, children))
        }
        other => Err(Error::Malformed {
            address,
            reason: format!("expected a btree node block, found {other:?}"),
        }),
    }
}

pub(crate) fn create_leaf(
    memory: &dyn Memory,
    t: u8,
    key_size_hint: u16,
    records: Vec<Record>,
) -> Result<Address> {
    let cap = capacity_bytes(t, key_size_hint, false);
    let (address, payload) = memory.allocate(cap, BlockType::BTreeLeaf)?;
    encode_leaf(payload, &records)?;
    memory.touch(address);
    Ok(address)
}

pub(crate) fn create_internal(
    memory: &dyn Memory,
    t: u8,
    key_size_hint: u16,
    records: Vec<Record>,
    children: Vec<Address>,
) -> Result<Address> {
    let cap = capacity_bytes(t, key_size_hint, true);
    let (address, payload) = memory.allocate(cap, BlockType::BTreeInternal)?;
    encode_internal(payload, &records, &children)?;
    memory.touch(address);
    Ok(address)
}

fn persist_leaf(memory: &dyn Memory, address: Address, records: &[Record]) -> Result<()> {
    let (payload, block_type) = memory.get_block(address)?;
    if block_type != BlockType::BTreeLeaf {
        return Err(Error::Malformed {
            address,
            reason: format!("expected a btree leaf block, found {block_type:?}"),
        });
    }
    encode_leaf(payload, records)?;
    memory.touch(address);
    Ok(())
}

fn persist_internal(
    memory: &dyn Memory,
    address: Address,
    records: &[Record],
    children: &[Address],
) -> Result<()> {
    let (payload, block_type) = memory.get_block(address)?;
    if block_type != BlockType::BTreeInternal {
        return Err(Error::Malformed {
            address,
            reason: format!("expected a btree internal block, found {block_type:?}"),
        });
    }
    encode_internal(payload, records, children)?;
    memory.touch(address);
    Ok(())
}

/// Splits a full node in place. The left half is rewritten at its
/// existing address; the right half is allocated fresh. Returns the
/// separator that rises to the parent and the two child addresses.
pub(crate) fn split_node(
    memory: &dyn Memory,
    address: Address,
    t: u8,
    key_size_hint: u16,
) -> Result<(Record, Address, Address)> {
    let node = load_node(memory, address)?;
    let tt = t as usize;
    match node {
        Node::Leaf(records) => {
            if !is_full(records.len(), t) {
                return Err(Error::InvariantViolation(
                    "split called on a leaf that is not full".into(),
                ));
            }
            let left = records[0..tt - 1].to_vec();
            let middle = records[tt - 1].clone();
            let right = records[tt..2 * tt - 1].to_vec();
            persist_leaf(memory, address, &left)?;
            let right_addr = create_leaf(memory, t, key_size_hint, right)?;
            Ok((middle, address, right_addr))
        }
        Node::Internal(records, children) => {
            if !is_full(records.len(), t) {
                return Err(Error::InvariantViolation(
                    "split called on an internal node that is not full".into(),
                ));
            }
            let left_records = records[0..tt - 1].to_vec();
            let middle = records[tt - 1].clone();
            let right_records = records[tt..2 * tt - 1].to_vec();
            let left_children = children[0..tt].to_vec();
            let right_children = children[tt..2 * tt].to_vec();
            persist_internal(memory, address, &left_records, &left_children)?;
            let right_addr =
                create_internal(memory, t, key_size_hint, right_records, right_children)?;
            Ok((middle, address, right_addr))
        }
    }
}

fn search(records: &[Record], key: &[u8]) -> std::result::Result<usize, usize> {
    records.binary_search_by(|record| record.key.as_slice().cmp(key))
}

/// Preemptive-split descent. Returns whether this call inserted a new
/// key (as opposed to overwriting an existing one).
pub(crate) fn put_recursive(
    memory: &dyn Memory,
    address: Address,
    t: u8,
    key_size_hint: u16,
    key: &[u8],
    value: Address,
) -> Result<bool> {
    match load_node(memory, address)? {
        Node::Leaf(mut records) => {
            let inserted = match search(&records, key) {
                Ok(idx) => {
                    records[idx].value = value;
                    false
                }
                Err(idx) => {
                    records.insert(
                        idx,
                        Record {
                            key: key.to_vec(),
                            value,
                        },
                    );
                    true
                }
            };
            persist_leaf(memory, address, &records)?;
            Ok(inserted)
        }
        Node::Internal(mut records, mut children) => match search(&records, key) {
            Ok(idx) => {
                records[idx].value = value;
                persist_internal(memory, address, &records, &children)?;
                Ok(false)
            }
            Err(idx) => {
                let child_addr = children[idx];
                let child_full = match load_node(memory, child_addr)? {
                    Node::Leaf(r) => is_full(r.len(), t),
                    Node::Internal(r, _) => is_full(r.len(), t),
                };
                if child_full {
                    let (middle, left_addr, right_addr) =
                        split_node(memory, child_addr, t, key_size_hint)?;
                    records.insert(idx, middle);
                    children[idx] = left_addr;
                    children.insert(idx + 1, right_addr);
                    persist_internal(memory, address, &records, &children)?;
                    // The node at `address` now reflects the split; restart
                    // the step here rather than re-deriving the child slot.
                    put_recursive(memory, address, t, key_size_hint, key, value)
                } else {
                    put_recursive(memory, child_addr, t, key_size_hint, key, value)
                }
            }
        },
    }
}

pub(crate) fn get_recursive(memory: &dyn Memory, address: Address, key: &[u8]) -> Result<Address> {
    match load_node(memory, address)? {
        Node::Leaf(records) => match search(&records, key) {
            Ok(idx) => Ok(records[idx].value),
            Err(_) => Err(Error::NotFound),
        },
        Node::Internal(records, children) => match search(&records, key) {
            Ok(idx) => Ok(records[idx].value),
            Err(idx) => get_recursive(memory, children[idx], key),
        },
    }
}

pub(crate) fn structure(memory: &dyn Memory, address: Address) -> Result<serde_json::Value> {
    match load_node(memory, address)? {
        Node::Leaf(records) => Ok(serde_json::json!({
            "type": "leaf",
            "address": address,
            "records": records.iter().map(|r| serde_json::json!({
                "key": hex(&r.key),
                "value": r.value,
            })).collect::<Vec<_>>(),
        })),
        Node::Internal(records, children) => {
            let mut child_structures = Vec::with_capacity(children.len());
            for child in &children {
                child_structures.push(structure(memory, *child)?);
            }
            Ok(serde_json::json!({
                "type": "internal",
                "address": address,
                "records": records.iter().map(|r| serde_json::json!({
                    "key": hex(&r.key),
                    "value": r.value,
                })).collect::<Vec<_>>(),
                "children": child_structures,
            }))
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
