//! The fixed-size block that anchors a single tree: key count, root
//! address, key size hint, and minimum degree.

use crate::error::{Error, Result};
use crate::store::{Address, BlockType, Memory};

pub(crate) const META_PAYLOAD_LEN: usize = 19;

fn check_meta(payload: &[u8], address: Address) -> Result<()> {
    if payload.len() < META_PAYLOAD_LEN {
        return Err(Error::Malformed {
            address,
            reason: format!(
                "btree meta payload too short ({} < {META_PAYLOAD_LEN})",
                payload.len()
            ),
        });
    }
    Ok(())
}

/// Allocates and initializes a fresh meta block. Count and root start
/// at zero because freshly allocated storage is zero-filled; only the
/// key size hint and degree are written explicitly.
pub(crate) fn create_meta(memory: &dyn Memory, t: u8, key_size_hint: u16) -> Result<Address> {
    let (address, payload) = memory.allocate(META_PAYLOAD_LEN, BlockType::BTreeMeta)?;
    payload[16..18].copy_from_slice(&key_size_hint.to_be_bytes());
    payload[18] = t;
    memory.touch(address);
    Ok(address)
}

pub(crate) fn meta_count(memory: &dyn Memory, meta_addr: Address) -> Result<u64> {
    let (payload, block_type) = memory.get_block(meta_addr)?;
    check_meta(payload, meta_addr)?;
    expect_meta_block(block_type, meta_addr)?;
    Ok(u64::from_be_bytes(payload[0..8].try_into().unwrap()))
}

pub(crate) fn meta_set_count(memory: &dyn Memory, meta_addr: Address, count: u64) -> Result<()> {
    let (payload, block_type) = memory.get_block(meta_addr)?;
    check_meta(payload, meta_addr)?;
    expect_meta_block(block_type, meta_addr)?;
    payload[0..8].copy_from_slice(&count.to_be_bytes());
    memory.touch(meta_addr);
    Ok(())
}

pub(crate) fn meta_root(memory: &dyn Memory, meta_addr: Address) -> Result<Address> {
    let (payload, block_type) = memory.get_block(meta_addr)?;
    check_meta(payload, meta_addr)?;
    expect_meta_block(block_type, meta_addr)?;
    Ok(u64::from_be_bytes(payload[8..16].try_into().unwrap()))
}

pub(crate) fn meta_set_root(memory: &dyn Memory, meta_addr: Address, root: Address) -> Result<()> {
    let (payload, block_type) = memory.get_block(meta_addr)?;
    check_meta(payload, meta_addr)?;
    expect_meta_block(block_type, meta_addr)?;
    payload[8..16].copy_from_slice(&root.to_be_bytes());
    memory.touch(meta_addr);
    Ok(())
}

pub(crate) fn meta_t(memory: &dyn Memory, meta_addr: Address) -> Result<u8> {
    let (payload, block_type) = memory.get_block(meta_addr)?;
    check_meta(payload, meta_addr)?;
    expect_meta_block(block_type, meta_addr)?;
    Ok(payload[18])
}

pub(crate) fn meta_key_size_hint(memory: &dyn Memory, meta_addr: Address) -> Result<u16> {
    let (payload, block_type) = memory.get_block(meta_addr)?;
    check_meta(payload, meta_addr)?;
    expect_meta_block(block_type, meta_addr)?;
    Ok(u16::from_be_bytes(payload[16..18].try_into().unwrap()))
}

fn expect_meta_block(block_type: BlockType, address: Address) -> Result<()> {
    if block_type != BlockType::BTreeMeta {
        return Err(Error::Malformed {
            address,
            reason: format!("expected a btree meta block, found {block_type:?}"),
        });
    }
    Ok(())
}

pub(crate) fn meta_increment_count(memory: &dyn Memory, meta_addr: Address) -> Result<()> {
    let current = meta_count(memory, meta_addr)?;
    meta_set_count(memory, meta_addr, current + 1)
}
