//! Head block of a byte-stream chain: first/last block pointers, total
//! size, and the per-block capacity new data blocks are allocated with.

use crate::error::{Error, Result};
use crate::store::{Address, BlockType, Memory, NIL_ADDRESS};

pub(crate) const META_PAYLOAD_LEN: usize = 26;

fn expect_meta(block_type: BlockType, address: Address) -> Result<()> {
    if block_type != BlockType::SequentialMeta {
        return Err(Error::Malformed {
            address,
            reason: format!("expected a sequential meta block, found {block_type:?}"),
        });
    }
    Ok(())
}

pub(crate) fn create_meta(memory: &dyn Memory, block_size: u16) -> Result<Address> {
    let (address, payload) = memory.allocate(META_PAYLOAD_LEN, BlockType::SequentialMeta)?;
    // first/last/size start at zero because freshly allocated storage
    // is zero-filled; only the block size is written explicitly.
    payload[24..26].copy_from_slice(&block_size.to_be_bytes());
    memory.touch(address);
    Ok(address)
}

pub(crate) fn meta_first(memory: &dyn Memory, meta_addr: Address) -> Result<Address> {
    let (payload, block_type) = memory.get_block(meta_addr)?;
    expect_meta(block_type, meta_addr)?;
    Ok(u64::from_be_bytes(payload[0..8].try_into().unwrap()))
}

pub(crate) fn meta_set_first(memory: &dyn Memory, meta_addr: Address, first: Address) -> Result<()> {
    let (payload, block_type) = memory.get_block(meta_addr)?;
    expect_meta(block_type, meta_addr)?;
    payload[0..8].copy_from_slice(&first.to_be_bytes());
    memory.touch(meta_addr);
    Ok(())
}

pub(crate) fn meta_last(memory: &dyn Memory, meta_addr: Address) -> Result<Address> {
    let (payload, block_type) = memory.get_block(meta_addr)?;
    expect_meta(block_type, meta_addr)?;
    Ok(u64::from_be_bytes(payload[8..16].try_into().unwrap()))
}

pub(crate) fn meta_set_last(memory: &dyn Memory, meta_addr: Address, last: Address) -> Result<()> {
    let (payload, block_type) = memory.get_block(meta_addr)?;
    expect_meta(block_type, meta_addr)?;
    payload[8..16].copy_from_slice(&last.to_be_bytes());
    memory.touch(meta_addr);
    Ok(())
}

pub(crate) fn meta_size(memory: &dyn Memory, meta_addr: Address) -> Result<u64> {
    let (payload, block_type) = memory.get_block(meta_addr)?;
    expect_meta(block_type, meta_addr)?;
    Ok(u64::from_be_bytes(payload[16..24].try_into().unwrap()))
}

pub(crate) fn meta_set_size(memory: &dyn Memory, meta_addr: Address, size: u64) -> Result<()> {
    let (payload, block_type) = memory.get_block(meta_addr)?;
    expect_meta(block_type, meta_addr)?;
    payload[16..24].copy_from_slice(&size.to_be_bytes());
    memory.touch(meta_addr);
    Ok(())
}

pub(crate) fn meta_block_size(memory: &dyn Memory, meta_addr: Address) -> Result<u16> {
    let (payload, block_type) = memory.get_block(meta_addr)?;
    expect_meta(block_type, meta_addr)?;
    Ok(u16::from_be_bytes(payload[24..26].try_into().unwrap()))
}

#[allow(dead_code)]
pub(crate) fn is_empty(memory: &dyn Memory, meta_addr: Address) -> Result<bool> {
    Ok(meta_first(memory, meta_addr)? == NIL_ADDRESS)
}
