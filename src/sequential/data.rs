//! A single link in a sequential stream's data-block chain.

use crate::error::{Error, Result};
use crate::store::{Address, BlockType, Memory};

const HEADER_LEN: usize = 10;

pub(crate) fn create_data_block(memory: &dyn Memory, block_size: u16) -> Result<Address> {
    let requested = HEADER_LEN + block_size as usize;
    let (address, payload) = memory.allocate(requested, BlockType::SequentialData)?;
    payload[0..8].copy_from_slice(&0u64.to_be_bytes());
    payload[8..10].copy_from_slice(&0u16.to_be_bytes());
    memory.touch(address);
    Ok(address)
}

pub(crate) fn capacity(payload_len: usize) -> usize {
    payload_len.saturating_sub(HEADER_LEN)
}

pub(crate) fn next(payload: &[u8]) -> Address {
    u64::from_be_bytes(payload[0..8].try_into().unwrap())
}

pub(crate) fn set_next(payload: &mut [u8], next: Address) {
    payload[0..8].copy_from_slice(&next.to_be_bytes());
}

pub(crate) fn used(payload: &[u8]) -> u16 {
    u16::from_be_bytes(payload[8..10].try_into().unwrap())
}

pub(crate) fn set_used(payload: &mut [u8], used: u16) {
    payload[8..10].copy_from_slice(&used.to_be_bytes());
}

pub(crate) fn bytes(payload: &[u8]) -> &[u8] {
    &payload[HEADER_LEN..]
}

pub(crate) fn bytes_mut(payload: &mut [u8]) -> &mut [u8] {
    &mut payload[HEADER_LEN..]
}

pub(crate) fn expect_data_block(block_type: BlockType, address: Address) -> Result<()> {
    if block_type != BlockType::SequentialData {
        return Err(Error::Malformed {
            address,
            reason: format!("expected a sequential data block, found {block_type:?}"),
        });
    }
    Ok(())
}
