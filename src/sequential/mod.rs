//! Sequential byte-stream stored as a singly-linked chain of
//! fixed-capacity data blocks, anchored by a meta block carrying
//! head/tail pointers and the total length.

mod data;
mod meta;
mod reader;

use crate::error::Result;
use crate::store::{Address, Memory, NIL_ADDRESS};

pub use reader::Reader;

/// Creates a new, empty stream. `block_size` sizes every data block
/// allocated for this stream going forward; `0` is legal and simply
/// allocates minimum-class blocks.
pub fn create_empty(memory: &dyn Memory, block_size: u16) -> Result<Address> {
    meta::create_meta(memory, block_size)
}

/// The number of payload bytes usable in a data block before a new one
/// must be threaded on. Bounded by the stream's nominal `block_size`
/// even when the underlying allocation rounds up to a bigger size
/// class; a `block_size` of 0 falls back to whatever the allocation
/// actually gave us, since there is no nominal bound to honor.
fn effective_capacity(payload_len: usize, block_size: u16) -> usize {
    let raw = data::capacity(payload_len);
    if block_size == 0 {
        raw
    } else {
        (block_size as usize).min(raw)
    }
}

/// Appends `bytes` to the end of the stream, threading new data blocks
/// onto the chain as the current tail fills up.
pub fn append(memory: &dyn Memory, meta_addr: Address, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }

    let block_size = meta::meta_block_size(memory, meta_addr)?;
    let mut last = meta::meta_last(memory, meta_addr)?;
    if last == NIL_ADDRESS {
        let first = data::create_data_block(memory, block_size)?;
        meta::meta_set_first(memory, meta_addr, first)?;
        meta::meta_set_last(memory, meta_addr, first)?;
        last = first;
    }

    let mut remaining = bytes;
    while !remaining.is_empty() {
        let (payload, block_type) = memory.get_block(last)?;
        data::expect_data_block(block_type, last)?;
        let capacity = effective_capacity(payload.len(), block_size);
        let used = data::used(payload) as usize;

        if used >= capacity {
            let new_addr = data::create_data_block(memory, block_size)?;
            let (payload, _) = memory.get_block(last)?;
            data::set_next(payload, new_addr);
            memory.touch(last);
            meta::meta_set_last(memory, meta_addr, new_addr)?;
            last = new_addr;
            continue;
        }

        let free = capacity - used;
        let n = free.min(remaining.len());
        data::bytes_mut(payload)[used..used + n].copy_from_slice(&remaining[..n]);
        data::set_used(payload, (used + n) as u16);
        memory.touch(last);
        remaining = &remaining[n..];
    }

    let total = meta::meta_size(memory, meta_addr)?;
    meta::meta_set_size(memory, meta_addr, total + bytes.len() as u64)?;
    Ok(())
}

/// Returns the total number of bytes appended so far.
pub fn size(memory: &dyn Memory, meta_addr: Address) -> Result<u64> {
    meta::meta_size(memory, meta_addr)
}

/// Returns a fresh, non-restartable reader over the stream's full
/// contents from the beginning.
pub fn reader<'m>(memory: &'m dyn Memory, meta_addr: Address) -> Result<Reader<'m>> {
    let first = meta::meta_first(memory, meta_addr)?;
    Ok(Reader::new(memory, first))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::io::Read;

    #[test]
    fn small_append_fits_in_one_block() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 1 << 20).unwrap();
        let stream = create_empty(&store, 3).unwrap();
        append(&store, stream, &[1, 2, 3]).unwrap();
        assert_eq!(size(&store, stream).unwrap(), 3);

        let mut out = Vec::new();
        reader(&store, stream).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn append_across_many_single_byte_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 1 << 20).unwrap();
        let stream = create_empty(&store, 1).unwrap();
        append(&store, stream, &[1, 2, 3]).unwrap();
        assert_eq!(size(&store, stream).unwrap(), 3);

        let mut chain_len = 0;
        let mut cursor = meta::meta_first(&store, stream).unwrap();
        while cursor != NIL_ADDRESS {
            chain_len += 1;
            let (payload, _) = store.get_block(cursor).unwrap();
            cursor = data::next(payload);
        }
        assert_eq!(chain_len, 3, "block_size=1 appending 3 bytes should chain 3 blocks");

        let mut out = Vec::new();
        reader(&store, stream).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn append_in_many_small_chunks_reassembles_correctly() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 4 << 20).unwrap();
        let stream = create_empty(&store, 16).unwrap();

        let payload: Vec<u8> = (0u8..=255).collect();
        for chunk in payload.chunks(7) {
            append(&store, stream, chunk).unwrap();
        }
        assert_eq!(size(&store, stream).unwrap(), payload.len() as u64);

        let mut out = Vec::new();
        reader(&store, stream).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn empty_stream_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 1 << 20).unwrap();
        let stream = create_empty(&store, 8).unwrap();
        assert_eq!(size(&store, stream).unwrap(), 0);
        let mut out = Vec::new();
        reader(&store, stream).unwrap().read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn durability_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let stream;
        {
            let store = Store::open(dir.path(), 1 << 20).unwrap();
            stream = create_empty(&store, 4).unwrap();
            append(&store, stream, b"hello, world").unwrap();
            store.close().unwrap();
        }
        {
            let store = Store::open(dir.path(), 1 << 20).unwrap();
            assert_eq!(size(&store, stream).unwrap(), 12);
            let mut out = Vec::new();
            reader(&store, stream).unwrap().read_to_end(&mut out).unwrap();
            assert_eq!(out, b"hello, world");
        }
    }
}
