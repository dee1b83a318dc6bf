//! Append-only block store backed by a growable memory-mapped file.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::MmapMut;

use crate::error::{Error, Result};

/// Default mapping length passed to `mmap` at `Store::open` time.
pub const DEFAULT_MAX_SIZE: u64 = 1 << 40; // 1 TiB

/// File is grown by this many bytes at a time whenever an allocation
/// would otherwise run past the current file length.
pub const GROWTH_INCREMENT: u64 = 16 << 20; // 16 MiB

const HEADER_LEN: u64 = 16;
const MIN_BLOCK_SIZE: u64 = 8;

/// Names the first payload byte of a block. `0` means "no block" (the
/// header occupies offsets `[0, 16)`, so no real block starts there).
pub type Address = u64;

pub const NIL_ADDRESS: Address = 0;

/// Single-byte discriminator written alongside a block's size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockType {
    BTreeMeta = 1,
    BTreeInternal = 2,
    BTreeLeaf = 3,
    SequentialMeta = 4,
    SequentialData = 5,
}

impl BlockType {
    fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            1 => BlockType::BTreeMeta,
            2 => BlockType::BTreeInternal,
            3 => BlockType::BTreeLeaf,
            4 => BlockType::SequentialMeta,
            5 => BlockType::SequentialData,
            other => {
                return Err(Error::Malformed {
                    address: 0,
                    reason: format!("unknown block type byte {other}"),
                })
            }
        })
    }
}

/// Anything that can hand out and retrieve typed, byte-addressable
/// blocks. `Store` is the only implementation; the trait exists so the
/// btree and sequential modules depend on a narrow capability set
/// rather than the concrete mmap-backed type.
pub trait Memory {
    fn allocate(&self, size: usize, block_type: BlockType) -> Result<(Address, &mut [u8])>;
    fn get_block(&self, address: Address) -> Result<(&mut [u8], BlockType)>;
    fn touch(&self, _address: Address) {}
    fn free(&self, _address: Address) -> Result<()> {
        Err(Error::Unsupported("Free"))
    }
    fn root_address(&self) -> Result<Address>;
    fn set_root_address(&self, address: Address) -> Result<()>;
}

/// Owns the backing file and its memory mapping.
///
/// The core is explicitly single-threaded (see the concurrency model in
/// the design notes): there are no internal locks. `allocate` and
/// `get_block` take `&self` and return slices that alias the mapping
/// directly through a raw pointer, the same shape used by other
/// mmap-resident stores in this family, so that recursive btree descent
/// doesn't fight the borrow checker over `&mut self`. Callers are
/// responsible for not interleaving overlapping writes.
pub struct Store {
    file: File,
    mmap: MmapMut,
    file_len: std::cell::Cell<u64>,
    max_size: u64,
}

impl Store {
    /// Opens `<dir>/db`, creating and initializing it if absent, and
    /// memory-maps it read/write for `max_size` bytes so later growth
    /// never requires a remap.
    pub fn open(dir: impl AsRef<Path>, max_size: u64) -> Result<Self> {
        let path = dir.as_ref().join("db");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .mode_or_default()
            .open(&path)?;

        let mut len = file.metadata()?.len();
        if len == 0 {
            let mut header = [0u8; HEADER_LEN as usize];
            header[0..8].copy_from_slice(&HEADER_LEN.to_be_bytes());
            header[8..16].copy_from_slice(&NIL_ADDRESS.to_be_bytes());
            use std::io::Write;
            (&file).write_all(&header)?;
            file.sync_all()?;
            len = HEADER_LEN;
        }

        // Map the full `max_size` up front so the mapping never needs
        // to move; pages past the current file length simply aren't
        // backed yet and become valid as `grow_to_fit` extends the file.
        let mmap = unsafe { memmap2::MmapOptions::new().len(max_size as usize).map_mut(&file)? };
        #[cfg(unix)]
        mmap.advise(memmap2::Advice::Random)?;

        log::debug!("opened store at {:?} (file_len={len}, max_size={max_size})", path);

        Ok(Store {
            file,
            mmap,
            file_len: std::cell::Cell::new(len.max(HEADER_LEN)),
            max_size,
        })
    }

    /// Unmaps and closes the file. Does not flush; durability comes
    /// from the OS and the explicit `fsync` performed on growth.
    pub fn close(self) -> Result<()> {
        drop(self.mmap);
        self.file.sync_all()?;
        Ok(())
    }

    /// Returns a copy-on-write mapping of the same backing file. Reads
    /// see the committed file; writes divert to anonymous pages and are
    /// dropped on unmap. Exposed for an external isolation layer (e.g.
    /// a write-transaction wrapper); this store enforces no merge-back
    /// semantics of its own.
    pub fn private_mmap(&self) -> Result<memmap2::MmapMut> {
        let mut opts = memmap2::MmapOptions::new();
        opts.len(self.max_size as usize);
        let map = unsafe { opts.map_copy(&self.file)? };
        Ok(map)
    }

    fn nfa(&self) -> u64 {
        let raw = self.raw_slice(0, 8);
        u64::from_be_bytes(raw.try_into().unwrap())
    }

    fn set_nfa(&self, value: u64) {
        let raw = self.raw_slice_mut(0, 8);
        raw.copy_from_slice(&value.to_be_bytes());
    }

    fn grow_to_fit(&self, needed_end: u64) -> Result<()> {
        let current = self.file_len.get();
        if needed_end <= current {
            return Ok(());
        }
        if needed_end > self.max_size {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("store would exceed max_size {}", self.max_size),
            )));
        }
        // Grow in `GROWTH_INCREMENT` steps, but never past `max_size`
        // (the mapping's fixed length) even if a single step would
        // otherwise overshoot it.
        let mut new_len = current;
        while new_len < needed_end {
            new_len = (new_len + GROWTH_INCREMENT).min(self.max_size);
        }
        log::debug!("growing store file from {current} to {new_len} bytes");
        self.file.set_len(new_len)?;
        self.file.sync_all()?;
        self.file_len.set(new_len);
        Ok(())
    }

    /// Returns an immutable byte slice over `[offset, offset+len)` of
    /// the mapping. `&self`-based; see the struct docs for why this is
    /// safe in this crate's single-threaded model.
    fn raw_slice(&self, offset: u64, len: u64) -> &[u8] {
        let ptr = self.mmap.as_ptr();
        unsafe {
            std::slice::from_raw_parts(ptr.add(offset as usize), len as usize)
        }
    }

    #[allow(clippy::mut_from_ref)]
    fn raw_slice_mut(&self, offset: u64, len: u64) -> &mut [u8] {
        let ptr = self.mmap.as_ptr() as *mut u8;
        unsafe {
            std::slice::from_raw_parts_mut(ptr.add(offset as usize), len as usize)
        }
    }
}

/// Smallest power of two size class, counting the 2-byte prefix, that
/// can hold `payload_len` payload bytes, with a floor of 8 bytes total.
fn size_class(payload_len: usize) -> (u8, u64) {
    let needed = (payload_len as u64 + 2).max(MIN_BLOCK_SIZE);
    let mut class = 0u8;
    let mut extent = 1u64;
    while extent < needed {
        extent <<= 1;
        class += 1;
    }
    (class, extent)
}

impl Memory for Store {
    fn allocate(&self, size: usize, block_type: BlockType) -> Result<(Address, &mut [u8])> {
        let (class_byte, extent) = size_class(size);
        let nfa = self.nfa();
        let needed_end = nfa + extent;
        self.grow_to_fit(needed_end)?;

        let prefix = self.raw_slice_mut(nfa, 2);
        prefix[0] = class_byte;
        prefix[1] = block_type as u8;

        let address = nfa + 2;
        let payload_len = extent - 2;
        self.set_nfa(needed_end);

        log::trace!("allocated block at {address} (class={class_byte}, type={block_type:?}, size={payload_len})");

        let payload = self.raw_slice_mut(address, payload_len);
        Ok((address, payload))
    }

    fn get_block(&self, address: Address) -> Result<(&mut [u8], BlockType)> {
        let nfa = self.nfa();
        if address == NIL_ADDRESS || address >= nfa {
            return Err(Error::OutOfRange { address, nfa });
        }
        let prefix = self.raw_slice(address - 2, 2);
        let class_byte = prefix[0];
        let block_type = BlockType::from_byte(prefix[1]).map_err(|_| Error::Malformed {
            address,
            reason: format!("unknown block type byte {}", prefix[1]),
        })?;
        let extent = 1u64 << class_byte;
        if extent < 2 {
            return Err(Error::Malformed {
                address,
                reason: "derived block extent shorter than the 2-byte prefix".to_string(),
            });
        }
        let payload_len = extent - 2;
        if address + payload_len > nfa {
            return Err(Error::Malformed {
                address,
                reason: "block extends past the next free address".to_string(),
            });
        }
        Ok((self.raw_slice_mut(address, payload_len), block_type))
    }

    fn touch(&self, _address: Address) {}

    fn free(&self, _address: Address) -> Result<()> {
        Err(Error::Unsupported("Free"))
    }

    fn root_address(&self) -> Result<Address> {
        let raw = self.raw_slice(8, 8);
        Ok(u64::from_be_bytes(raw.try_into().unwrap()))
    }

    fn set_root_address(&self, address: Address) -> Result<()> {
        let raw = self.raw_slice_mut(8, 8);
        raw.copy_from_slice(&address.to_be_bytes());
        Ok(())
    }
}

trait OpenOptionsModeExt {
    fn mode_or_default(&mut self) -> &mut Self;
}

impl OpenOptionsModeExt for OpenOptions {
    #[cfg(unix)]
    fn mode_or_default(&mut self) -> &mut Self {
        use std::os::unix::fs::OpenOptionsExt;
        self.mode(0o600)
    }

    #[cfg(not(unix))]
    fn mode_or_default(&mut self) -> &mut Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_empty_store_has_valid_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 1 << 20).unwrap();
        assert_eq!(store.nfa(), HEADER_LEN);
        assert_eq!(store.root_address().unwrap(), NIL_ADDRESS);
        store.close().unwrap();
    }

    #[test]
    fn allocate_and_get_block_round_trip_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let addr;
        {
            let store = Store::open(dir.path(), 1 << 20).unwrap();
            let (a, payload) = store.allocate(3, BlockType::BTreeMeta).unwrap();
            addr = a;
            payload[..3].copy_from_slice(&[1, 2, 3]);
            store.close().unwrap();
        }
        {
            let store = Store::open(dir.path(), 1 << 20).unwrap();
            let (payload, block_type) = store.get_block(addr).unwrap();
            assert_eq!(block_type, BlockType::BTreeMeta);
            assert_eq!(&payload[..3], &[1, 2, 3]);
        }
    }

    #[test]
    fn get_block_rejects_out_of_range_address() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 1 << 20).unwrap();
        assert!(matches!(
            store.get_block(NIL_ADDRESS),
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            store.get_block(10_000),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn free_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 1 << 20).unwrap();
        assert!(matches!(store.free(16), Err(Error::Unsupported(_))));
    }

    #[test]
    fn allocation_grows_file_past_initial_length() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 64 << 20).unwrap();
        // force at least one growth step with a payload bigger than the
        // initial file length allotted at open.
        let (_addr, payload) = store
            .allocate((GROWTH_INCREMENT as usize) + 1024, BlockType::SequentialData)
            .unwrap();
        assert!(payload.len() >= (GROWTH_INCREMENT as usize) + 1024);
    }
}
