//! Finite, non-restartable reader over a sequential stream's data-block
//! chain.

use crate::store::{Address, Memory, NIL_ADDRESS};

use super::data;

pub struct Reader<'m> {
    memory: &'m dyn Memory,
    current: Address,
    offset: usize,
}

impl<'m> Reader<'m> {
    pub(crate) fn new(memory: &'m dyn Memory, first: Address) -> Self {
        Reader {
            memory,
            current: first,
            offset: 0,
        }
    }
}

impl std::io::Read for Reader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            if self.current == NIL_ADDRESS {
                return Ok(0);
            }
            let (payload, block_type) = self
                .memory
                .get_block(self.current)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            data::expect_data_block(block_type, self.current)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

            let used = data::used(payload) as usize;
            let chunk = &data::bytes(payload)[..used];

            if self.offset < chunk.len() {
                let n = (chunk.len() - self.offset).min(buf.len());
                buf[..n].copy_from_slice(&chunk[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }

            self.current = data::next(payload);
            self.offset = 0;
        }
    }
}
