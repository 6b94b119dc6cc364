//! Append-only value log used by the composite [`crate::Store`].
//!
//! Same shape as [`crate::keys::Keys`] — length-prefixed records at
//! monotonically increasing offsets — but holds full, arbitrary-length
//! value bytes rather than keys. Never erases: `erase` at the `Store` level
//! only tombstones the index entry.

use std::path::Path;

use crate::error::Result;
use crate::stream::Stream;

pub struct Values {
    stream: Stream,
}

impl Values {
    pub fn open(path: &Path, overwrite: bool) -> Result<Self> {
        Ok(Self {
            stream: Stream::open(path, overwrite)?,
        })
    }

    /// Append `value`'s bytes, returning the offset to pass to `read_at`.
    pub fn append(&mut self, value: &[u8]) -> Result<u64> {
        let mut record = Vec::with_capacity(4 + value.len());
        record.extend_from_slice(&(value.len() as u32).to_le_bytes());
        record.extend_from_slice(value);
        self.stream.append_bytes(&record)
    }

    /// Read back the value written at `pos`.
    pub fn read_at(&mut self, pos: u64) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.stream.read_at(pos, &mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        self.stream.read_at(pos + 4, &mut buf)?;
        Ok(buf)
    }
}
