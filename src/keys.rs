//! Append-only key log.
//!
//! Keys are variable-length byte strings, so records are self-delimiting: a
//! little-endian `u32` length prefix followed by that many raw bytes. An
//! offset returned by `append` is stable for the lifetime of the directory
//! — keys are never relocated or overwritten.

use std::path::Path;

use crate::error::Result;
use crate::stream::Stream;

pub struct Keys {
    stream: Stream,
}

impl Keys {
    pub fn open(path: &Path, overwrite: bool) -> Result<Self> {
        Ok(Self {
            stream: Stream::open(path, overwrite)?,
        })
    }

    /// Append `key`'s bytes, returning the offset it can later be read back
    /// from.
    pub fn append(&mut self, key: &[u8]) -> Result<u64> {
        let mut record = Vec::with_capacity(4 + key.len());
        record.extend_from_slice(&(key.len() as u32).to_le_bytes());
        record.extend_from_slice(key);
        self.stream.append_bytes(&record)
    }

    /// Reconstitute the key written at `pos`.
    pub fn read_at(&mut self, pos: u64) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.stream.read_at(pos, &mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        self.stream.read_at(pos + 4, &mut buf)?;
        Ok(buf)
    }

    /// Compare the key stored at `pos` against `candidate`. Named
    /// separately from `read_at` so index chain-walks read clearly.
    pub fn matches_at(&mut self, pos: u64, candidate: &[u8]) -> Result<bool> {
        Ok(self.read_at(pos)? == candidate)
    }
}
