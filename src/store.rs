//! `Store` — a key→arbitrary-length-value database, built by pairing a
//! [`FileHashIndex<u64>`] (whose stored "value" is a byte offset) with an
//! append-only [`Values`] log holding the actual value bytes.
//!
//! Grounded on `examples/original_source/hash_file_storage.hpp`'s
//! `HashedFile` template, which delegates the same way to an `index_t` plus
//! a `storage_t`, and on `artemonad-QuiverDB/src/db/kv.rs`'s `Db::put`/`get`
//! facade shape.

use std::path::Path;

use crate::config::Config;
use crate::error::Result;
use crate::index::FileHashIndex;
use crate::values::Values;

pub struct Store {
    index: FileHashIndex<u64>,
    values: Values,
}

impl Store {
    /// Open (or create) a store rooted at `dir`, using `hash_idx`,
    /// `keys_idx`, and `data` as the three on-disk files.
    pub fn open(dir: &Path, overwrite: bool, page_length: usize) -> Result<Self> {
        let index = FileHashIndex::open(
            &dir.join("hash_idx"),
            &dir.join("keys_idx"),
            overwrite,
            page_length,
        )?;
        let values = Values::open(&dir.join("data"), overwrite)?;
        Ok(Self { index, values })
    }

    /// Like [`Self::open`], but takes its page length, max load factor, and
    /// fsync policy from `config`.
    pub fn open_with_config(dir: &Path, overwrite: bool, config: &Config) -> Result<Self> {
        let index = FileHashIndex::open_with_config(
            &dir.join("hash_idx"),
            &dir.join("keys_idx"),
            overwrite,
            config,
        )?;
        let values = Values::open(&dir.join("data"), overwrite)?;
        Ok(Self { index, values })
    }

    pub fn size(&self) -> u64 {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn load_factor(&self) -> f64 {
        self.index.load_factor()
    }

    pub fn max_load_factor(&self) -> f64 {
        self.index.max_load_factor()
    }

    pub fn set_max_load_factor(&mut self, value: f64) {
        self.index.set_max_load_factor(value);
    }

    pub fn has(&mut self, key: &[u8]) -> Result<bool> {
        self.index.has(key)
    }

    /// Read back the value stored for `key`, if present.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.index.get(key)? {
            Some(offset) => Ok(Some(self.values.read_at(offset)?)),
            None => Ok(None),
        }
    }

    /// Insert `key` -> `value`. Returns `false` (and never touches the
    /// Values log) if `key` already has a live value.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        // The Index only invokes this closure once it has committed to
        // writing a new or resurrected segment, so a duplicate key never
        // causes an orphaned append to the Values log.
        let values = &mut self.values;
        let mut appended_offset = None;
        let inserted = self.index.insert_with(key, || {
            let offset = values.append(value).expect("value append must succeed");
            appended_offset = Some(offset);
            offset
        })?;
        debug_assert!(!inserted || appended_offset.is_some());
        Ok(inserted)
    }

    /// Remove `key`. The value's bytes remain in the Values log (it is
    /// append-only and never reclaims space) but become unreachable.
    pub fn erase(&mut self, key: &[u8]) -> Result<bool> {
        self.index.erase(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tmp_dir(name: &str) -> PathBuf {
        let pid = std::process::id();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("filehashdb-store-{name}-{pid}-{nanos}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn insert_get_roundtrip() {
        let dir = tmp_dir("basic");
        let mut store = Store::open(&dir, true, 6).unwrap();
        assert!(store.insert(b"name", b"alice").unwrap());
        assert!(store.insert(b"city", b"zurich").unwrap());
        assert_eq!(store.get(b"name").unwrap(), Some(b"alice".to_vec()));
        assert_eq!(store.get(b"city").unwrap(), Some(b"zurich".to_vec()));
        assert_eq!(store.get(b"missing").unwrap(), None);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn duplicate_insert_does_not_append_to_values_log() {
        let dir = tmp_dir("dup");
        let mut store = Store::open(&dir, true, 6).unwrap();
        assert!(store.insert(b"k", b"first").unwrap());
        assert!(!store.insert(b"k", b"second").unwrap());
        assert_eq!(store.get(b"k").unwrap(), Some(b"first".to_vec()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn erase_then_resurrect_with_new_value() {
        let dir = tmp_dir("resurrect");
        let mut store = Store::open(&dir, true, 6).unwrap();
        assert!(store.insert(b"k", b"v1").unwrap());
        assert!(store.erase(b"k").unwrap());
        assert_eq!(store.get(b"k").unwrap(), None);
        assert!(store.insert(b"k", b"v2").unwrap());
        assert_eq!(store.get(b"k").unwrap(), Some(b"v2".to_vec()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tmp_dir("persist");
        {
            let mut store = Store::open(&dir, true, 6).unwrap();
            for i in 0..40u32 {
                let key = format!("key-{i}");
                let value = format!("value-{i}");
                assert!(store.insert(key.as_bytes(), value.as_bytes()).unwrap());
            }
        }
        {
            let mut store = Store::open(&dir, false, 6).unwrap();
            assert_eq!(store.size(), 40);
            for i in 0..40u32 {
                let key = format!("key-{i}");
                let value = format!("value-{i}");
                assert_eq!(store.get(key.as_bytes()).unwrap(), Some(value.into_bytes()));
            }
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn grows_through_rehash_with_values_intact() {
        let dir = tmp_dir("rehash");
        let mut store = Store::open(&dir, true, 2).unwrap();
        store.set_max_load_factor(1.5);
        for i in 0..30u32 {
            let key = format!("k{i}");
            let value = format!("v{i}");
            assert!(store.insert(key.as_bytes(), value.as_bytes()).unwrap());
        }
        for i in 0..30u32 {
            let key = format!("k{i}");
            let value = format!("v{i}");
            assert_eq!(store.get(key.as_bytes()).unwrap(), Some(value.into_bytes()));
        }
        std::fs::remove_dir_all(&dir).ok();
    }
}
