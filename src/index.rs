//! `FileHashIndex` — a paged, separately-chained hash table laid out
//! directly on disk, with an auxiliary append-only key file for
//! variable-length keys. This is the core of the crate; everything else
//! (`Store`, `Values`) is a thin layer around it.
//!
//! Grounded on `examples/original_source/hash_file_storage.hpp`'s
//! `FileHashIndex` class (bucket head offset arithmetic, chain-walk
//! insert/lookup/erase, rehash-by-rename-and-replay), reimplemented in the
//! byte-buffer-over-`File` idiom QuiverDB uses throughout its own page
//! layer (`src/page_rh/header.rs`, `src/page_rh/table.rs`).

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, ReadOutcome, Result};
use crate::hash::{bucket_of, hash64};
use crate::keys::Keys;
use crate::page::{
    new_empty_page, page_byte_size, read_next_page_pos, read_seg_count, read_segment,
    write_next_page_pos, write_seg_count, write_segment, IndexValue, SegState, Segment,
};
use crate::stream::Stream;

/// `[bucket_count: u64][size: u64][page_length: u64]`.
const TABLE_HEADER_SIZE: u64 = 24;

/// Tagged key representation shared by the two insert entry paths: a raw
/// key (first-time insertion, not yet in the Keys file) or an already
/// resolved `(hash, key_adress)` pair (the rehash path, which must not
/// re-append to Keys). Mirrors the source's `key_variant_t` without needing
/// a variant/visitor library.
enum InsertKey<'a> {
    Raw(&'a [u8]),
    Resolved { hash: u64, key_adress: u64 },
}

impl InsertKey<'_> {
    fn hash(&self) -> u64 {
        match self {
            InsertKey::Raw(bytes) => hash64(bytes),
            InsertKey::Resolved { hash, .. } => *hash,
        }
    }
}

pub struct FileHashIndex<V: IndexValue> {
    table_path: PathBuf,
    table: Option<Stream>,
    keys: Keys,
    bucket_count: u64,
    size: u64,
    page_length: usize,
    max_load_factor: f64,
    fsync_on_write: bool,
    _value: PhantomData<V>,
}

impl<V: IndexValue> FileHashIndex<V> {
    /// Open (or create) the index backed by `table_path`/`keys_path`.
    ///
    /// `overwrite = true` truncates both files and starts a fresh table
    /// with 2 buckets. `overwrite = false` reopens an existing table and
    /// fails with [`Error::IncompatibleFormat`] if its stored page length
    /// differs from `page_length`.
    pub fn open(table_path: &Path, keys_path: &Path, overwrite: bool, page_length: usize) -> Result<Self> {
        if page_length == 0 {
            return Err(Error::Corrupted("page_length must be >= 1".to_string()));
        }
        let keys = Keys::open(keys_path, overwrite)?;
        let mut index = Self {
            table_path: table_path.to_path_buf(),
            table: None,
            keys,
            bucket_count: 0,
            size: 0,
            page_length,
            max_load_factor: (page_length as f64) * 0.75,
            fsync_on_write: false,
            _value: PhantomData,
        };
        if overwrite {
            index.create_table(2)?;
        } else {
            index.open_existing_table()?;
        }
        Ok(index)
    }

    /// Like [`Self::open`], but takes its page length, max load factor, and
    /// fsync policy from `config` instead of defaults.
    pub fn open_with_config(
        table_path: &Path,
        keys_path: &Path,
        overwrite: bool,
        config: &Config,
    ) -> Result<Self> {
        let mut index = Self::open(table_path, keys_path, overwrite, config.page_length)?;
        index.set_max_load_factor(config.max_load_factor);
        index.fsync_on_write = config.fsync_on_write;
        Ok(index)
    }

    pub fn bucket_count(&self) -> u64 {
        self.bucket_count
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn page_length(&self) -> usize {
        self.page_length
    }

    pub fn load_factor(&self) -> f64 {
        self.size.max(1) as f64 / self.bucket_count as f64
    }

    pub fn max_load_factor(&self) -> f64 {
        self.max_load_factor
    }

    pub fn set_max_load_factor(&mut self, value: f64) {
        assert!(value >= 1.0, "max_load_factor must be >= 1.0");
        self.max_load_factor = value;
    }

    /// Look up `key`, returning its value if an alive segment matches.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<V>> {
        let hash = hash64(key);
        let mut page_pos = self.bucket_head_pos(hash);
        loop {
            let page = self.read_page(page_pos)?;
            let seg_count = read_seg_count::<V>(&page, self.page_length)?;
            for slot in 0..seg_count {
                let seg = read_segment::<V>(&page, slot)?;
                if seg.state != SegState::Alive || seg.hash != hash {
                    continue;
                }
                if self.keys.matches_at(seg.key_adress, key)? {
                    return Ok(Some(seg.value));
                }
            }
            let next = read_next_page_pos::<V>(&page, self.page_length);
            if next == 0 {
                return Ok(None);
            }
            page_pos = next as u64;
        }
    }

    pub fn has(&mut self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Insert `key` with a precomputed value. Returns `false` if an alive
    /// segment for `key` already exists (duplicate).
    pub fn insert(&mut self, key: &[u8], value: V) -> Result<bool> {
        self.insert_with(key, || value)
    }

    /// Insert `key`, producing the value lazily. `value_fn` is invoked at
    /// most once, and only once this call has committed to writing a new
    /// or resurrected segment — never on the duplicate-refusal path. This
    /// is what lets [`crate::store::Store`] avoid appending to the Values
    /// log when the Index is going to reject the insert.
    pub fn insert_with<F: FnOnce() -> V>(&mut self, key: &[u8], value_fn: F) -> Result<bool> {
        self.rehash_if_need()?;
        let inserted = self.insert_at_chain(InsertKey::Raw(key), value_fn, SegState::Alive)?;
        if inserted {
            self.size += 1;
        }
        Ok(inserted)
    }

    /// Erase `key`. Returns `false` if no alive segment matched. The
    /// segment is tombstoned in place (state -> dead); its Keys file
    /// offset is retained so a later insert of the same key can resurrect
    /// it without appending a new key record.
    pub fn erase(&mut self, key: &[u8]) -> Result<bool> {
        let hash = hash64(key);
        let mut page_pos = self.bucket_head_pos(hash);
        loop {
            let mut page = self.read_page(page_pos)?;
            let seg_count = read_seg_count::<V>(&page, self.page_length)?;
            for slot in 0..seg_count {
                let seg = read_segment::<V>(&page, slot)?;
                if seg.state != SegState::Alive || seg.hash != hash {
                    continue;
                }
                if self.keys.matches_at(seg.key_adress, key)? {
                    let mut tombstoned = seg;
                    tombstoned.state = SegState::Dead;
                    write_segment::<V>(&mut page, slot, &tombstoned);
                    self.write_page(page_pos, &page)?;
                    self.size -= 1;
                    return Ok(true);
                }
            }
            let next = read_next_page_pos::<V>(&page, self.page_length);
            if next == 0 {
                return Ok(false);
            }
            page_pos = next as u64;
        }
    }

    /// Double the bucket count if the load factor has reached
    /// `max_load_factor`. Returns whether a rehash happened.
    pub fn rehash_if_need(&mut self) -> Result<bool> {
        if self.load_factor() >= self.max_load_factor {
            self.rehash(self.bucket_count * 2)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Rehash to exactly fill the table at the current max load factor.
    pub fn shrink_to_fit(&mut self) -> Result<()> {
        let pseudo_size = self.size.max(1) as f64;
        let new_bucket_count = (pseudo_size / self.max_load_factor).ceil() as u64;
        self.rehash(new_bucket_count.max(1))
    }

    /// Rewrite the whole table into a fresh file with `new_bucket_count`
    /// buckets, preserving every alive and dead segment. The transient
    /// `<table_path>_old` file exists only for the duration of this call.
    pub fn rehash(&mut self, new_bucket_count: u64) -> Result<()> {
        assert!(new_bucket_count > 0, "new_bucket_count must be > 0");
        log::debug!(
            "rehash: {} -> {} buckets ({} live segments)",
            self.bucket_count,
            new_bucket_count,
            self.size
        );

        let old_path = old_table_path(&self.table_path);
        // Close the current table handle before renaming (required on
        // platforms that refuse to rename an open file).
        self.table = None;
        std::fs::rename(&self.table_path, &old_path).map_err(|source| Error::CannotOpenFile {
            path: old_path.clone(),
            source,
        })?;

        self.create_table(new_bucket_count)?;
        // Recount alive segments from scratch rather than trusting the old
        // header's `size` (spec's permitted "cleaner invariant" choice).
        self.size = 0;

        let mut old = Stream::open(&old_path, false)?;
        let page_len_bytes = page_byte_size::<V>(self.page_length) as u64;
        let mut buf = vec![0u8; page_len_bytes as usize];
        let mut pos = TABLE_HEADER_SIZE;
        loop {
            match old.read_at_raw(pos, &mut buf)? {
                ReadOutcome::Eof => break,
                ReadOutcome::Value(()) => {}
            }
            let seg_count = read_seg_count::<V>(&buf, self.page_length)?;
            for slot in 0..seg_count {
                let seg: Segment<V> = read_segment::<V>(&buf, slot)?;
                let state = seg.state;
                let value = seg.value;
                let inserted = self.insert_at_chain(
                    InsertKey::Resolved {
                        hash: seg.hash,
                        key_adress: seg.key_adress,
                    },
                    move || value,
                    state,
                )?;
                debug_assert!(inserted, "rehash reinsert of an existing segment must succeed");
                if state == SegState::Alive {
                    self.size += 1;
                }
            }
            pos += page_len_bytes;
        }
        drop(old);
        std::fs::remove_file(&old_path)?;
        log::debug!("rehash complete: bucket_count={} size={}", self.bucket_count, self.size);
        Ok(())
    }

    // ---- internal plumbing ----

    fn bucket_head_pos(&self, hash: u64) -> u64 {
        let bucket = bucket_of(hash, self.bucket_count);
        TABLE_HEADER_SIZE + page_byte_size::<V>(self.page_length) as u64 * bucket
    }

    fn table_mut(&mut self) -> Result<&mut Stream> {
        self.table
            .as_mut()
            .ok_or_else(|| Error::Corrupted("table stream is not open".to_string()))
    }

    fn read_page(&mut self, pos: u64) -> Result<Vec<u8>> {
        let mut buf = new_empty_page::<V>(self.page_length);
        self.table_mut()?.read_at(pos, &mut buf)?;
        Ok(buf)
    }

    fn write_page(&mut self, pos: u64, buf: &[u8]) -> Result<()> {
        let fsync = self.fsync_on_write;
        let table = self.table_mut()?;
        table.write_at(pos, buf)?;
        if fsync {
            table.sync()?;
        }
        Ok(())
    }

    fn append_page(&mut self, buf: &[u8]) -> Result<u64> {
        self.table_mut()?.append_bytes(buf)
    }

    fn create_table(&mut self, bucket_count: u64) -> Result<()> {
        let mut table = Stream::open(&self.table_path, true)?;
        table.goto_begin()?;
        table.write_bytes(&bucket_count.to_le_bytes())?;
        table.write_bytes(&0u64.to_le_bytes())?;
        table.write_bytes(&(self.page_length as u64).to_le_bytes())?;
        let empty = new_empty_page::<V>(self.page_length);
        for _ in 0..bucket_count {
            table.write_bytes(&empty)?;
        }
        table.sync()?;
        self.table = Some(table);
        self.bucket_count = bucket_count;
        self.size = 0;
        Ok(())
    }

    fn open_existing_table(&mut self) -> Result<()> {
        let mut table = Stream::open(&self.table_path, false)?;
        let bucket_count = table.read_u64_at(0)?;
        let size = table.read_u64_at(8)?;
        let stored_page_length = table.read_u64_at(16)?;
        if stored_page_length != self.page_length as u64 {
            return Err(Error::IncompatibleFormat {
                expected_page_length: self.page_length as u64,
                found_page_length: stored_page_length,
            });
        }
        self.table = Some(table);
        self.bucket_count = bucket_count;
        self.size = size;
        Ok(())
    }

    fn flush_header(&mut self) -> Result<()> {
        let bucket_count = self.bucket_count;
        let size = self.size;
        let page_length = self.page_length as u64;
        let table = self.table_mut()?;
        table.set_pos(0)?;
        table.write_bytes(&bucket_count.to_le_bytes())?;
        table.write_bytes(&size.to_le_bytes())?;
        table.write_bytes(&page_length.to_le_bytes())?;
        table.sync()?;
        Ok(())
    }

    /// Shared chain-walk for both insert entry paths (spec §4.3). Does not
    /// touch `size` or call `rehash_if_need` — callers are responsible for
    /// both, so the rehash replay path can reinsert without recursing.
    fn insert_at_chain<F>(&mut self, key: InsertKey<'_>, value_fn: F, initial_state: SegState) -> Result<bool>
    where
        F: FnOnce() -> V,
    {
        let hash = key.hash();
        let mut value_fn = Some(value_fn);
        let mut page_pos = self.bucket_head_pos(hash);
        loop {
            let mut page = self.read_page(page_pos)?;
            let seg_count = read_seg_count::<V>(&page, self.page_length)?;

            for slot in 0..seg_count {
                let seg = read_segment::<V>(&page, slot)?;
                if seg.hash != hash {
                    continue;
                }
                let same_key = match &key {
                    InsertKey::Raw(bytes) => self.keys.matches_at(seg.key_adress, bytes)?,
                    InsertKey::Resolved { key_adress, .. } => *key_adress == seg.key_adress,
                };
                if !same_key {
                    continue;
                }
                match seg.state {
                    SegState::Alive => return Ok(false),
                    SegState::Dead => {
                        let value = value_fn.take().expect("value_fn invoked twice")();
                        let resurrected = Segment {
                            state: initial_state,
                            hash,
                            key_adress: seg.key_adress,
                            value,
                        };
                        write_segment::<V>(&mut page, slot, &resurrected);
                        self.write_page(page_pos, &page)?;
                        return Ok(true);
                    }
                    SegState::Empty => {
                        return Err(Error::Corrupted(
                            "occupied segment prefix contains an Empty state".to_string(),
                        ))
                    }
                }
            }

            if seg_count < self.page_length {
                let key_adress = match &key {
                    InsertKey::Raw(bytes) => self.keys.append(bytes)?,
                    InsertKey::Resolved { key_adress, .. } => *key_adress,
                };
                let value = value_fn.take().expect("value_fn invoked twice")();
                let seg = Segment {
                    state: initial_state,
                    hash,
                    key_adress,
                    value,
                };
                write_segment::<V>(&mut page, seg_count, &seg);
                write_seg_count::<V>(&mut page, self.page_length, seg_count + 1);
                self.write_page(page_pos, &page)?;
                return Ok(true);
            }

            let next = read_next_page_pos::<V>(&page, self.page_length);
            if next != 0 {
                page_pos = next as u64;
            } else {
                let new_page = new_empty_page::<V>(self.page_length);
                let new_pos = self.append_page(&new_page)?;
                write_next_page_pos::<V>(&mut page, self.page_length, new_pos as i64);
                self.write_page(page_pos, &page)?;
                page_pos = new_pos;
            }
        }
    }
}

impl<V: IndexValue> Drop for FileHashIndex<V> {
    fn drop(&mut self) {
        if self.table.is_some() {
            let _ = self.flush_header();
        }
    }
}

fn old_table_path(table_path: &Path) -> PathBuf {
    let mut name = table_path.as_os_str().to_os_string();
    name.push("_old");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(name: &str) -> PathBuf {
        let pid = std::process::id();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("filehashdb-index-{name}-{pid}-{nanos}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn open_fresh(dir: &Path, page_length: usize) -> FileHashIndex<u64> {
        FileHashIndex::open(&dir.join("hash_idx"), &dir.join("keys_idx"), true, page_length).unwrap()
    }

    #[test]
    fn insert_get_has_roundtrip() {
        let dir = tmp_dir("basic");
        let mut idx = open_fresh(&dir, 6);
        assert!(idx.insert(b"a", 10).unwrap());
        assert!(idx.insert(b"b", 12).unwrap());
        assert!(idx.has(b"a").unwrap());
        assert!(idx.has(b"b").unwrap());
        assert!(!idx.has(b"c").unwrap());
        assert_eq!(idx.get(b"a").unwrap(), Some(10));
        assert_eq!(idx.get(b"asdasd").unwrap(), None);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let dir = tmp_dir("dup");
        let mut idx = open_fresh(&dir, 6);
        assert!(idx.insert(b"k", 1).unwrap());
        assert!(!idx.insert(b"k", 2).unwrap());
        assert_eq!(idx.get(b"k").unwrap(), Some(1));
        assert_eq!(idx.size(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn erase_then_resurrect() {
        let dir = tmp_dir("resurrect");
        let mut idx = open_fresh(&dir, 6);
        assert!(idx.insert(b"k", 1).unwrap());
        assert!(idx.erase(b"k").unwrap());
        assert!(!idx.has(b"k").unwrap());
        assert!(idx.insert(b"k", 2).unwrap());
        assert_eq!(idx.get(b"k").unwrap(), Some(2));
        assert_eq!(idx.size(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn erase_missing_key_returns_false() {
        let dir = tmp_dir("erase-missing");
        let mut idx = open_fresh(&dir, 6);
        assert!(!idx.erase(b"nope").unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn grows_through_rehash_and_preserves_all_entries() {
        let dir = tmp_dir("rehash");
        let mut idx = open_fresh(&dir, 2);
        idx.set_max_load_factor(1.5);
        let mut last_bucket_count = idx.bucket_count();
        for i in 0..20u64 {
            let key = format!("k{i}");
            assert!(idx.insert(key.as_bytes(), i).unwrap());
            assert!(idx.load_factor() <= idx.max_load_factor());
            assert!(idx.bucket_count() >= last_bucket_count);
            last_bucket_count = idx.bucket_count();
        }
        for i in 0..20u64 {
            let key = format!("k{i}");
            assert_eq!(idx.get(key.as_bytes()).unwrap(), Some(i));
        }
        assert_eq!(idx.size(), 20);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tmp_dir("persist");
        let table = dir.join("hash_idx");
        let keys = dir.join("keys_idx");
        {
            let mut idx: FileHashIndex<u64> = FileHashIndex::open(&table, &keys, true, 6).unwrap();
            for i in 0..50u64 {
                let key = format!("key-{i}");
                assert!(idx.insert(key.as_bytes(), i * 10).unwrap());
            }
        }
        {
            let mut idx: FileHashIndex<u64> = FileHashIndex::open(&table, &keys, false, 6).unwrap();
            assert_eq!(idx.size(), 50);
            for i in 0..50u64 {
                let key = format!("key-{i}");
                assert_eq!(idx.get(key.as_bytes()).unwrap(), Some(i * 10));
            }
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reopen_with_different_page_length_is_incompatible_format() {
        let dir = tmp_dir("incompatible");
        let table = dir.join("hash_idx");
        let keys = dir.join("keys_idx");
        {
            let _idx: FileHashIndex<u64> = FileHashIndex::open(&table, &keys, true, 6).unwrap();
        }
        let err = FileHashIndex::<u64>::open(&table, &keys, false, 10).unwrap_err();
        assert!(matches!(err, Error::IncompatibleFormat { .. }));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rehash_preserves_key_value_mapping_for_any_new_bucket_count() {
        let dir = tmp_dir("rehash-manual");
        let mut idx = open_fresh(&dir, 4);
        for i in 0..30u64 {
            let key = format!("rk{i}");
            idx.insert(key.as_bytes(), i).unwrap();
        }
        idx.erase(b"rk3").unwrap();
        idx.rehash(64).unwrap();
        for i in 0..30u64 {
            let key = format!("rk{i}");
            if i == 3 {
                assert_eq!(idx.get(key.as_bytes()).unwrap(), None);
            } else {
                assert_eq!(idx.get(key.as_bytes()).unwrap(), Some(i));
            }
        }
        assert_eq!(idx.size(), 29);
        std::fs::remove_dir_all(&dir).ok();
    }
}
