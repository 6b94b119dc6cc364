//! Tunable knobs for opening a [`crate::FileHashIndex`] or [`crate::Store`].
//!
//! Patterned on `artemonad-QuiverDB/src/config.rs`'s `QuiverConfig` /
//! `DbBuilder` pair: a plain struct with sane defaults, an `from_env()`
//! constructor for deployment-time overrides, and builder-style `with_*`
//! setters for programmatic construction.

use std::env;

const DEFAULT_PAGE_LENGTH: usize = 8;
const DEFAULT_MAX_LOAD_FACTOR: f64 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Number of segment slots per page, fixed for the lifetime of a table
    /// (reopening with a different value is an incompatible-format error).
    pub page_length: usize,
    /// `rehash_if_need` doubles the bucket count once `size / bucket_count`
    /// reaches this.
    pub max_load_factor: f64,
    /// Whether to `fsync` the table and values files after every mutation
    /// that changes their length. Off by default, matching the teacher's
    /// own `fsync_on_commit` default of "only when asked."
    pub fsync_on_write: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_length: DEFAULT_PAGE_LENGTH,
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
            fsync_on_write: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a `Config` from environment variables, falling back to
    /// defaults for anything unset or unparseable:
    /// `FILEHASHDB_PAGE_LENGTH`, `FILEHASHDB_MAX_LOAD_FACTOR`,
    /// `FILEHASHDB_FSYNC_ON_WRITE` (`"1"`/`"true"`).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = env::var("FILEHASHDB_PAGE_LENGTH") {
            if let Ok(v) = raw.parse::<usize>() {
                config.page_length = v;
            }
        }
        if let Ok(raw) = env::var("FILEHASHDB_MAX_LOAD_FACTOR") {
            if let Ok(v) = raw.parse::<f64>() {
                config.max_load_factor = v;
            }
        }
        if let Ok(raw) = env::var("FILEHASHDB_FSYNC_ON_WRITE") {
            config.fsync_on_write = matches!(raw.as_str(), "1" | "true" | "TRUE" | "True");
        }

        config
    }

    pub fn with_page_length(mut self, page_length: usize) -> Self {
        self.page_length = page_length;
        self
    }

    pub fn with_max_load_factor(mut self, max_load_factor: f64) -> Self {
        self.max_load_factor = max_load_factor;
        self
    }

    pub fn with_fsync_on_write(mut self, fsync_on_write: bool) -> Self {
        self.fsync_on_write = fsync_on_write;
        self
    }
}
