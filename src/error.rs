//! Crate-wide error type.
//!
//! Distinguishes the three externally-visible failure kinds from ordinary
//! domain refusals (`insert`/`erase`/`has` return `bool`, never `Error`).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open file {path}: {source}")]
    CannotOpenFile { path: PathBuf, source: io::Error },

    #[error("incompatible format: table page_length={found_page_length}, expected={expected_page_length}")]
    IncompatibleFormat {
        expected_page_length: u64,
        found_page_length: u64,
    },

    #[error("corrupted file: {0}")]
    Corrupted(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Internal-only signal distinguishing "read hit EOF cleanly" from any other
/// I/O failure. Never returned from a public API: the rehash scan matches it
/// to stop the loop, and every other caller folds it into `Error::Corrupted`.
#[derive(Debug)]
pub(crate) enum ReadOutcome<T> {
    Value(T),
    Eof,
}

pub(crate) fn fold_eof_as_corrupted<T>(outcome: ReadOutcome<T>, what: &str) -> Result<T> {
    match outcome {
        ReadOutcome::Value(v) => Ok(v),
        ReadOutcome::Eof => Err(Error::Corrupted(format!(
            "unexpected end of stream while reading {what}"
        ))),
    }
}
