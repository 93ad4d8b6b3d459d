//! Error types shared across the sync pipeline.
//!
//! Everything here is fatal except where the engine explicitly recovers:
//! a failed copy of a single file is logged and skipped, while the error
//! kinds below abort the run with a non-zero exit.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// A rule file line that cannot be compiled into a filter.
    #[error("malformed rule on line {line}: {message}")]
    Config { line: usize, message: String },

    #[error("cannot read rule file {path}: {source}")]
    RuleFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("library root {0} does not exist or is not a directory")]
    MissingLibrary(PathBuf),

    /// A record that was just written could not be re-resolved by hash.
    /// Indicates a storage-layer bug, not a bad library.
    #[error("index corruption: no live record for hash {hash} while resolving {path}")]
    IndexCorruption { hash: String, path: PathBuf },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
