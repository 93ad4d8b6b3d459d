//! The LibraryIndex manages the SQLite catalog of library files.
//!
//! It stores one record per seen file (path, content hash, size, mtime)
//! and resolves every candidate path to the canonical on-disk file for its
//! content hash, so renamed or duplicated files collapse onto one source.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::library::hash::HashCache;

const SCHEMA_VERSION: i64 = 1;

/// A library file resolved to the on-disk path that canonically carries
/// its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalFile {
    pub path: PathBuf,
    pub hash: String,
}

pub struct LibraryIndex {
    conn: Connection,
    hashes: HashCache,
}

impl LibraryIndex {
    /// Open the index database at `db_path`, creating it (and its parent
    /// directory) if needed.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        let index = LibraryIndex {
            conn,
            hashes: HashCache::new(),
        };
        index.init_schema()?;
        Ok(index)
    }

    /// Default location for the index database:
    /// - Linux: ~/.local/share/music-drive/library.db
    /// - macOS: ~/Library/Application Support/music-drive/library.db
    /// - Windows: %APPDATA%\music-drive\library.db
    pub fn default_path() -> PathBuf {
        let mut path = dirs::data_dir()
            .or_else(dirs::home_dir)
            .expect("Could not determine user data directory");

        path.push("music-drive");
        path.push("library.db");
        path
    }

    /// Initialize the database schema.
    /// Creates the files table and its indexes if they don't exist.
    fn init_schema(&self) -> Result<()> {
        // One record per library file we have hashed. Insertion order
        // (rowid) decides which duplicate is tried first as canonical.
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS files (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                path    TEXT NOT NULL UNIQUE,
                hash    TEXT NOT NULL,
                size    INTEGER NOT NULL,
                mtime   INTEGER NOT NULL
            )",
            [],
        )?;

        // Indexes for the two lookup paths: canonical-by-hash and the
        // cheap size pre-filter.
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_files_hash ON files(hash)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_files_size ON files(size)",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS meta (
                key     TEXT PRIMARY KEY,
                value   INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION],
        )?;

        Ok(())
    }

    /// Resolve a library file to its canonical source.
    ///
    /// Hashes the file (memoized for the run), records it in the index if
    /// this exact path is not yet known, then returns the first still
    /// existing path that carries the same content hash. Records whose
    /// backing file vanished are deleted on the way.
    pub fn resolve(&mut self, path: &Path) -> Result<CanonicalFile> {
        let meta = fs::metadata(path)?;
        let size = meta.len() as i64;
        let mtime = DateTime::<Utc>::from(meta.modified()?).timestamp();
        let hash = self.hashes.hash_file(path)?;
        let path_str = path.to_string_lossy().to_string();

        // Size first as a cheap pre-filter, then confirm with the full
        // hash before trusting any row.
        let same_size: Vec<(String, String)> = {
            let mut stmt = self
                .conn
                .prepare("SELECT path, hash FROM files WHERE size = ?1")?;
            let rows = stmt.query_map(params![size], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        let known = same_size
            .iter()
            .any(|(rec_path, rec_hash)| *rec_hash == hash && *rec_path == path_str);
        if !known {
            // A path whose content changed since the last run keeps its
            // row but gets the fresh hash, size and mtime.
            self.conn.execute(
                "INSERT INTO files (path, hash, size, mtime) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(path) DO UPDATE SET hash = ?2, size = ?3, mtime = ?4",
                params![path_str, hash, size, mtime],
            )?;
        }

        // Canonical lookup: oldest record with this hash whose file still
        // exists wins. Stale records are pruned lazily right here.
        let candidates: Vec<(i64, String)> = {
            let mut stmt = self
                .conn
                .prepare("SELECT id, path FROM files WHERE hash = ?1 ORDER BY id")?;
            let rows = stmt.query_map(params![hash], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        for (id, rec_path) in candidates {
            let rec = PathBuf::from(&rec_path);
            if rec.is_file() {
                return Ok(CanonicalFile { path: rec, hash });
            }
            debug!("dropping stale index record for {}", rec_path);
            self.conn
                .execute("DELETE FROM files WHERE id = ?1", params![id])?;
        }

        // The path was just inserted above, so an empty scan means the
        // storage layer lost it.
        Err(SyncError::IndexCorruption {
            hash,
            path: path.to_path_buf(),
        })
    }

    /// Get a count of records in the index.
    pub fn record_count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl std::fmt::Debug for LibraryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryIndex").finish()
    }
}
