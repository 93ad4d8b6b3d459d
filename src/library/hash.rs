//! Streamed content hashing with per-run memoization.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Memoizes whole-file content hashes, keyed by absolute path, for the
/// lifetime of one run. Hashing the same path twice must not re-read it.
pub struct HashCache {
    hashes: HashMap<PathBuf, String>,
}

impl HashCache {
    pub fn new() -> Self {
        HashCache {
            hashes: HashMap::new(),
        }
    }

    /// Compute the lowercase hex SHA-256 of the file's full contents,
    /// reading it at most once per run.
    pub fn hash_file(&mut self, path: &Path) -> Result<String> {
        if let Some(hex) = self.hashes.get(path) {
            return Ok(hex.clone());
        }

        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        let hex = format!("{:x}", hasher.finalize());
        self.hashes.insert(path.to_path_buf(), hex.clone());
        Ok(hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn hash_is_deterministic_for_identical_content() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.mp3");
        let b = tmp.path().join("b.mp3");
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();

        let mut cache = HashCache::new();
        assert_eq!(cache.hash_file(&a).unwrap(), cache.hash_file(&b).unwrap());
    }

    #[test]
    fn second_lookup_is_served_from_the_cache() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("song.mp3");
        fs::write(&path, b"original").unwrap();

        let mut cache = HashCache::new();
        let first = cache.hash_file(&path).unwrap();

        // If the file were re-read the rewrite would change the result.
        fs::write(&path, b"rewritten").unwrap();
        assert_eq!(cache.hash_file(&path).unwrap(), first);
    }

    #[test]
    fn hex_digest_is_64_chars() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("song.mp3");
        fs::write(&path, b"riff").unwrap();

        let mut cache = HashCache::new();
        let hex = cache.hash_file(&path).unwrap();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
