//! Deletion of destination files that no longer belong on the drive.
//!
//! Runs strictly after reconciliation so the keep-set is complete. Only
//! regular files are ever deleted; directories are left in place.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::Result;

/// Walk the destination roots and delete every regular file that is not
/// in `keep`. Returns the number of files deleted.
pub fn prune(roots: &[&Path], keep: &HashSet<PathBuf>) -> Result<usize> {
    let mut deleted = 0;

    for root in roots {
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();

            if !path.is_file() {
                continue;
            }
            if keep.contains(path) {
                continue;
            }

            debug!("deleting {}", path.display());
            fs::remove_file(path)?;
            deleted += 1;
        }
    }

    Ok(deleted)
}
