//! The reconciliation engine.
//!
//! Walks the library, applies the filter rules, resolves every included
//! file to its canonical source and mirrors it into the organized and/or
//! shuffled destination trees. Copies are idempotent: a destination that
//! already exists is left alone, so re-runs only touch what is missing.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{Result, SyncError};
use crate::filter::FilterSet;
use crate::library::index::{CanonicalFile, LibraryIndex};

/// Counters reported at the end of a run.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncStats {
    /// Files newly copied onto the drive.
    pub copied: usize,
    /// Destinations that already existed and were left alone.
    pub skipped: usize,
    /// Files skipped after a local failure (unreadable source, failed
    /// copy, shuffled name collision).
    pub failed: usize,
}

/// Result of one reconciliation run.
#[derive(Debug)]
pub struct SyncOutcome {
    /// Every destination path that must exist after this run, whether
    /// newly copied or already present. Input to the prune phase.
    pub destinations: HashSet<PathBuf>,
    pub stats: SyncStats,
}

/// Reconcile the library against the two destination trees.
pub fn run(
    library_root: &Path,
    filters: &FilterSet,
    index: &mut LibraryIndex,
    organized_root: &Path,
    shuffled_root: &Path,
) -> Result<SyncOutcome> {
    if !library_root.is_dir() {
        return Err(SyncError::MissingLibrary(library_root.to_path_buf()));
    }

    fs::create_dir_all(organized_root)?;
    fs::create_dir_all(shuffled_root)?;

    let mut destinations = HashSet::new();
    let mut stats = SyncStats::default();
    // Shuffled names already claimed this run, with the content hash that
    // claimed them. A second claim with a different hash is a collision.
    let mut shuffled_seen: HashMap<PathBuf, String> = HashMap::new();

    info!("scanning all files under {}", library_root.display());

    for entry in WalkDir::new(library_root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        let relative = match path.strip_prefix(library_root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };

        let Some(mode) = filters.evaluate(relative) else {
            continue;
        };

        let canonical = match index.resolve(path) {
            Ok(canonical) => canonical,
            // A file that vanished or turned unreadable mid-run is a
            // local failure, not a reason to abort the rest.
            Err(SyncError::Io(e)) => {
                warn!("cannot resolve {}: {}", path.display(), e);
                stats.failed += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        // Destinations are derived from the canonical path, so a renamed
        // duplicate is copied from its live location.
        let canonical_rel = canonical
            .path
            .strip_prefix(library_root)
            .unwrap_or(relative)
            .to_path_buf();

        if mode.organized() {
            let dest = organized_root.join(&canonical_rel);
            deliver(&canonical.path, dest, &mut destinations, &mut stats);
        }

        if mode.shuffled() {
            let dest = shuffled_root.join(shuffled_name(&canonical));
            match shuffled_seen.get(&dest) {
                // Same content already claimed this name this run.
                Some(prev) if *prev == canonical.hash => {}
                Some(_) => {
                    warn!(
                        "shuffled name collision at {}; skipping {}",
                        dest.display(),
                        canonical.path.display()
                    );
                    stats.failed += 1;
                }
                None => {
                    shuffled_seen.insert(dest.clone(), canonical.hash.clone());
                    deliver(&canonical.path, dest, &mut destinations, &mut stats);
                }
            }
        }
    }

    Ok(SyncOutcome {
        destinations,
        stats,
    })
}

/// Flat destination name: `<stem> - <first 8 hex chars of hash><ext>`.
/// The hash fragment disambiguates equal basenames across artists/albums.
fn shuffled_name(canonical: &CanonicalFile) -> String {
    let stem = canonical
        .path
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy();
    let fragment = &canonical.hash[..8];

    match canonical.path.extension() {
        Some(ext) => format!("{} - {}.{}", stem, fragment, ext.to_string_lossy()),
        None => format!("{} - {}", stem, fragment),
    }
}

/// Copy one file into place and record the destination, counting a local
/// failure instead of aborting the run.
fn deliver(
    source: &Path,
    dest: PathBuf,
    destinations: &mut HashSet<PathBuf>,
    stats: &mut SyncStats,
) {
    match copy_file(source, &dest) {
        Ok(true) => {
            stats.copied += 1;
            destinations.insert(dest);
        }
        Ok(false) => {
            stats.skipped += 1;
            destinations.insert(dest);
        }
        Err(e) => {
            warn!("failed to copy {} to {}: {}", source.display(), dest.display(), e);
            stats.failed += 1;
        }
    }
}

/// Copy `source` to `dest` unless `dest` already exists, creating parent
/// directories and carrying over the source modification time.
/// Returns true when a new copy was made.
fn copy_file(source: &Path, dest: &Path) -> io::Result<bool> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    if dest.exists() {
        info!("skipping {}", dest.display());
        return Ok(false);
    }

    info!("copying  {}", dest.display());
    fs::copy(source, dest)?;

    let mtime = fs::metadata(source)?.modified()?;
    let copied = fs::OpenOptions::new().write(true).open(dest)?;
    copied.set_modified(mtime)?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path, contents: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn hex8(contents: &[u8]) -> String {
        let hex = format!("{:x}", Sha256::digest(contents));
        hex[..8].to_string()
    }

    struct Fixture {
        tmp: TempDir,
        library: PathBuf,
        organized: PathBuf,
        shuffled: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let library = tmp.path().join("library");
            fs::create_dir_all(&library).unwrap();
            let organized = tmp.path().join("drive/organized");
            let shuffled = tmp.path().join("drive/shuffled");
            Fixture {
                tmp,
                library,
                organized,
                shuffled,
            }
        }

        fn index(&self) -> LibraryIndex {
            LibraryIndex::open(&self.tmp.path().join("index.db")).unwrap()
        }

        fn run(&self, filters: &FilterSet, index: &mut LibraryIndex) -> SyncOutcome {
            run(
                &self.library,
                filters,
                index,
                &self.organized,
                &self.shuffled,
            )
            .unwrap()
        }
    }

    #[test]
    fn matched_file_lands_in_both_layouts() {
        let fx = Fixture::new();
        touch(&fx.library.join("Artist/Song.mp3"), b"riff");

        let filters = FilterSet::parse("Artist/**\tboth").unwrap();
        let mut index = fx.index();
        let outcome = fx.run(&filters, &mut index);

        let organized = fx.organized.join("Artist/Song.mp3");
        let shuffled = fx
            .shuffled
            .join(format!("Song - {}.mp3", hex8(b"riff")));

        assert!(organized.is_file());
        assert!(shuffled.is_file());
        assert_eq!(outcome.stats.copied, 2);
        assert_eq!(outcome.destinations.len(), 2);
        assert!(outcome.destinations.contains(&organized));
        assert!(outcome.destinations.contains(&shuffled));
    }

    #[test]
    fn mode_limits_the_layouts_a_file_reaches() {
        let fx = Fixture::new();
        touch(&fx.library.join("A/a.mp3"), b"aaa");
        touch(&fx.library.join("B/b.mp3"), b"bbb");

        let filters = FilterSet::parse("A/**\torganized\nB/**\tshuffled\n").unwrap();
        let mut index = fx.index();
        fx.run(&filters, &mut index);

        assert!(fx.organized.join("A/a.mp3").is_file());
        assert!(!fx
            .shuffled
            .join(format!("a - {}.mp3", hex8(b"aaa")))
            .exists());

        assert!(!fx.organized.join("B/b.mp3").exists());
        assert!(fx
            .shuffled
            .join(format!("b - {}.mp3", hex8(b"bbb")))
            .is_file());
    }

    #[test]
    fn excluded_files_never_reach_the_drive() {
        let fx = Fixture::new();
        touch(&fx.library.join("Artist/keep.mp3"), b"keep");
        touch(&fx.library.join("Artist/cover.jpg"), b"art");

        let filters = FilterSet::parse("!Artist/*.jpg\nArtist/**\n").unwrap();
        let mut index = fx.index();
        let outcome = fx.run(&filters, &mut index);

        assert!(fx.organized.join("Artist/keep.mp3").is_file());
        assert!(!fx.organized.join("Artist/cover.jpg").exists());
        assert_eq!(outcome.stats.failed, 0);
    }

    #[test]
    fn rerun_copies_nothing_and_returns_the_same_set() {
        let fx = Fixture::new();
        touch(&fx.library.join("Artist/Song.mp3"), b"riff");

        let filters = FilterSet::parse("Artist/**").unwrap();
        let mut index = fx.index();
        let first = fx.run(&filters, &mut index);

        let dest = fx.organized.join("Artist/Song.mp3");
        let mtime_after_first = fs::metadata(&dest).unwrap().modified().unwrap();

        let mut index = fx.index();
        let second = fx.run(&filters, &mut index);

        assert_eq!(second.stats.copied, 0);
        assert_eq!(second.stats.skipped, 2);
        assert_eq!(first.destinations, second.destinations);
        // The destination was not rewritten.
        assert_eq!(
            fs::metadata(&dest).unwrap().modified().unwrap(),
            mtime_after_first
        );
    }

    #[test]
    fn copies_preserve_the_source_modification_time() {
        let fx = Fixture::new();
        let source = fx.library.join("Artist/Song.mp3");
        touch(&source, b"riff");

        let filters = FilterSet::parse("Artist/**\torganized").unwrap();
        let mut index = fx.index();
        fx.run(&filters, &mut index);

        let dest = fx.organized.join("Artist/Song.mp3");
        assert_eq!(
            fs::metadata(&dest).unwrap().modified().unwrap(),
            fs::metadata(&source).unwrap().modified().unwrap()
        );
    }

    #[test]
    fn duplicate_content_is_copied_from_one_canonical_source() {
        let fx = Fixture::new();
        touch(&fx.library.join("A/song.mp3"), b"identical");
        touch(&fx.library.join("B/song.mp3"), b"identical");

        let filters = FilterSet::parse("**").unwrap();
        let mut index = fx.index();
        let outcome = fx.run(&filters, &mut index);

        // One organized copy at the canonical location plus one shuffled
        // copy, never four files.
        assert_eq!(outcome.stats.copied, 2);
        let a = fx.organized.join("A/song.mp3");
        let b = fx.organized.join("B/song.mp3");
        assert!(a.is_file() ^ b.is_file());

        let shuffled: Vec<_> = fs::read_dir(&fx.shuffled)
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(shuffled.len(), 1);
    }

    #[test]
    fn missing_library_root_is_fatal() {
        let fx = Fixture::new();
        let filters = FilterSet::parse("**").unwrap();
        let mut index = fx.index();

        let err = run(
            &fx.tmp.path().join("no-such-library"),
            &filters,
            &mut index,
            &fx.organized,
            &fx.shuffled,
        )
        .unwrap_err();

        assert!(matches!(err, SyncError::MissingLibrary(_)));
    }

    #[test]
    fn shuffled_names_are_deterministic() {
        let canonical = CanonicalFile {
            path: PathBuf::from("/lib/Artist/Song.mp3"),
            hash: "deadbeef0123456789".to_string(),
        };
        assert_eq!(shuffled_name(&canonical), "Song - deadbeef.mp3");

        let bare = CanonicalFile {
            path: PathBuf::from("/lib/Artist/README"),
            hash: "cafebabe0123456789".to_string(),
        };
        assert_eq!(shuffled_name(&bare), "README - cafebabe");
    }
}
