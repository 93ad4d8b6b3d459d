//! music-drive
//!
//! Syncs a filtered subset of a music library onto a removable drive.
//! An include file on the drive selects which library files to copy and
//! into which layout: `organized` mirrors the library tree, `shuffled`
//! flattens everything into one directory with hash-disambiguated names.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod error;
mod filter;
mod library;
mod sync;

use error::{Result, SyncError};
use filter::FilterSet;
use library::index::LibraryIndex;

#[derive(Parser, Debug)]
#[command(
    name = "music-drive",
    version,
    about = "Sync a filtered subset of a music library onto a removable drive"
)]
struct Cli {
    /// Path to root folder of music library
    library: PathBuf,

    /// Path to folder on flash drive to manage
    drive_folder: PathBuf,

    /// Relative to DRIVE_FOLDER, path to the file that tells us what
    /// music files to include
    #[arg(long, default_value = "include.txt")]
    include_file: PathBuf,

    /// Relative to DRIVE_FOLDER, path to directory that contains music in
    /// the same organization as in the library
    #[arg(long, default_value = "organized")]
    organized_dir: PathBuf,

    /// Relative to DRIVE_FOLDER, path to directory that contains music
    /// shuffled all together
    #[arg(long, default_value = "shuffled")]
    shuffled_dir: PathBuf,

    /// Location of the library index database
    #[arg(long)]
    index_file: Option<PathBuf>,

    /// If a music file on the drive doesn't match any included file in
    /// the library, delete it
    #[arg(long)]
    delete_excluded_files: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let library_root = fs::canonicalize(&cli.library)
        .map_err(|_| SyncError::MissingLibrary(cli.library.clone()))?;
    if !library_root.is_dir() {
        return Err(SyncError::MissingLibrary(cli.library));
    }

    let include_file = cli.drive_folder.join(&cli.include_file);
    let organized_root = cli.drive_folder.join(&cli.organized_dir);
    let shuffled_root = cli.drive_folder.join(&cli.shuffled_dir);
    let index_path = cli.index_file.unwrap_or_else(LibraryIndex::default_path);

    let text = fs::read_to_string(&include_file).map_err(|e| SyncError::RuleFile {
        path: include_file.clone(),
        source: e,
    })?;
    let filters = FilterSet::parse(&text)?;
    info!(
        "loaded {} filters from {}",
        filters.len(),
        include_file.display()
    );

    let mut index = LibraryIndex::open(&index_path)?;
    info!("index tracks {} library files", index.record_count()?);

    let outcome = sync::engine::run(
        &library_root,
        &filters,
        &mut index,
        &organized_root,
        &shuffled_root,
    )?;

    let mut pruned = 0;
    if cli.delete_excluded_files {
        pruned = sync::prune::prune(&[&organized_root, &shuffled_root], &outcome.destinations)?;
    }

    info!(
        "sync complete: {} copied, {} already present, {} failed, {} pruned",
        outcome.stats.copied, outcome.stats.skipped, outcome.stats.failed, pruned
    );

    Ok(())
}
