//! Drive synchronization module
//!
//! This module performs the actual work against the drive:
//! - Reconciliation: walk, filter, resolve, copy (engine.rs)
//! - Pruning of destination files that no longer belong (prune.rs)

pub mod engine;
pub mod prune;
