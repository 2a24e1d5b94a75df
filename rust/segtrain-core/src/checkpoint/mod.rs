// rust/segtrain-core/src/checkpoint/mod.rs

//! Checkpoint system for saving and restoring training state.
//!
//! This module provides functionality for:
//! - Writing checkpoints with compression (none, lz4, zstd)
//! - Reading and verifying checkpoints via XXHash64 checksums
//! - Atomic writes so a partial checkpoint is never visible
//! - Retention of the newest checkpoints
//! - Resuming from the newest valid checkpoint
//!
//! # Example
//!
//! ```no_run
//! use segtrain_core::checkpoint::{CheckpointCoordinator, TrainingState};
//! use segtrain_core::config::{CheckpointConfig, StorageConfig};
//! use segtrain_core::storage::LocalStorage;
//! use std::sync::Arc;
//!
//! let storage = Arc::new(LocalStorage::new(&StorageConfig::default()).unwrap());
//! let coordinator = CheckpointCoordinator::new(storage, "run", &CheckpointConfig::default());
//!
//! let state = TrainingState { global_step: 250, model: vec![], optimizer: vec![] };
//! let path = coordinator.save(&state).unwrap();
//! assert_eq!(coordinator.resume().unwrap().global_step, 250);
//! # let _ = path;
//! ```

mod coordinator;
mod format;
mod reader;
mod writer;

pub use coordinator::CheckpointCoordinator;
pub use format::{checkpoint_file_name, parse_checkpoint_step, CheckpointHeader, TrainingState};
pub use reader::CheckpointReader;
pub use writer::CheckpointWriter;
