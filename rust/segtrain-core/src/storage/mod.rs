// rust/segtrain-core/src/storage/mod.rs

//! Storage abstraction for manifests, example files and checkpoints.
//!
//! Everything the pipeline reads or writes goes through a
//! [`StorageBackend`], so tests can point a run at a temporary directory
//! and embedders can swap in their own backend.
//!
//! # Example
//!
//! ```no_run
//! use segtrain_core::config::StorageConfig;
//! use segtrain_core::storage::{LocalStorage, StorageBackend};
//! use std::io::Write;
//! use std::path::Path;
//!
//! let storage = LocalStorage::new(&StorageConfig::default()).unwrap();
//!
//! let mut writer = storage.open_write(Path::new("run/training.csv")).unwrap();
//! writer.write_all(b"p1/a.png,p1/a_mask.png\n").unwrap();
//! writer.finish().unwrap();
//!
//! let bytes = storage.read_all(Path::new("run/training.csv")).unwrap();
//! assert!(!bytes.is_empty());
//! ```

mod local;
mod traits;

pub use local::LocalStorage;
pub use traits::{ObjectMeta, StorageBackend, StorageReader, StorageWriter};
