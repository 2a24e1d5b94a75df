// rust/segtrain-core/src/dataset/mod.rs

//! Dataset handling: manifests, patient splits and example streams.
//!
//! # Example
//!
//! ```no_run
//! use segtrain_core::config::StorageConfig;
//! use segtrain_core::dataset::{split, ExampleStream, Manifest};
//! use segtrain_core::storage::LocalStorage;
//! use std::path::Path;
//!
//! let storage = LocalStorage::new(&StorageConfig::default()).unwrap();
//! let manifest = Manifest::load(&storage, Path::new("training.csv")).unwrap();
//!
//! let parts = split(&manifest, 10, Some(7)).unwrap();
//! parts.persist(&storage, Path::new("run")).unwrap();
//!
//! let mut stream = ExampleStream::new(&parts.training).unwrap();
//! let paths = stream.next_pair();
//! println!("{} -> {}", paths.image, paths.label);
//! ```

mod manifest;
mod prefetch;
mod split;
mod stream;

pub use manifest::{patient_of, Manifest, ManifestRecord};
pub use prefetch::{ExamplePipeline, ExampleSource, PrefetchingSource};
pub use split::{split, SplitResult, TRAINING_MANIFEST, VALIDATION_MANIFEST};
pub use stream::{ExamplePaths, ExampleStream};
