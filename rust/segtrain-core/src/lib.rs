// rust/segtrain-core/src/lib.rs

//! Segmentation Training - Core Library
//!
//! This crate provides the pieces of a resumable segmentation training run:
//! manifest loading and patient-level splitting, endless reshuffled example
//! streams with augmentation, the step-indexed training loop, and durable
//! checkpoints.

pub mod config;
pub mod error;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::TrainConfig;
pub use error::{Result, TrainError};
pub use storage::{LocalStorage, ObjectMeta, StorageBackend, StorageReader, StorageWriter};

pub mod tensor;
pub use tensor::{Image, Label};

pub mod augment;
pub use augment::AugmentationStage;

pub mod decode;
pub use decode::{Example, ExampleDecoder, ImageDecoder};

pub mod dataset;
pub use dataset::{
    split, ExamplePaths, ExamplePipeline, ExampleSource, ExampleStream, Manifest, ManifestRecord,
    PrefetchingSource, SplitResult,
};

pub mod checkpoint;
pub use checkpoint::{CheckpointCoordinator, CheckpointHeader, TrainingState};

pub mod model;
pub use model::{Mode, Optimizer, SegmentationModel};

pub mod summary;
pub use summary::{CsvSummaryWriter, MemorySummarySink, SummaryRecord, SummarySink};

pub mod trainer;
pub use trainer::{LoopSettings, Trainer, TrainingReport};

pub mod session;
pub use session::{RunManifests, Session};
