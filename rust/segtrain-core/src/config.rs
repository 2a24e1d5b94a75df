// rust/segtrain-core/src/config.rs

//! Configuration management for segmentation training runs.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, TrainError};

// Top-level run configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub data: DataConfig,
    pub training: TrainingConfig,
    pub schedule: ScheduleConfig,
    pub checkpoint: CheckpointConfig,
    pub prefetch: PrefetchConfig,
    pub storage: StorageConfig,
}

/// Where the examples come from and how validation data is chosen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory that manifest paths are relative to.
    pub data_dir: PathBuf,
    /// Manifest with `image,label` pairs used for training.
    pub csv_path: PathBuf,
    /// Optional validation manifest. When absent the training manifest is
    /// split by patient.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val_csv_path: Option<PathBuf>,
    /// Number of patients held out for validation when splitting.
    pub num_val_patients: usize,
    /// Seed for the patient split. Random when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_seed: Option<u64>,
}

// Optimization settings and run directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    // Number of steps to run (after any restored step).
    pub training_steps: u64,
    pub learning_rate: f64,
    // Weight of the model's regularization term in the total loss.
    pub regularization_weight: f64,
    // Restore the latest checkpoint in `model_dir` before training.
    pub resume_training: bool,
    // Folder for checkpoints, summaries and persisted splits.
    pub model_dir: PathBuf,
    // Seed for example shuffling and augmentation. Random when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Step intervals for the periodic actions of the training loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub summary_interval: u64,
    pub validation_interval: u64,
    pub checkpoint_interval: u64,
    /// Validation examples averaged per evaluation.
    pub validation_sample_size: usize,
}

// Checkpoint configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    // Base name of checkpoint artifacts ("<name>-<step>.ckpt").
    pub name: String,
    // Compression algorithm: "none", "lz4", or "zstd".
    pub compression: String,
    // Compression level (algorithm-specific).
    pub compression_level: i32,
    // Number of recent checkpoints to keep.
    pub keep_last_n: usize,
    // Whether to use atomic writes (write to temp then rename).
    pub atomic_writes: bool,
}

/// Background read-ahead for example streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Whether each stream gets a prefetch worker.
    pub enabled: bool,
    /// Decoded examples buffered ahead of the training loop.
    pub capacity: usize,
}

// Storage configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    // Base path that relative paths are resolved against.
    pub base_path: PathBuf,
    // Buffer size in bytes for I/O operations.
    pub buffer_size: usize,
    // Whether to use memory-mapped I/O.
    pub use_mmap: bool,
    // File size threshold (bytes) above which to use mmap.
    pub mmap_threshold: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            csv_path: PathBuf::from("training.csv"),
            val_csv_path: None,
            num_val_patients: 10,
            split_seed: None,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            training_steps: 163 * 8 * 5, // 163 mammograms * 8 augmentations * 5 epochs
            learning_rate: 4e-5,
            regularization_weight: 4e-4,
            resume_training: false,
            model_dir: PathBuf::from("run"),
            seed: None,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            summary_interval: 50,
            validation_interval: 100,
            checkpoint_interval: 250,
            validation_sample_size: 5,
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            name: "chkpt".to_string(),
            compression: "lz4".to_string(),
            compression_level: 1,
            keep_last_n: 5,
            atomic_writes: true,
        }
    }
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 5,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            buffer_size: 64 * 1024, // 64 KB
            use_mmap: true,
            mmap_threshold: 8 * 1024 * 1024, // 8 MB
        }
    }
}

impl FromStr for TrainConfig {
    type Err = TrainError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| TrainError::config_with_source("failed to parse TOML config", e))
    }
}

/// Parses `name` from the environment into `target`, ignoring unparsable values.
fn override_parsed<T: FromStr>(name: &str, target: &mut T) {
    if let Ok(val) = std::env::var(name) {
        if let Ok(v) = val.parse() {
            *target = v;
        }
    }
}

impl TrainConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TrainError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `SEGTRAIN_` and use underscores
    // to separate nested fields. For example:
    // - `SEGTRAIN_DATA_DATA_DIR` overrides `data.data_dir`
    // - `SEGTRAIN_TRAINING_RESUME_TRAINING` overrides `training.resume_training`
    // - `SEGTRAIN_SCHEDULE_VALIDATION_INTERVAL` overrides `schedule.validation_interval`
    // - `SEGTRAIN_CHECKPOINT_COMPRESSION` overrides `checkpoint.compression`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Data overrides
        if let Ok(val) = std::env::var("SEGTRAIN_DATA_DATA_DIR") {
            self.data.data_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("SEGTRAIN_DATA_CSV_PATH") {
            self.data.csv_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("SEGTRAIN_DATA_VAL_CSV_PATH") {
            self.data.val_csv_path = if val.is_empty() { None } else { Some(PathBuf::from(val)) };
        }
        override_parsed("SEGTRAIN_DATA_NUM_VAL_PATIENTS", &mut self.data.num_val_patients);
        if let Ok(val) = std::env::var("SEGTRAIN_DATA_SPLIT_SEED") {
            if let Ok(v) = val.parse() {
                self.data.split_seed = Some(v);
            }
        }

        // Training overrides
        override_parsed("SEGTRAIN_TRAINING_TRAINING_STEPS", &mut self.training.training_steps);
        override_parsed("SEGTRAIN_TRAINING_LEARNING_RATE", &mut self.training.learning_rate);
        override_parsed(
            "SEGTRAIN_TRAINING_REGULARIZATION_WEIGHT",
            &mut self.training.regularization_weight,
        );
        override_parsed("SEGTRAIN_TRAINING_RESUME_TRAINING", &mut self.training.resume_training);
        if let Ok(val) = std::env::var("SEGTRAIN_TRAINING_MODEL_DIR") {
            self.training.model_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("SEGTRAIN_TRAINING_SEED") {
            if let Ok(v) = val.parse() {
                self.training.seed = Some(v);
            }
        }

        // Schedule overrides
        override_parsed("SEGTRAIN_SCHEDULE_SUMMARY_INTERVAL", &mut self.schedule.summary_interval);
        override_parsed(
            "SEGTRAIN_SCHEDULE_VALIDATION_INTERVAL",
            &mut self.schedule.validation_interval,
        );
        override_parsed(
            "SEGTRAIN_SCHEDULE_CHECKPOINT_INTERVAL",
            &mut self.schedule.checkpoint_interval,
        );
        override_parsed(
            "SEGTRAIN_SCHEDULE_VALIDATION_SAMPLE_SIZE",
            &mut self.schedule.validation_sample_size,
        );

        // Checkpoint overrides
        if let Ok(val) = std::env::var("SEGTRAIN_CHECKPOINT_NAME") {
            self.checkpoint.name = val;
        }
        if let Ok(val) = std::env::var("SEGTRAIN_CHECKPOINT_COMPRESSION") {
            self.checkpoint.compression = val;
        }
        override_parsed(
            "SEGTRAIN_CHECKPOINT_COMPRESSION_LEVEL",
            &mut self.checkpoint.compression_level,
        );
        override_parsed("SEGTRAIN_CHECKPOINT_KEEP_LAST_N", &mut self.checkpoint.keep_last_n);
        override_parsed("SEGTRAIN_CHECKPOINT_ATOMIC_WRITES", &mut self.checkpoint.atomic_writes);

        // Prefetch overrides
        override_parsed("SEGTRAIN_PREFETCH_ENABLED", &mut self.prefetch.enabled);
        override_parsed("SEGTRAIN_PREFETCH_CAPACITY", &mut self.prefetch.capacity);

        // Storage overrides
        if let Ok(val) = std::env::var("SEGTRAIN_STORAGE_BASE_PATH") {
            self.storage.base_path = PathBuf::from(val);
        }
        override_parsed("SEGTRAIN_STORAGE_BUFFER_SIZE", &mut self.storage.buffer_size);
        override_parsed("SEGTRAIN_STORAGE_USE_MMAP", &mut self.storage.use_mmap);
        override_parsed("SEGTRAIN_STORAGE_MMAP_THRESHOLD", &mut self.storage.mmap_threshold);

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        // Data validation
        if self.data.val_csv_path.is_none() && self.data.num_val_patients == 0 {
            return Err(TrainError::config(
                "data.num_val_patients must be greater than 0 when data.val_csv_path is not set",
            ));
        }

        // Training validation
        if !self.training.learning_rate.is_finite() || self.training.learning_rate <= 0.0 {
            return Err(TrainError::config(
                "training.learning_rate must be a positive number",
            ));
        }
        if !self.training.regularization_weight.is_finite()
            || self.training.regularization_weight < 0.0
        {
            return Err(TrainError::config(
                "training.regularization_weight must be a non-negative number",
            ));
        }

        // Schedule validation
        let intervals = [
            ("schedule.summary_interval", self.schedule.summary_interval),
            ("schedule.validation_interval", self.schedule.validation_interval),
            ("schedule.checkpoint_interval", self.schedule.checkpoint_interval),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(TrainError::config(format!("{name} must be greater than 0")));
            }
        }
        if self.schedule.validation_sample_size == 0 {
            return Err(TrainError::config(
                "schedule.validation_sample_size must be greater than 0",
            ));
        }

        // Checkpoint validation
        if self.checkpoint.name.is_empty() || self.checkpoint.name.contains('/') {
            return Err(TrainError::config(
                "checkpoint.name must be a non-empty file name",
            ));
        }
        let valid_compression = ["none", "lz4", "zstd"];
        if !valid_compression.contains(&self.checkpoint.compression.as_str()) {
            return Err(TrainError::config(format!(
                "checkpoint.compression must be one of: {}",
                valid_compression.join(", ")
            )));
        }
        if self.checkpoint.keep_last_n == 0 {
            return Err(TrainError::config(
                "checkpoint.keep_last_n must be greater than 0",
            ));
        }

        // Storage validation
        if self.storage.buffer_size == 0 {
            return Err(TrainError::config(
                "storage.buffer_size must be greater than 0",
            ));
        }

        Ok(())
    }
}
