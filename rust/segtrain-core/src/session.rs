// rust/segtrain-core/src/session.rs

//! Run orchestration.
//!
//! A [`Session`] ties a [`TrainConfig`] to storage and assembles everything a
//! run needs: the training and validation manifests (splitting by patient
//! when no validation manifest is configured), one prefetching pipeline per
//! manifest, the summary writer and the checkpoint coordinator.
//!
//! # Example
//!
//! ```no_run
//! use segtrain_core::config::TrainConfig;
//! use segtrain_core::model::{Adam, PixelLogisticModel};
//! use segtrain_core::Session;
//!
//! let session = Session::from_config(TrainConfig::default()).unwrap();
//! let model = PixelLogisticModel::new(0.8).unwrap();
//! let report = session.train(model, Adam::new()).unwrap();
//! println!("finished at step {}", report.final_step);
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::augment::AugmentationStage;
use crate::checkpoint::CheckpointCoordinator;
use crate::config::TrainConfig;
use crate::dataset::{
    split, ExamplePipeline, ExampleStream, Manifest, PrefetchingSource, TRAINING_MANIFEST,
    VALIDATION_MANIFEST,
};
use crate::decode::{ExampleDecoder, ImageDecoder};
use crate::error::Result;
use crate::model::{Optimizer, SegmentationModel};
use crate::storage::{LocalStorage, StorageBackend};
use crate::summary::{CsvSummaryWriter, SUMMARY_FILE};
use crate::trainer::{LoopSettings, Trainer, TrainingReport};

/// The training and validation manifests a run trains on.
#[derive(Debug, Clone)]
pub struct RunManifests {
    pub training: Manifest,
    pub validation: Manifest,
    /// Patients drawn for validation, empty when both manifests were given.
    pub validation_patients: Vec<String>,
}

pub struct Session {
    config: TrainConfig,
    storage: Arc<dyn StorageBackend>,
}

impl Session {
    /// Creates a session from a configuration file with environment
    /// overrides applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or is invalid.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = TrainConfig::from_file(path)?.with_env_overrides();
        Self::from_config(config)
    }

    /// Creates a session on local storage rooted at `storage.base_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the storage
    /// backend cannot be initialized.
    pub fn from_config(config: TrainConfig) -> Result<Self> {
        let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(&config.storage)?);
        Self::with_storage(config, storage)
    }

    /// Creates a session on an existing storage backend.
    pub fn with_storage(config: TrainConfig, storage: Arc<dyn StorageBackend>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, storage })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn model_dir(&self) -> &Path {
        &self.config.training.model_dir
    }

    /// Loads the manifests for this run.
    ///
    /// With `val_csv_path` set both manifests are read as given. Otherwise
    /// `csv_path` is split by patient and both halves are written to the run
    /// directory before training starts. A resumed run reuses the split
    /// already persisted in the run directory, so its validation patients
    /// stay the same.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::Format`](crate::TrainError::Format) for a
    /// malformed manifest and
    /// [`TrainError::InsufficientData`](crate::TrainError::InsufficientData)
    /// when there are too few patients to split.
    pub fn prepare_manifests(&self) -> Result<RunManifests> {
        let data = &self.config.data;

        if let Some(val_csv_path) = &data.val_csv_path {
            let manifest = Manifest::load(self.storage.as_ref(), &data.csv_path)?;
            let validation = Manifest::load(self.storage.as_ref(), val_csv_path)?;
            tracing::info!(
                training = manifest.len(),
                validation = validation.len(),
                "Loaded training and validation manifests"
            );
            return Ok(RunManifests {
                training: manifest,
                validation,
                validation_patients: Vec::new(),
            });
        }

        if self.config.training.resume_training {
            if let Some(manifests) = self.load_persisted_split()? {
                return Ok(manifests);
            }
        }

        let manifest = Manifest::load(self.storage.as_ref(), &data.csv_path)?;
        let parts = split(&manifest, data.num_val_patients, data.split_seed)?;
        let (training_path, validation_path) =
            parts.persist(self.storage.as_ref(), self.model_dir())?;
        tracing::info!(
            patients = ?parts.validation_patients,
            training = %training_path.display(),
            validation = %validation_path.display(),
            "Split manifest by patient"
        );

        Ok(RunManifests {
            training: parts.training,
            validation: parts.validation,
            validation_patients: parts.validation_patients,
        })
    }

    /// The split an earlier run wrote to the run directory, if both halves
    /// are there.
    fn load_persisted_split(&self) -> Result<Option<RunManifests>> {
        let training_path = self.model_dir().join(TRAINING_MANIFEST);
        let validation_path = self.model_dir().join(VALIDATION_MANIFEST);
        if !self.storage.exists(&training_path)? || !self.storage.exists(&validation_path)? {
            tracing::warn!(dir = %self.model_dir().display(), "No persisted split to resume with");
            return Ok(None);
        }

        let training = Manifest::load(self.storage.as_ref(), &training_path)?;
        let validation = Manifest::load(self.storage.as_ref(), &validation_path)?;
        let validation_patients: Vec<String> = validation
            .patients()
            .into_iter()
            .map(str::to_string)
            .collect();
        tracing::info!(
            patients = ?validation_patients,
            validation = %validation_path.display(),
            "Reusing persisted split"
        );

        Ok(Some(RunManifests {
            training,
            validation,
            validation_patients,
        }))
    }

    /// Assembles a trainer for `model` and `optimizer`, restoring the newest
    /// checkpoint first when `resume_training` is set.
    ///
    /// # Errors
    ///
    /// Besides manifest errors, returns
    /// [`TrainError::NoCheckpoint`](crate::TrainError::NoCheckpoint) when
    /// resuming and the run directory holds no valid checkpoint.
    pub fn build_trainer<M, O>(&self, model: M, optimizer: O) -> Result<Trainer<M, O>>
    where
        M: SegmentationModel,
        O: Optimizer<M>,
    {
        let manifests = self.prepare_manifests()?;
        let seeds = StreamSeeds::new(self.config.training.seed);
        let decoder: Arc<dyn ExampleDecoder> = Arc::new(ImageDecoder::new(
            self.storage.clone(),
            self.config.data.data_dir.clone(),
        ));

        let training = ExamplePipeline::new(
            seeds.stream(&manifests.training, seeds.training)?,
            decoder.clone(),
            Some(AugmentationStage::new()),
        );
        let training = seeds.pipeline(training, seeds.augmentation);
        let validation = ExamplePipeline::new(
            seeds.stream(&manifests.validation, seeds.validation)?,
            decoder,
            None,
        );

        let training = PrefetchingSource::new(training, &self.config.prefetch);
        let validation = PrefetchingSource::new(validation, &self.config.prefetch);

        self.storage.create_dir_all(self.model_dir())?;
        let sink = CsvSummaryWriter::open(self.storage.as_ref(), self.summary_path())?;
        let checkpoints = CheckpointCoordinator::new(
            self.storage.clone(),
            self.model_dir(),
            &self.config.checkpoint,
        );

        let mut trainer = Trainer::new(
            model,
            optimizer,
            Box::new(training),
            Box::new(validation),
            checkpoints,
            Box::new(sink),
            LoopSettings::from_config(&self.config),
        );

        if self.config.training.resume_training {
            trainer.resume()?;
        }

        Ok(trainer)
    }

    /// Builds a trainer and runs `training_steps` steps.
    pub fn train<M, O>(&self, model: M, optimizer: O) -> Result<TrainingReport>
    where
        M: SegmentationModel,
        O: Optimizer<M>,
    {
        let mut trainer = self.build_trainer(model, optimizer)?;
        trainer.run(self.config.training.training_steps)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.model_dir().join(SUMMARY_FILE)
    }
}

/// Per-stream seeds derived from the run seed. `None` everywhere means
/// entropy-seeded streams.
struct StreamSeeds {
    training: Option<u64>,
    augmentation: Option<u64>,
    validation: Option<u64>,
}

impl StreamSeeds {
    fn new(seed: Option<u64>) -> Self {
        Self {
            training: seed,
            augmentation: seed.map(|s| s.wrapping_add(1)),
            validation: seed.map(|s| s.wrapping_add(2)),
        }
    }

    fn stream(&self, manifest: &Manifest, seed: Option<u64>) -> Result<ExampleStream> {
        match seed {
            Some(seed) => ExampleStream::with_seed(manifest, seed),
            None => ExampleStream::new(manifest),
        }
    }

    fn pipeline(&self, pipeline: ExamplePipeline, seed: Option<u64>) -> ExamplePipeline {
        match seed {
            Some(seed) => pipeline.with_seed(seed),
            None => pipeline,
        }
    }
}
