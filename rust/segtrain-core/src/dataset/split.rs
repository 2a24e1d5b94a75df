// rust/segtrain-core/src/dataset/split.rs

//! Patient-level training/validation split.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::manifest::Manifest;
use crate::error::{Result, TrainError};
use crate::storage::StorageBackend;

/// File name of the persisted training manifest inside the run directory.
pub const TRAINING_MANIFEST: &str = "training.csv";
/// File name of the persisted validation manifest inside the run directory.
pub const VALIDATION_MANIFEST: &str = "val.csv";

/// Outcome of [`split`]. No patient appears on both sides.
#[derive(Debug, Clone)]
pub struct SplitResult {
    pub training: Manifest,
    pub validation: Manifest,
    /// Patients drawn for validation, sorted.
    pub validation_patients: Vec<String>,
}

/// Holds out `num_val_patients` patients for validation.
///
/// Patients are drawn uniformly without replacement from the distinct ids of
/// `manifest`, enumerated in sorted order so that a fixed `seed` always
/// reproduces the same partition. Without a seed the draw is seeded from OS
/// entropy. Both sides keep the input order of their records.
///
/// # Errors
///
/// Returns [`TrainError::InsufficientData`] when the manifest has fewer
/// distinct patients than requested.
pub fn split(manifest: &Manifest, num_val_patients: usize, seed: Option<u64>) -> Result<SplitResult> {
    let patients: Vec<&str> = manifest.patients().into_iter().collect();
    if patients.len() < num_val_patients {
        return Err(TrainError::insufficient_data(num_val_patients, patients.len()));
    }

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let drawn: BTreeSet<&str> = patients
        .choose_multiple(&mut rng, num_val_patients)
        .copied()
        .collect();

    let (validation, training): (Vec<_>, Vec<_>) = manifest
        .iter()
        .cloned()
        .partition(|record| drawn.contains(record.patient_id.as_str()));

    tracing::info!(
        training = training.len(),
        validation = validation.len(),
        patients = patients.len(),
        "Split manifest by patient"
    );

    Ok(SplitResult {
        training: Manifest::from_records(training),
        validation: Manifest::from_records(validation),
        validation_patients: drawn.into_iter().map(str::to_string).collect(),
    })
}

impl SplitResult {
    /// Writes `training.csv` and `val.csv` under `model_dir`, creating the
    /// directory if needed. Returns the two paths in that order.
    ///
    /// # Errors
    ///
    /// Returns a storage error if either file cannot be written.
    pub fn persist(&self, storage: &dyn StorageBackend, model_dir: &Path) -> Result<(PathBuf, PathBuf)> {
        storage.create_dir_all(model_dir)?;

        let training_path = model_dir.join(TRAINING_MANIFEST);
        let validation_path = model_dir.join(VALIDATION_MANIFEST);
        self.training.write_to(storage, &training_path)?;
        self.validation.write_to(storage, &validation_path)?;

        Ok((training_path, validation_path))
    }
}
