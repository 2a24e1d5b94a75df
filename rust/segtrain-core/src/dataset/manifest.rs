// rust/segtrain-core/src/dataset/manifest.rs

//! Loading and validation of `image,label` manifests.
//!
//! A manifest is a headerless, comma-separated text file with one
//! `image_path,label_path` pair per line. Paths are relative to the data
//! directory and their first component names the patient:
//!
//! ```text
//! p001/scan_cc.png,p001/scan_cc_mask.png
//! p001/scan_mlo.png,p001/scan_mlo_mask.png
//! p002/scan_cc.png,p002/scan_cc_mask.png
//! ```

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use crate::error::{Result, TrainError};
use crate::storage::StorageBackend;

/// One `(image, label)` pair together with the patient it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManifestRecord {
    pub patient_id: String,
    pub image_path: String,
    pub label_path: String,
}

impl ManifestRecord {
    /// Builds a record, deriving the patient from the image path.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when either path is empty or
    /// the label does not live under the image's patient directory.
    pub fn new(
        image_path: impl Into<String>,
        label_path: impl Into<String>,
    ) -> std::result::Result<Self, String> {
        let image_path = image_path.into();
        let label_path = label_path.into();

        if image_path.is_empty() || label_path.is_empty() {
            return Err("image and label paths must be non-empty".to_string());
        }

        let patient_id = patient_of(&image_path).to_string();

        // Flat layouts have no patient directory to escape from.
        if patient_id != image_path {
            let prefix = format!("{patient_id}/");
            if !label_path.starts_with(&prefix) {
                return Err(format!(
                    "label '{label_path}' is outside patient directory '{patient_id}'"
                ));
            }
        }

        Ok(Self {
            patient_id,
            image_path,
            label_path,
        })
    }
}

/// Leading `/`-separated component of a manifest path.
pub fn patient_of(path: &str) -> &str {
    path.split('/').next().unwrap_or(path)
}

/// An ordered list of unique manifest records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    records: Vec<ManifestRecord>,
}

impl Manifest {
    /// Loads and validates a manifest through the storage backend.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file cannot be read and a format
    /// error if its content is malformed or empty.
    pub fn load(storage: &dyn StorageBackend, path: &Path) -> Result<Self> {
        let bytes = storage.read_all(path)?;
        let manifest = Self::parse(&path.display().to_string(), &bytes)?;
        tracing::debug!(
            path = %path.display(),
            records = manifest.len(),
            patients = manifest.patients().len(),
            "Loaded manifest"
        );
        Ok(manifest)
    }

    /// Parses manifest content. `source_name` is only used in errors.
    ///
    /// # Errors
    ///
    /// Returns a format error if a line does not hold exactly two fields, a
    /// pair appears twice, a label escapes its patient directory, or there
    /// are no records at all.
    pub fn parse(source_name: &str, content: &[u8]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content);

        let mut records = Vec::new();
        let mut seen = HashSet::new();

        for row in reader.records() {
            let row = row.map_err(|e| {
                let line = e.position().map(|p| p.line()).unwrap_or_default();
                TrainError::format_at_line(source_name, line, e.to_string())
            })?;
            let line = row.position().map(|p| p.line()).unwrap_or_default();

            // A line holding only whitespace trims down to one empty field.
            if row.len() == 1 && row[0].is_empty() {
                continue;
            }
            if row.len() != 2 {
                return Err(TrainError::format_at_line(
                    source_name,
                    line,
                    format!("expected 2 fields, found {}", row.len()),
                ));
            }

            let record = ManifestRecord::new(&row[0], &row[1])
                .map_err(|message| TrainError::format_at_line(source_name, line, message))?;

            if !seen.insert((record.image_path.clone(), record.label_path.clone())) {
                return Err(TrainError::format_at_line(
                    source_name,
                    line,
                    format!(
                        "duplicate pair '{},{}'",
                        record.image_path, record.label_path
                    ),
                ));
            }
            records.push(record);
        }

        if records.is_empty() {
            return Err(TrainError::format(source_name, "manifest is empty"));
        }

        Ok(Self { records })
    }

    /// Wraps records taken from an already validated manifest.
    pub(crate) fn from_records(records: Vec<ManifestRecord>) -> Self {
        Self { records }
    }

    /// Writes the manifest as `image_path,label_path` lines.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file cannot be written.
    pub fn write_to(&self, storage: &dyn StorageBackend, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        for record in &self.records {
            writer
                .write_record([record.image_path.as_str(), record.label_path.as_str()])
                .map_err(|e| TrainError::serialization(format!("failed to encode manifest: {e}")))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| TrainError::serialization(format!("failed to encode manifest: {e}")))?;
        storage.write_all(path, &bytes)
    }

    pub fn records(&self) -> &[ManifestRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ManifestRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct patient ids in lexicographic order.
    pub fn patients(&self) -> BTreeSet<&str> {
        self.records.iter().map(|r| r.patient_id.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a ManifestRecord;
    type IntoIter = std::slice::Iter<'a, ManifestRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
