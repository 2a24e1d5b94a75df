// rust/segtrain-core/src/decode.rs

//! Turning manifest paths into image and mask buffers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;

use crate::dataset::ExamplePaths;
use crate::error::{Result, TrainError};
use crate::storage::StorageBackend;
use crate::tensor::{Image, Label};

/// A decoded training or validation example.
#[derive(Debug, Clone)]
pub struct Example {
    pub paths: ExamplePaths,
    pub image: Image,
    pub label: Label,
}

/// Loads the files named by an [`ExamplePaths`].
///
/// Implementations are shared with prefetch workers, so they must be
/// `Send + Sync`. Every failure is reported as [`TrainError::DataRead`].
pub trait ExampleDecoder: Send + Sync {
    fn decode(&self, paths: &ExamplePaths) -> Result<Example>;
}

/// Decodes PNG (or any format enabled on the `image` crate) files found
/// under a data directory.
///
/// Grey and grey-alpha images become one channel; everything else becomes
/// three RGB channels. Alpha is dropped. Masks must be single-channel
/// (optionally with alpha); colour masks are rejected.
pub struct ImageDecoder {
    storage: Arc<dyn StorageBackend>,
    data_dir: PathBuf,
}

impl ImageDecoder {
    pub fn new(storage: Arc<dyn StorageBackend>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            data_dir: data_dir.into(),
        }
    }

    fn load(&self, relative: &str) -> Result<(PathBuf, DynamicImage)> {
        let path = self.data_dir.join(relative);
        let bytes = self
            .storage
            .read_all(&path)
            .map_err(|e| TrainError::data_read_with_source(&path, "failed to read file", e))?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| TrainError::data_read_with_source(&path, "failed to decode image", e))?;
        Ok((path, decoded))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl ExampleDecoder for ImageDecoder {
    fn decode(&self, paths: &ExamplePaths) -> Result<Example> {
        let (image_path, image) = self.load(&paths.image)?;
        let (label_path, label) = self.load(&paths.label)?;

        if image.width() != label.width() || image.height() != label.height() {
            return Err(TrainError::data_read(
                &label_path,
                format!(
                    "label is {}x{} but image '{}' is {}x{}",
                    label.height(),
                    label.width(),
                    image_path.display(),
                    image.height(),
                    image.width()
                ),
            ));
        }

        let height = image.height() as usize;
        let width = image.width() as usize;

        let image = match image.color().channel_count() {
            1 | 2 => {
                let raw = image.to_luma8().into_raw();
                Image::new(height, width, 1, raw.into_iter().map(f32::from).collect())
            }
            _ => {
                let raw = image.to_rgb8().into_raw();
                Image::new(height, width, 3, raw.into_iter().map(f32::from).collect())
            }
        }
        .map_err(|e| TrainError::data_read(&image_path, e.to_string()))?;

        // Alpha is dropped; colour masks have no single class channel to keep
        let label = if label.color().has_color() {
            Label::squeeze(height, width, 3, label.to_rgb8().into_raw())
        } else {
            Label::squeeze(height, width, 1, label.to_luma8().into_raw())
        }
        .map_err(|e| TrainError::data_read(&label_path, e.to_string()))?;

        Ok(Example {
            paths: paths.clone(),
            image,
            label,
        })
    }
}
