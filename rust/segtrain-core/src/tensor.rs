// rust/segtrain-core/src/tensor.rs

//! Dense image and label buffers passed between decoding, augmentation and
//! the model.

use crate::error::{Result, TrainError};

/// A row-major `height x width x channels` image of `f32` samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

/// A row-major `height x width` segmentation mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub height: usize,
    pub width: usize,
    pub data: Vec<u8>,
}

impl Image {
    /// # Errors
    ///
    /// Returns a model error if `data` does not hold `height * width * channels`
    /// samples or `channels` is zero.
    pub fn new(height: usize, width: usize, channels: usize, data: Vec<f32>) -> Result<Self> {
        if channels == 0 {
            return Err(TrainError::model("image must have at least one channel"));
        }
        if data.len() != height * width * channels {
            return Err(TrainError::model(format!(
                "image buffer holds {} samples, expected {height}x{width}x{channels}",
                data.len()
            )));
        }
        Ok(Self {
            height,
            width,
            channels,
            data,
        })
    }

    /// Number of pixels (not samples).
    pub fn pixels(&self) -> usize {
        self.height * self.width
    }

    /// Sample at row `y`, column `x`, channel `c`.
    pub fn at(&self, y: usize, x: usize, c: usize) -> f32 {
        self.data[(y * self.width + x) * self.channels + c]
    }
}

impl Label {
    /// # Errors
    ///
    /// Returns a model error if `data` does not hold `height * width` values.
    pub fn new(height: usize, width: usize, data: Vec<u8>) -> Result<Self> {
        if data.len() != height * width {
            return Err(TrainError::model(format!(
                "label buffer holds {} values, expected {height}x{width}",
                data.len()
            )));
        }
        Ok(Self {
            height,
            width,
            data,
        })
    }

    /// Builds a mask from an `height x width x channels` buffer, dropping a
    /// singleton channel axis.
    ///
    /// # Errors
    ///
    /// Returns a model error for multi-channel buffers.
    pub fn squeeze(height: usize, width: usize, channels: usize, data: Vec<u8>) -> Result<Self> {
        if channels != 1 {
            return Err(TrainError::model(format!(
                "label must have a single channel, found {channels}"
            )));
        }
        Self::new(height, width, data)
    }

    pub fn at(&self, y: usize, x: usize) -> u8 {
        self.data[y * self.width + x]
    }

    /// Whether the mask marks the pixel as foreground.
    pub fn is_positive(&self, index: usize) -> bool {
        self.data[index] > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_shape_checked() {
        assert!(Image::new(2, 3, 1, vec![0.0; 6]).is_ok());
        assert!(Image::new(2, 3, 3, vec![0.0; 6]).is_err());
        assert!(Image::new(2, 3, 0, Vec::new()).is_err());
    }

    #[test]
    fn test_image_indexing() {
        let image = Image::new(2, 2, 2, (0..8).map(|v| v as f32).collect()).unwrap();
        assert_eq!(image.at(1, 0, 1), 5.0);
        assert_eq!(image.pixels(), 4);
    }

    #[test]
    fn test_label_squeeze() {
        let label = Label::squeeze(1, 2, 1, vec![0, 255]).unwrap();
        assert_eq!(label.at(0, 1), 255);
        assert!(label.is_positive(1));
        assert!(!label.is_positive(0));

        assert!(Label::squeeze(1, 2, 3, vec![0; 6]).is_err());
    }
}
