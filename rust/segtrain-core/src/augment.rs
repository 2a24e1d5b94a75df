// rust/segtrain-core/src/augment.rs

//! Random geometric augmentation and per-channel standardization.
//!
//! The same flip and rotation are applied to an image and its mask so every
//! mask pixel keeps pointing at the image pixel it annotates. Rotations are
//! counter-clockwise quarter turns.

use rand::Rng;

use crate::error::{Result, TrainError};
use crate::tensor::{Image, Label};

/// Randomized flip + quarter-turn rotation followed by standardization.
///
/// The stage holds no state; every call draws fresh randomness.
#[derive(Debug, Clone, Copy, Default)]
pub struct AugmentationStage;

/// The random choices made for one example.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transform {
    pub flip: bool,
    /// Counter-clockwise quarter turns, in `0..4`.
    pub quarter_turns: u8,
}

impl Transform {
    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            flip: rng.gen_bool(0.5),
            quarter_turns: rng.gen_range(0..4),
        }
    }

    /// Applies the transform to an image and its mask.
    pub fn apply(&self, image: Image, label: Label) -> (Image, Label) {
        let (mut image, mut label) = (image, label);

        if self.flip {
            image.data = flip_horizontal(&image.data, image.width, image.channels);
            label.data = flip_horizontal(&label.data, label.width, 1);
        }

        for _ in 0..self.quarter_turns {
            image.data = rotate_ccw(&image.data, image.height, image.width, image.channels);
            std::mem::swap(&mut image.height, &mut image.width);
            label.data = rotate_ccw(&label.data, label.height, label.width, 1);
            std::mem::swap(&mut label.height, &mut label.width);
        }

        (image, label)
    }
}

impl AugmentationStage {
    pub fn new() -> Self {
        Self
    }

    /// Augments one example using the thread-local generator.
    ///
    /// # Errors
    ///
    /// Returns an error if image and mask sizes differ.
    pub fn apply(&self, image: Image, label: Label) -> Result<(Image, Label)> {
        self.apply_with_rng(&mut rand::thread_rng(), image, label)
    }

    /// Augments one example with the given generator.
    pub fn apply_with_rng<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        image: Image,
        label: Label,
    ) -> Result<(Image, Label)> {
        check_same_size(&image, &label)?;
        let (image, label) = Transform::sample(rng).apply(image, label);
        Ok((standardize(image), label))
    }
}

fn check_same_size(image: &Image, label: &Label) -> Result<()> {
    if image.height != label.height || image.width != label.width {
        return Err(TrainError::model(format!(
            "image is {}x{} but its label is {}x{}",
            image.height, image.width, label.height, label.width
        )));
    }
    Ok(())
}

/// Rescales every channel to zero mean and unit variance over the image's
/// own pixels.
///
/// The standard deviation is floored at `1 / sqrt(pixels)` so flat channels
/// map to zero instead of dividing by zero.
pub fn standardize(mut image: Image) -> Image {
    let pixels = image.pixels();
    if pixels == 0 {
        return image;
    }
    let min_stddev = 1.0 / (pixels as f64).sqrt();

    for c in 0..image.channels {
        let samples = || image.data.iter().skip(c).step_by(image.channels);

        let mean = samples().map(|&v| f64::from(v)).sum::<f64>() / pixels as f64;
        let variance = samples()
            .map(|&v| {
                let d = f64::from(v) - mean;
                d * d
            })
            .sum::<f64>()
            / pixels as f64;
        let stddev = variance.sqrt().max(min_stddev);

        for v in image.data.iter_mut().skip(c).step_by(image.channels) {
            *v = ((f64::from(*v) - mean) / stddev) as f32;
        }
    }

    image
}

/// Mirrors each row of a row-major `width x channels` buffer.
fn flip_horizontal<T: Copy>(data: &[T], width: usize, channels: usize) -> Vec<T> {
    let row_len = width * channels;
    let mut out = Vec::with_capacity(data.len());
    for row in data.chunks_exact(row_len.max(1)) {
        for pixel in row.chunks_exact(channels).rev() {
            out.extend_from_slice(pixel);
        }
    }
    out
}

/// Rotates a row-major `height x width x channels` buffer a quarter turn
/// counter-clockwise. The result is `width x height`.
fn rotate_ccw<T: Copy>(data: &[T], height: usize, width: usize, channels: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(data.len());
    for i in 0..width {
        for j in 0..height {
            let src = (j * width + (width - 1 - i)) * channels;
            out.extend_from_slice(&data[src..src + channels]);
        }
    }
    out
}
