// rust/segtrain-core/src/model/logistic.rs

//! Per-pixel logistic regression and Adam.
//!
//! Each pixel is classified from its own channel values:
//! `p = sigmoid(bias + sum_c w_c * x_c)`. Training drops input channels
//! with probability `1 - keep_prob` and rescales the survivors (inverted
//! dropout). The data loss is mean sigmoid cross-entropy over pixels and
//! the regularization term is `0.5 * |w|^2`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{Mode, Optimizer, SegmentationModel, StepInput};
use crate::error::{Result, TrainError};
use crate::tensor::{Image, Label};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Parameters {
    /// One weight per input channel; empty until the first forward pass.
    weights: Vec<f64>,
    bias: f64,
}

pub struct PixelLogisticModel {
    params: Parameters,
    keep_prob: f64,
    rng: StdRng,
}

/// Logits and the (dropout-masked) inputs that produced them.
#[derive(Debug, Clone)]
pub struct PixelPrediction {
    logits: Vec<f64>,
    inputs: Vec<f64>,
    channels: usize,
}

impl PixelPrediction {
    pub fn logits(&self) -> &[f64] {
        &self.logits
    }

    /// Foreground probability per pixel.
    pub fn probabilities(&self) -> Vec<f64> {
        self.logits.iter().map(|&z| sigmoid(z)).collect()
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Numerically stable `-(y ln p + (1 - y) ln(1 - p))` with `p = sigmoid(z)`.
fn sigmoid_cross_entropy(z: f64, y: f64) -> f64 {
    z.max(0.0) - z * y + (-z.abs()).exp().ln_1p()
}

impl PixelLogisticModel {
    /// # Errors
    ///
    /// Returns a model error unless `0 < keep_prob <= 1`.
    pub fn new(keep_prob: f64) -> Result<Self> {
        if !(keep_prob > 0.0 && keep_prob <= 1.0) {
            return Err(TrainError::model(format!(
                "dropout keep probability must be in (0, 1], got {keep_prob}"
            )));
        }
        Ok(Self {
            params: Parameters::default(),
            keep_prob,
            rng: StdRng::from_entropy(),
        })
    }

    /// Seeds the dropout masks.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn weights(&self) -> &[f64] {
        &self.params.weights
    }

    pub fn bias(&self) -> f64 {
        self.params.bias
    }

    fn ensure_channels(&mut self, channels: usize) -> Result<()> {
        if self.params.weights.is_empty() {
            self.params.weights = vec![0.0; channels];
        } else if self.params.weights.len() != channels {
            return Err(TrainError::model(format!(
                "model has {} input channels, image has {channels}",
                self.params.weights.len()
            )));
        }
        Ok(())
    }

    /// Gradients of `loss + regularization_weight * regularization_loss`
    /// with respect to the weights and the bias.
    fn gradients(&self, input: &StepInput<'_, PixelPrediction>) -> Result<(Vec<f64>, f64)> {
        let prediction = input.prediction;
        check_label(prediction, input.label)?;

        let n = prediction.logits.len() as f64;
        let mut grad_w: Vec<f64> = self
            .params
            .weights
            .iter()
            .map(|w| input.regularization_weight * w)
            .collect();
        let mut grad_b = 0.0;

        for (i, &z) in prediction.logits.iter().enumerate() {
            let y = if input.label.is_positive(i) { 1.0 } else { 0.0 };
            let dz = (sigmoid(z) - y) / n;
            grad_b += dz;
            let x = &prediction.inputs[i * prediction.channels..(i + 1) * prediction.channels];
            for (g, &xc) in grad_w.iter_mut().zip(x) {
                *g += dz * xc;
            }
        }

        Ok((grad_w, grad_b))
    }
}

fn check_label(prediction: &PixelPrediction, label: &Label) -> Result<()> {
    if prediction.logits.len() != label.data.len() {
        return Err(TrainError::model(format!(
            "prediction has {} pixels, label has {}",
            prediction.logits.len(),
            label.data.len()
        )));
    }
    Ok(())
}

impl SegmentationModel for PixelLogisticModel {
    type Prediction = PixelPrediction;

    fn forward(&mut self, image: &Image, mode: Mode) -> Result<PixelPrediction> {
        self.ensure_channels(image.channels)?;

        let mut inputs: Vec<f64> = image.data.iter().map(|&v| f64::from(v)).collect();
        if mode == Mode::Train && self.keep_prob < 1.0 {
            let scale = 1.0 / self.keep_prob;
            for x in &mut inputs {
                *x = if self.rng.gen_bool(self.keep_prob) { *x * scale } else { 0.0 };
            }
        }

        let logits = inputs
            .chunks_exact(image.channels)
            .map(|pixel| {
                self.params.bias
                    + pixel
                        .iter()
                        .zip(&self.params.weights)
                        .map(|(x, w)| x * w)
                        .sum::<f64>()
            })
            .collect();

        Ok(PixelPrediction {
            logits,
            inputs,
            channels: image.channels,
        })
    }

    fn loss(&self, prediction: &PixelPrediction, label: &Label) -> Result<f64> {
        check_label(prediction, label)?;
        if prediction.logits.is_empty() {
            return Ok(0.0);
        }

        let total: f64 = prediction
            .logits
            .iter()
            .enumerate()
            .map(|(i, &z)| sigmoid_cross_entropy(z, if label.is_positive(i) { 1.0 } else { 0.0 }))
            .sum();
        Ok(total / prediction.logits.len() as f64)
    }

    fn regularization_loss(&self) -> f64 {
        0.5 * self.params.weights.iter().map(|w| w * w).sum::<f64>()
    }

    fn summary(&self) -> Vec<(String, f64)> {
        let mut scalars = vec![
            ("model/bias".to_string(), self.params.bias),
            (
                "model/weight_norm".to_string(),
                self.params.weights.iter().map(|w| w * w).sum::<f64>().sqrt(),
            ),
        ];
        for (c, w) in self.params.weights.iter().enumerate() {
            scalars.push((format!("model/weight_{c}"), *w));
        }
        scalars
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        bincode::serialize(&self.params)
            .map_err(|e| TrainError::serialization(format!("failed to encode model: {e}")))
    }

    fn restore(&mut self, bytes: &[u8]) -> Result<()> {
        self.params = bincode::deserialize(bytes)
            .map_err(|e| TrainError::serialization(format!("failed to decode model: {e}")))?;
        Ok(())
    }
}

/// Adam with the bias correction folded into the step size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    t: u64,
    m: Vec<f64>,
    v: Vec<f64>,
}

impl Default for Adam {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }
}

impl Adam {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of updates applied so far.
    pub fn iterations(&self) -> u64 {
        self.t
    }
}

impl Optimizer<PixelLogisticModel> for Adam {
    fn step(
        &mut self,
        model: &mut PixelLogisticModel,
        input: StepInput<'_, PixelPrediction>,
    ) -> Result<()> {
        let (grad_w, grad_b) = model.gradients(&input)?;
        let mut grads = grad_w;
        grads.push(grad_b);

        if self.m.len() != grads.len() {
            self.m = vec![0.0; grads.len()];
            self.v = vec![0.0; grads.len()];
        }
        self.t += 1;

        let t = self.t as i32;
        let step_size = input.learning_rate * (1.0 - self.beta2.powi(t)).sqrt()
            / (1.0 - self.beta1.powi(t));

        let params = model
            .params
            .weights
            .iter_mut()
            .chain(std::iter::once(&mut model.params.bias));
        for (((p, g), m), v) in params.zip(&grads).zip(&mut self.m).zip(&mut self.v) {
            *m = self.beta1 * *m + (1.0 - self.beta1) * g;
            *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
            *p -= step_size * *m / (v.sqrt() + self.epsilon);
        }

        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| TrainError::serialization(format!("failed to encode optimizer: {e}")))
    }

    fn restore(&mut self, bytes: &[u8]) -> Result<()> {
        *self = bincode::deserialize(bytes)
            .map_err(|e| TrainError::serialization(format!("failed to decode optimizer: {e}")))?;
        Ok(())
    }
}
