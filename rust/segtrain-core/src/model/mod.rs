// rust/segtrain-core/src/model/mod.rs

//! The boundary between the training loop and the numeric code.
//!
//! The loop only needs a forward pass, a data loss, a regularization term
//! and an update rule. Architectures plug in by implementing
//! [`SegmentationModel`] and an [`Optimizer`] for it. A small per-pixel
//! logistic model with Adam is provided so a run works end to end.

mod logistic;

pub use logistic::{Adam, PixelLogisticModel, PixelPrediction};

use crate::error::Result;
use crate::tensor::{Image, Label};

/// Whether the forward pass is used for an update (dropout on) or for
/// evaluation (dropout off).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

pub trait SegmentationModel: Send {
    /// Whatever the forward pass produces that `loss` and the optimizer need.
    type Prediction;

    fn forward(&mut self, image: &Image, mode: Mode) -> Result<Self::Prediction>;

    /// Data loss of `prediction` against `label`.
    fn loss(&self, prediction: &Self::Prediction, label: &Label) -> Result<f64>;

    /// Penalty added to the data loss, scaled by the regularization weight.
    fn regularization_loss(&self) -> f64;

    /// Named scalars written at summary steps.
    fn summary(&self) -> Vec<(String, f64)> {
        Vec::new()
    }

    /// Serializes the parameters for a checkpoint.
    fn snapshot(&self) -> Result<Vec<u8>>;

    /// Restores parameters produced by [`snapshot`](Self::snapshot).
    fn restore(&mut self, bytes: &[u8]) -> Result<()>;
}

/// What an optimizer gets to work with for one update.
pub struct StepInput<'a, P> {
    pub image: &'a Image,
    pub label: &'a Label,
    pub prediction: &'a P,
    pub learning_rate: f64,
    pub regularization_weight: f64,
}

/// An update rule for a specific model.
pub trait Optimizer<M: SegmentationModel>: Send {
    /// Applies one update minimizing `loss + regularization_weight * regularization_loss`.
    fn step(&mut self, model: &mut M, input: StepInput<'_, M::Prediction>) -> Result<()>;

    fn snapshot(&self) -> Result<Vec<u8>>;

    fn restore(&mut self, bytes: &[u8]) -> Result<()>;
}
