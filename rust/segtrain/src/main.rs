//! Segmentation Trainer
//!
//! Trains a pixel-segmentation model on a manifest of image/label pairs,
//! splitting off validation patients, logging losses and checkpointing the
//! run directory.
//!
//! # Usage
//!
//! ```bash
//! # Train with defaults (data/, training.csv, run/)
//! segtrain
//!
//! # Hold out 5 patients and train 1000 steps
//! segtrain --num-val-patients 5 --steps 1000
//!
//! # Continue from the newest checkpoint in run/
//! segtrain --config train.toml --resume
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use segtrain_core::model::{Adam, PixelLogisticModel};
use segtrain_core::{Session, TrainConfig};

/// Segmentation model trainer
#[derive(Parser, Debug)]
#[command(name = "segtrain")]
#[command(about = "Train a pixel-segmentation model with patient-level validation")]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory the manifest paths are relative to
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Run directory for splits, summaries and checkpoints
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Training manifest
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Validation manifest; without it the training manifest is split by patient
    #[arg(long)]
    val_csv: Option<PathBuf>,

    /// Number of patients held out for validation
    #[arg(long)]
    num_val_patients: Option<usize>,

    /// Number of training steps to run
    #[arg(long)]
    steps: Option<u64>,

    /// Learning rate
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Resume from the newest checkpoint in the run directory
    #[arg(long)]
    resume: bool,

    /// Seed for the split, the streams and augmentation
    #[arg(long)]
    seed: Option<u64>,

    /// Input keep probability of the reference model's dropout
    #[arg(long, default_value = "0.8")]
    keep_prob: f64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Flags take precedence over the file and the environment.
    fn apply(&self, mut config: TrainConfig) -> TrainConfig {
        if let Some(data_dir) = &self.data_dir {
            config.data.data_dir = data_dir.clone();
        }
        if let Some(model_dir) = &self.model_dir {
            config.training.model_dir = model_dir.clone();
        }
        if let Some(csv) = &self.csv {
            config.data.csv_path = csv.clone();
        }
        if let Some(val_csv) = &self.val_csv {
            config.data.val_csv_path = Some(val_csv.clone());
        }
        if let Some(n) = self.num_val_patients {
            config.data.num_val_patients = n;
        }
        if let Some(steps) = self.steps {
            config.training.training_steps = steps;
        }
        if let Some(lr) = self.learning_rate {
            config.training.learning_rate = lr;
        }
        if self.resume {
            config.training.resume_training = true;
        }
        if let Some(seed) = self.seed {
            config.training.seed = Some(seed);
            config.data.split_seed = Some(seed);
        }
        config
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.config {
        Some(path) => TrainConfig::from_file(path)?,
        None => TrainConfig::default(),
    };
    let config = args.apply(config.with_env_overrides());

    tracing::info!("Starting segmentation trainer");
    tracing::info!("  Data dir: {}", config.data.data_dir.display());
    tracing::info!("  Model dir: {}", config.training.model_dir.display());
    tracing::info!("  Steps: {}", config.training.training_steps);
    tracing::info!("  Learning rate: {}", config.training.learning_rate);
    tracing::info!("  Resume: {}", config.training.resume_training);

    let session = Session::from_config(config)?;
    let mut model = PixelLogisticModel::new(args.keep_prob)?;
    if let Some(seed) = args.seed {
        model = model.with_seed(seed);
    }

    let report = session.train(model, Adam::new())?;
    tracing::info!(
        start = report.start_step,
        end = report.final_step,
        checkpoints = report.checkpoints.len(),
        "Run finished"
    );

    Ok(())
}
