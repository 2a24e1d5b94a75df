// rust/segtrain-core/src/trainer.rs

//! The step-indexed training loop.
//!
//! Each step draws one augmented training example, runs the model in
//! training mode, applies one optimizer update and records the losses at
//! the pre-update step. Afterwards, with `step` being the new global step:
//!
//! - summaries are written when `step % summary_interval == 0 || step == 1`
//! - validation runs when `step % validation_interval == 0 || step == 1`
//! - a checkpoint is saved when `step % checkpoint_interval == 0` and after
//!   the last step of the run
//!
//! Triggers are independent, so several can fire on the same step.

use std::path::PathBuf;

use crate::checkpoint::{CheckpointCoordinator, TrainingState};
use crate::config::{ScheduleConfig, TrainConfig};
use crate::dataset::ExampleSource;
use crate::error::Result;
use crate::model::{Mode, Optimizer, SegmentationModel, StepInput};
use crate::summary::{
    SummaryRecord, SummarySink, TRAINING_LOGISTIC_LOSS, TRAINING_LOSS, VALIDATION_LOGISTIC_LOSS,
};

/// Actions due after a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepActions {
    pub summary: bool,
    pub validation: bool,
    pub checkpoint: bool,
}

impl ScheduleConfig {
    /// Actions due once the global step has reached `step`. `is_final` marks
    /// the last step of the run, which always checkpoints.
    pub fn actions(&self, step: u64, is_final: bool) -> StepActions {
        let every = |n: u64| n > 0 && step % n == 0;
        StepActions {
            summary: every(self.summary_interval) || step == 1,
            validation: every(self.validation_interval) || step == 1,
            checkpoint: every(self.checkpoint_interval) || is_final,
        }
    }
}

/// Loop settings taken from the run configuration.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub learning_rate: f64,
    pub regularization_weight: f64,
    pub schedule: ScheduleConfig,
}

impl LoopSettings {
    pub fn from_config(config: &TrainConfig) -> Self {
        Self {
            learning_rate: config.training.learning_rate,
            regularization_weight: config.training.regularization_weight,
            schedule: config.schedule.clone(),
        }
    }
}

/// What a call to [`Trainer::run`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    pub start_step: u64,
    pub final_step: u64,
    /// Data loss of the last training step.
    pub last_training_loss: Option<f64>,
    pub last_validation_loss: Option<f64>,
    /// Checkpoints written during the run.
    pub checkpoints: Vec<(u64, PathBuf)>,
}

pub struct Trainer<M, O>
where
    M: SegmentationModel,
    O: Optimizer<M>,
{
    model: M,
    optimizer: O,
    training: Box<dyn ExampleSource>,
    validation: Box<dyn ExampleSource>,
    checkpoints: CheckpointCoordinator,
    sink: Box<dyn SummarySink>,
    settings: LoopSettings,
    global_step: u64,
}

impl<M, O> Trainer<M, O>
where
    M: SegmentationModel,
    O: Optimizer<M>,
{
    /// Creates a trainer at step 0.
    ///
    /// `training` should yield augmented examples and `validation`
    /// unaugmented ones.
    pub fn new(
        model: M,
        optimizer: O,
        training: Box<dyn ExampleSource>,
        validation: Box<dyn ExampleSource>,
        checkpoints: CheckpointCoordinator,
        sink: Box<dyn SummarySink>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            model,
            optimizer,
            training,
            validation,
            checkpoints,
            sink,
            settings,
            global_step: 0,
        }
    }

    /// Restores model, optimizer and step counter from the newest valid
    /// checkpoint. Returns the restored step.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::NoCheckpoint`](crate::TrainError::NoCheckpoint)
    /// when there is nothing to restore.
    pub fn resume(&mut self) -> Result<u64> {
        let state = self.checkpoints.resume()?;
        self.model.restore(&state.model)?;
        self.optimizer.restore(&state.optimizer)?;
        self.global_step = state.global_step;
        Ok(self.global_step)
    }

    /// Runs `total_steps` steps starting at the current global step.
    ///
    /// The summary sink is flushed before returning, whether the run
    /// succeeded or not.
    ///
    /// # Errors
    ///
    /// Any failure reading an example, in the model or optimizer, or while
    /// writing a checkpoint ends the run.
    pub fn run(&mut self, total_steps: u64) -> Result<TrainingReport> {
        let result = self.run_steps(total_steps);
        let flushed = self.sink.flush();

        match result {
            Ok(report) => {
                flushed?;
                Ok(report)
            }
            Err(e) => {
                if let Err(flush_error) = flushed {
                    tracing::warn!(error = %flush_error, "Failed to flush summaries");
                }
                tracing::error!(step = self.global_step, error = %e, "Training stopped");
                Err(e)
            }
        }
    }

    fn run_steps(&mut self, total_steps: u64) -> Result<TrainingReport> {
        let mut report = TrainingReport {
            start_step: self.global_step,
            final_step: self.global_step,
            ..Default::default()
        };
        tracing::info!("Starting training @ {}", self.global_step);

        for i in 0..total_steps {
            report.last_training_loss = Some(self.train_step()?);

            let step = self.global_step;
            let actions = self.settings.schedule.actions(step, i + 1 == total_steps);

            if actions.summary {
                self.write_summaries(step)?;
            }
            if actions.validation {
                report.last_validation_loss = Some(self.validate(step)?);
            }
            if actions.checkpoint {
                let path = self.save_checkpoint(step)?;
                report.checkpoints.push((step, path));
            }
        }

        report.final_step = self.global_step;
        tracing::info!("Done!");
        Ok(report)
    }

    /// One update. Returns the data loss, computed before the update.
    fn train_step(&mut self) -> Result<f64> {
        let example = self.training.next_example()?;

        let prediction = self.model.forward(&example.image, Mode::Train)?;
        let data_loss = self.model.loss(&prediction, &example.label)?;
        let total_loss =
            data_loss + self.settings.regularization_weight * self.model.regularization_loss();

        self.optimizer.step(
            &mut self.model,
            StepInput {
                image: &example.image,
                label: &example.label,
                prediction: &prediction,
                learning_rate: self.settings.learning_rate,
                regularization_weight: self.settings.regularization_weight,
            },
        )?;
        self.global_step += 1;

        let tagged = self.global_step - 1;
        self.sink
            .record(SummaryRecord::scalar(TRAINING_LOGISTIC_LOSS, tagged, data_loss))?;
        self.sink
            .record(SummaryRecord::scalar(TRAINING_LOSS, tagged, total_loss))?;
        tracing::info!(
            image = %example.paths.image,
            "Training loss @ {tagged}: {data_loss} (logistic) {total_loss} (total)"
        );

        Ok(data_loss)
    }

    fn write_summaries(&mut self, step: u64) -> Result<()> {
        for (tag, value) in self.model.summary() {
            self.sink.record(SummaryRecord::scalar(tag, step, value))?;
        }
        tracing::info!("Summaries written @ {step}");
        Ok(())
    }

    /// Mean data loss over `validation_sample_size` examples, dropout off.
    fn validate(&mut self, step: u64) -> Result<f64> {
        tracing::info!("Evaluating model");
        let samples = self.settings.schedule.validation_sample_size;

        let mut mean = 0.0;
        for _ in 0..samples {
            let example = self.validation.next_example()?;
            let prediction = self.model.forward(&example.image, Mode::Eval)?;
            mean += self.model.loss(&prediction, &example.label)? / samples as f64;
        }

        self.sink
            .record(SummaryRecord::scalar(VALIDATION_LOGISTIC_LOSS, step, mean))?;
        tracing::info!("Validation loss @ {step}: {mean}");
        Ok(mean)
    }

    fn save_checkpoint(&mut self, step: u64) -> Result<PathBuf> {
        let state = TrainingState {
            global_step: step,
            model: self.model.snapshot()?,
            optimizer: self.optimizer.snapshot()?,
        };
        let path = self.checkpoints.save(&state)?;
        self.sink.record(SummaryRecord::Checkpoint {
            step,
            path: path.clone(),
        })?;
        // Summaries on disk never lag behind the newest checkpoint
        self.sink.flush()?;
        Ok(path)
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CheckpointConfig, StorageConfig};
    use crate::dataset::ExamplePaths;
    use crate::decode::Example;
    use crate::error::TrainError;
    use crate::storage::LocalStorage;
    use crate::summary::MemorySummarySink;
    use crate::tensor::{Image, Label};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Loss is the first image value; updates are counted by the optimizer.
    #[derive(Default)]
    struct MockModel {
        updates: u64,
        train_passes: usize,
        eval_passes: usize,
    }

    impl SegmentationModel for MockModel {
        type Prediction = f64;

        fn forward(&mut self, image: &Image, mode: Mode) -> Result<f64> {
            match mode {
                Mode::Train => self.train_passes += 1,
                Mode::Eval => self.eval_passes += 1,
            }
            Ok(f64::from(image.data[0]))
        }

        fn loss(&self, prediction: &f64, _label: &Label) -> Result<f64> {
            Ok(*prediction)
        }

        fn regularization_loss(&self) -> f64 {
            10.0
        }

        fn summary(&self) -> Vec<(String, f64)> {
            vec![("mock/updates".to_string(), self.updates as f64)]
        }

        fn snapshot(&self) -> Result<Vec<u8>> {
            Ok(self.updates.to_le_bytes().to_vec())
        }

        fn restore(&mut self, bytes: &[u8]) -> Result<()> {
            let bytes: [u8; 8] = bytes
                .try_into()
                .map_err(|_| TrainError::model("bad mock snapshot"))?;
            self.updates = u64::from_le_bytes(bytes);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockOptimizer {
        steps: u64,
        last_learning_rate: f64,
    }

    impl Optimizer<MockModel> for MockOptimizer {
        fn step(&mut self, model: &mut MockModel, input: StepInput<'_, f64>) -> Result<()> {
            self.steps += 1;
            self.last_learning_rate = input.learning_rate;
            model.updates += 1;
            Ok(())
        }

        fn snapshot(&self) -> Result<Vec<u8>> {
            Ok(self.steps.to_le_bytes().to_vec())
        }

        fn restore(&mut self, bytes: &[u8]) -> Result<()> {
            let bytes: [u8; 8] = bytes
                .try_into()
                .map_err(|_| TrainError::model("bad optimizer snapshot"))?;
            self.steps = u64::from_le_bytes(bytes);
            Ok(())
        }
    }

    /// Yields 1x1 examples with a fixed value, failing after `fail_after`.
    struct FixedSource {
        value: f32,
        served: Arc<AtomicUsize>,
        fail_after: Option<usize>,
    }

    impl FixedSource {
        fn boxed(value: f32, served: &Arc<AtomicUsize>) -> Box<dyn ExampleSource> {
            Box::new(Self {
                value,
                served: served.clone(),
                fail_after: None,
            })
        }
    }

    impl ExampleSource for FixedSource {
        fn next_example(&mut self) -> Result<Example> {
            let n = self.served.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|limit| n >= limit) {
                return Err(TrainError::data_read("p9/broken.png", "failed to decode image"));
            }
            Ok(Example {
                paths: ExamplePaths {
                    image: "p1/a.png".to_string(),
                    label: "p1/a_mask.png".to_string(),
                },
                image: Image::new(1, 1, 1, vec![self.value]).unwrap(),
                label: Label::new(1, 1, vec![1]).unwrap(),
            })
        }
    }

    struct Fixture {
        _temp: TempDir,
        storage: Arc<LocalStorage>,
        sink: MemorySummarySink,
        training_served: Arc<AtomicUsize>,
        validation_served: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let storage = Arc::new(
                LocalStorage::new(&StorageConfig {
                    base_path: temp.path().to_path_buf(),
                    ..Default::default()
                })
                .unwrap(),
            );
            Self {
                _temp: temp,
                storage,
                sink: MemorySummarySink::new(),
                training_served: Arc::new(AtomicUsize::new(0)),
                validation_served: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn trainer(&self, schedule: ScheduleConfig) -> Trainer<MockModel, MockOptimizer> {
            self.trainer_with_training(
                FixedSource::boxed(0.25, &self.training_served),
                schedule,
            )
        }

        fn trainer_with_training(
            &self,
            training: Box<dyn ExampleSource>,
            schedule: ScheduleConfig,
        ) -> Trainer<MockModel, MockOptimizer> {
            let checkpoints = CheckpointCoordinator::new(
                self.storage.clone(),
                "run",
                &CheckpointConfig::default(),
            );
            Trainer::new(
                MockModel::default(),
                MockOptimizer::default(),
                training,
                FixedSource::boxed(0.5, &self.validation_served),
                checkpoints,
                Box::new(self.sink.clone()),
                LoopSettings {
                    learning_rate: 4e-5,
                    regularization_weight: 0.01,
                    schedule,
                },
            )
        }
    }

    fn steps(records: Vec<(u64, f64)>) -> Vec<u64> {
        records.into_iter().map(|(step, _)| step).collect()
    }

    #[test]
    fn test_schedule_actions() {
        let schedule = ScheduleConfig::default();

        assert_eq!(
            schedule.actions(1, false),
            StepActions {
                summary: true,
                validation: true,
                checkpoint: false
            }
        );
        assert_eq!(
            schedule.actions(50, false),
            StepActions {
                summary: true,
                validation: false,
                checkpoint: false
            }
        );
        assert_eq!(
            schedule.actions(500, false),
            StepActions {
                summary: true,
                validation: true,
                checkpoint: true
            }
        );
        assert_eq!(schedule.actions(7, false), StepActions::default());
        assert!(schedule.actions(7, true).checkpoint);
    }

    #[test]
    fn test_250_steps_trigger_coincidence() {
        let fixture = Fixture::new();
        let mut trainer = fixture.trainer(ScheduleConfig::default());

        let report = trainer.run(250).unwrap();

        assert_eq!(report.start_step, 0);
        assert_eq!(report.final_step, 250);
        assert_eq!(trainer.global_step(), 250);

        let validation = fixture.sink.scalars(VALIDATION_LOGISTIC_LOSS);
        assert_eq!(steps(validation.clone()), vec![1, 100, 200]);
        assert!(validation.iter().all(|(_, v)| (v - 0.5).abs() < 1e-12));

        let checkpoints: Vec<u64> = fixture.sink.checkpoints().into_iter().map(|(s, _)| s).collect();
        assert_eq!(checkpoints, vec![250]);
        assert_eq!(report.checkpoints.len(), 1);

        assert_eq!(
            steps(fixture.sink.scalars("mock/updates")),
            vec![1, 50, 100, 150, 200, 250]
        );

        // Training losses are tagged with the step before the update
        let training = steps(fixture.sink.scalars(TRAINING_LOGISTIC_LOSS));
        assert_eq!(training, (0..250).collect::<Vec<_>>());
        let total = fixture.sink.scalars(TRAINING_LOSS);
        assert!((total[0].1 - (0.25 + 0.01 * 10.0)).abs() < 1e-12);

        assert_eq!(fixture.training_served.load(Ordering::SeqCst), 250);
        assert_eq!(fixture.validation_served.load(Ordering::SeqCst), 15);
        assert_eq!(trainer.model().train_passes, 250);
        assert_eq!(trainer.model().eval_passes, 15);
        assert_eq!(trainer.optimizer().last_learning_rate, 4e-5);
        // Once after the checkpoint, once on return
        assert_eq!(fixture.sink.flush_count(), 2);
    }

    #[test]
    fn test_single_step_checkpoint_and_resume() {
        let fixture = Fixture::new();
        let schedule = ScheduleConfig {
            checkpoint_interval: 1,
            ..Default::default()
        };

        let mut trainer = fixture.trainer(schedule.clone());
        let report = trainer.run(1).unwrap();
        assert_eq!(report.checkpoints.len(), 1);
        assert_eq!(report.checkpoints[0].0, 1);
        assert_eq!(fixture.sink.checkpoints().len(), 1);

        let mut resumed = fixture.trainer(schedule);
        assert_eq!(resumed.resume().unwrap(), 1);
        assert_eq!(resumed.global_step(), 1);
        assert_eq!(resumed.model().updates, 1);
        assert_eq!(resumed.optimizer().steps, 1);
    }

    #[test]
    fn test_resumed_run_continues_step_count() {
        let fixture = Fixture::new();
        let schedule = ScheduleConfig {
            checkpoint_interval: 2,
            ..Default::default()
        };

        fixture.trainer(schedule.clone()).run(3).unwrap();

        let mut resumed = fixture.trainer(schedule);
        assert_eq!(resumed.resume().unwrap(), 3);
        let report = resumed.run(2).unwrap();

        assert_eq!(report.start_step, 3);
        assert_eq!(report.final_step, 5);
        let checkpoints: Vec<u64> = fixture.sink.checkpoints().into_iter().map(|(s, _)| s).collect();
        assert_eq!(checkpoints, vec![2, 3, 4, 5]);

        // Step 1 triggers do not fire again after resuming
        assert_eq!(steps(fixture.sink.scalars(VALIDATION_LOGISTIC_LOSS)), vec![1]);
        assert_eq!(
            steps(fixture.sink.scalars(TRAINING_LOSS)),
            vec![0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn test_sink_flushed_with_every_checkpoint() {
        let fixture = Fixture::new();
        let schedule = ScheduleConfig {
            checkpoint_interval: 2,
            ..Default::default()
        };
        let mut trainer = fixture.trainer(schedule);

        trainer.run(4).unwrap();

        let records = fixture.sink.records();
        assert_eq!(fixture.sink.checkpoints().len(), 2);
        assert!(matches!(
            records.last(),
            Some(SummaryRecord::Checkpoint { step: 4, .. })
        ));
        assert_eq!(fixture.sink.flush_count(), 3);
    }

    #[test]
    fn test_validation_draws_configured_sample_size() {
        let fixture = Fixture::new();
        let schedule = ScheduleConfig {
            validation_sample_size: 3,
            ..Default::default()
        };
        let mut trainer = fixture.trainer(schedule);

        trainer.run(1).unwrap();

        assert_eq!(fixture.validation_served.load(Ordering::SeqCst), 3);
        assert_eq!(trainer.model().eval_passes, 3);
    }

    #[test]
    fn test_resume_without_checkpoint_fails() {
        let fixture = Fixture::new();
        let mut trainer = fixture.trainer(ScheduleConfig::default());
        assert!(matches!(
            trainer.resume(),
            Err(TrainError::NoCheckpoint { .. })
        ));
    }

    #[test]
    fn test_data_read_error_is_fatal_and_flushes() {
        let fixture = Fixture::new();
        let training = Box::new(FixedSource {
            value: 0.25,
            served: fixture.training_served.clone(),
            fail_after: Some(3),
        });
        let mut trainer = fixture.trainer_with_training(training, ScheduleConfig::default());

        let err = trainer.run(10).unwrap_err();

        assert!(err.is_data_read());
        assert_eq!(trainer.global_step(), 3);
        // Not skipped, not retried
        assert_eq!(fixture.training_served.load(Ordering::SeqCst), 4);
        assert!(fixture.sink.checkpoints().is_empty());
        assert_eq!(fixture.sink.flush_count(), 1);
    }

    #[test]
    fn test_zero_steps_is_a_no_op() {
        let fixture = Fixture::new();
        let mut trainer = fixture.trainer(ScheduleConfig::default());
        let report = trainer.run(0).unwrap();

        assert_eq!(report.final_step, 0);
        assert!(fixture.sink.records().is_empty());
    }
}
