// rust/segtrain-core/src/dataset/prefetch.rs

//! Decoding examples ahead of the training loop.
//!
//! An [`ExamplePipeline`] turns an [`ExampleStream`] into decoded (and, for
//! training, augmented) examples. A [`PrefetchingSource`] moves any source
//! onto a background thread that keeps a small bounded buffer filled, so the
//! loop only waits on I/O when the buffer runs dry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::stream::ExampleStream;
use crate::augment::{standardize, AugmentationStage};
use crate::config::PrefetchConfig;
use crate::decode::{Example, ExampleDecoder};
use crate::error::{Result, TrainError};

/// Anything that can hand the training loop its next example.
pub trait ExampleSource: Send {
    /// Returns the next example. Sources are endless; an error means the
    /// example could not be read and is fatal for the run.
    fn next_example(&mut self) -> Result<Example>;
}

impl<S: ExampleSource + ?Sized> ExampleSource for Box<S> {
    fn next_example(&mut self) -> Result<Example> {
        (**self).next_example()
    }
}

/// Stream, decode and preprocess, in that order.
///
/// With an augmentation stage the example is flipped, rotated and
/// standardized. Without one it is only standardized, which is how
/// validation examples are fed to the model.
pub struct ExamplePipeline {
    stream: ExampleStream,
    decoder: Arc<dyn ExampleDecoder>,
    augmentation: Option<AugmentationStage>,
    rng: StdRng,
}

impl ExamplePipeline {
    pub fn new(
        stream: ExampleStream,
        decoder: Arc<dyn ExampleDecoder>,
        augmentation: Option<AugmentationStage>,
    ) -> Self {
        Self {
            stream,
            decoder,
            augmentation,
            rng: StdRng::from_entropy(),
        }
    }

    /// Seeds the augmentation draws.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

impl ExampleSource for ExamplePipeline {
    fn next_example(&mut self) -> Result<Example> {
        let paths = self.stream.next_pair();
        let example = self.decoder.decode(&paths)?;

        let (image, label) = match &self.augmentation {
            Some(stage) => stage
                .apply_with_rng(&mut self.rng, example.image, example.label)
                .map_err(|e| TrainError::data_read_with_source(&paths.image, "failed to augment example", e))?,
            None => (standardize(example.image), example.label),
        };

        Ok(Example {
            paths,
            image,
            label,
        })
    }
}

/// Runs a source on a dedicated thread behind a bounded channel.
///
/// The worker stops after forwarding the first error. Dropping the
/// `PrefetchingSource` disconnects the channel and joins the worker.
pub struct PrefetchingSource {
    receiver: Option<Receiver<Result<Example>>>,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    /// Used instead of the worker when prefetching is disabled.
    fallback: Option<Box<dyn ExampleSource>>,
    failed: bool,
}

impl PrefetchingSource {
    pub fn new(source: impl ExampleSource + 'static, config: &PrefetchConfig) -> Self {
        if !config.enabled || config.capacity == 0 {
            return Self {
                receiver: None,
                stop_flag: Arc::new(AtomicBool::new(false)),
                worker: None,
                fallback: Some(Box::new(source)),
                failed: false,
            };
        }

        let (sender, receiver) = channel::bounded(config.capacity);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_clone = stop_flag.clone();
        let mut source = source;

        let worker = thread::spawn(move || {
            while !stop_flag_clone.load(Ordering::Relaxed) {
                let item = source.next_example();
                let failed = item.is_err();

                // Blocks while the buffer is full; errors once the consumer is gone.
                if sender.send(item).is_err() || failed {
                    break;
                }
            }
            tracing::debug!("Prefetch worker stopped");
        });

        Self {
            receiver: Some(receiver),
            stop_flag,
            worker: Some(worker),
            fallback: None,
            failed: false,
        }
    }

    /// Returns true if examples are produced on a background thread.
    pub fn is_prefetching_enabled(&self) -> bool {
        self.worker.is_some()
    }

    /// Number of examples waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.receiver.as_ref().map_or(0, Receiver::len)
    }

    /// Stops the worker and waits for it to exit.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        // Disconnecting wakes a worker blocked on a full buffer.
        self.receiver.take();

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl ExampleSource for PrefetchingSource {
    fn next_example(&mut self) -> Result<Example> {
        if let Some(source) = self.fallback.as_mut() {
            return source.next_example();
        }

        if self.failed {
            return Err(TrainError::data_read(
                "<prefetch>",
                "example source already failed",
            ));
        }

        let received = match &self.receiver {
            Some(receiver) => receiver.recv().ok(),
            None => None,
        };

        match received {
            Some(Ok(example)) => Ok(example),
            Some(Err(e)) => {
                self.failed = true;
                Err(e)
            }
            None => {
                self.failed = true;
                Err(TrainError::data_read("<prefetch>", "prefetch worker exited"))
            }
        }
    }
}

impl Drop for PrefetchingSource {
    fn drop(&mut self) {
        self.stop();
    }
}
