// rust/segtrain-core/src/dataset/stream.rs

//! Infinite reshuffling stream of example paths.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::manifest::Manifest;
use crate::error::{Result, TrainError};

/// Paths of one example, relative to the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExamplePaths {
    pub image: String,
    pub label: String,
}

/// An endless stream over the pairs of a manifest.
///
/// Pairs are yielded in the order of a random permutation; when the
/// permutation is used up a fresh one is drawn. Every window of one full
/// permutation therefore contains each pair exactly once. Each stream owns
/// its own generator, so training and validation never share shuffling
/// state.
pub struct ExampleStream {
    pairs: Vec<ExamplePaths>,
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
    epoch: u64,
}

impl ExampleStream {
    /// Creates a stream shuffled from OS entropy.
    ///
    /// # Errors
    ///
    /// Returns a format error if the manifest has no records.
    pub fn new(manifest: &Manifest) -> Result<Self> {
        Self::with_rng(manifest, StdRng::from_entropy())
    }

    /// Creates a stream with a reproducible shuffle.
    pub fn with_seed(manifest: &Manifest, seed: u64) -> Result<Self> {
        Self::with_rng(manifest, StdRng::seed_from_u64(seed))
    }

    fn with_rng(manifest: &Manifest, mut rng: StdRng) -> Result<Self> {
        if manifest.is_empty() {
            return Err(TrainError::format(
                "example stream",
                "cannot stream from an empty manifest",
            ));
        }

        let pairs: Vec<ExamplePaths> = manifest
            .iter()
            .map(|r| ExamplePaths {
                image: r.image_path.clone(),
                label: r.label_path.clone(),
            })
            .collect();
        let mut order: Vec<usize> = (0..pairs.len()).collect();
        order.shuffle(&mut rng);

        Ok(Self {
            pairs,
            order,
            cursor: 0,
            rng,
            epoch: 0,
        })
    }

    /// Returns the next pair, reshuffling when the permutation runs out.
    pub fn next_pair(&mut self) -> ExamplePaths {
        if self.cursor == self.order.len() {
            self.order.shuffle(&mut self.rng);
            self.cursor = 0;
            self.epoch += 1;
            tracing::debug!(epoch = self.epoch, pairs = self.pairs.len(), "Reshuffled example stream");
        }

        let index = self.order[self.cursor];
        self.cursor += 1;
        self.pairs[index].clone()
    }

    /// Number of distinct pairs in one permutation.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Always false; an empty manifest is rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Number of completed passes over the manifest.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Iterator for ExampleStream {
    type Item = ExamplePaths;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_pair())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (usize::MAX, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn manifest(n: usize) -> Manifest {
        let text: String = (0..n)
            .map(|i| format!("p{i}/img.png,p{i}/mask.png\n"))
            .collect();
        Manifest::parse("m.csv", text.as_bytes()).unwrap()
    }

    #[test]
    fn test_each_window_is_a_permutation() {
        let n = 7;
        let mut stream = ExampleStream::with_seed(&manifest(n), 1).unwrap();

        for window in 0..10 {
            let seen: HashSet<ExamplePaths> = (0..n).map(|_| stream.next_pair()).collect();
            assert_eq!(seen.len(), n, "window {window} repeated a pair");
        }
        assert_eq!(stream.epoch(), 9);
    }

    #[test]
    fn test_single_record_repeats_forever() {
        let mut stream = ExampleStream::new(&manifest(1)).unwrap();
        let first = stream.next_pair();
        for _ in 0..5 {
            assert_eq!(stream.next_pair(), first);
        }
    }

    #[test]
    fn test_iterator_never_ends() {
        let stream = ExampleStream::new(&manifest(3)).unwrap();
        assert_eq!(stream.take(100).count(), 100);
    }

    #[test]
    fn test_same_seed_same_order() {
        let m = manifest(20);
        let a: Vec<_> = ExampleStream::with_seed(&m, 9).unwrap().take(60).collect();
        let b: Vec<_> = ExampleStream::with_seed(&m, 9).unwrap().take(60).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_reshuffles_between_epochs() {
        let m = manifest(20);
        let mut stream = ExampleStream::with_seed(&m, 4).unwrap();
        let first: Vec<_> = (0..20).map(|_| stream.next_pair()).collect();
        let orders: Vec<Vec<_>> = (0..5)
            .map(|_| (0..20).map(|_| stream.next_pair()).collect())
            .collect();

        // 20! orders; five identical reshuffles would be a broken generator
        assert!(orders.iter().any(|o| *o != first));
    }

    #[test]
    fn test_empty_manifest_rejected() {
        let empty = Manifest::default();
        assert!(ExampleStream::new(&empty).is_err());
    }
}
