use ndarray::{concatenate, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use rayon::prelude::*;
use tracing::instrument;

use crate::{pipeline::SamplePipeline, source::SampleSource, CharacterBatch, Result};

/// Concatenates batches along the sample axis. An empty input gives a batch
/// with no samples and zero-sized images.
pub fn collate(batches: &[CharacterBatch]) -> Result<CharacterBatch> {
    if batches.is_empty() {
        return Ok(CharacterBatch::empty(0));
    }
    let images = batches.iter().map(|b| b.images.view()).collect::<Vec<_>>();
    let labels = batches.iter().map(|b| b.labels.view()).collect::<Vec<_>>();
    Ok(CharacterBatch {
        images: concatenate(Axis(0), &images)?,
        labels: concatenate(Axis(0), &labels)?,
    })
}

/// Record indices divided into training, test and validation parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Randomly assigns 80% of `len` records to training, 15% to testing and
/// the rest to validation.
pub fn split_indices<R: Rng + ?Sized>(len: usize, rng: &mut R) -> DatasetSplit {
    let mut indices = (0..len).collect::<Vec<_>>();
    indices.shuffle(rng);
    let n_train = (0.8 * len as f64) as usize;
    let n_test = (0.15 * len as f64) as usize;
    let validation = indices.split_off(n_train + n_test);
    let test = indices.split_off(n_train);
    DatasetSplit {
        train: indices,
        test,
        validation,
    }
}

/// Random stream for one record, independent of which thread samples it.
pub fn record_rng(seed: u64, index: usize) -> StdRng {
    StdRng::seed_from_u64(seed ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Iterates over records a few at a time, sampling the records of one step
/// in parallel and collating them into a single batch.
pub struct BatchLoader<'a, S> {
    pipeline: &'a SamplePipeline<S>,
    indices: Vec<usize>,
    records_per_step: usize,
    seed: u64,
    position: usize,
}

impl<'a, S: SampleSource> BatchLoader<'a, S> {
    pub fn new(pipeline: &'a SamplePipeline<S>, indices: Vec<usize>, seed: u64) -> Self {
        Self {
            pipeline,
            indices,
            records_per_step: 1,
            seed,
            position: 0,
        }
    }

    pub fn records_per_step(mut self, records: usize) -> Self {
        self.records_per_step = records.max(1);
        self
    }

    /// Visits the records in a random order derived from the seed.
    pub fn shuffled(mut self) -> Self {
        self.indices.shuffle(&mut StdRng::seed_from_u64(self.seed));
        self
    }

    pub fn steps(&self) -> usize {
        self.indices.len().div_ceil(self.records_per_step)
    }

    #[instrument(level = "debug", skip(self))]
    fn load(&self, indices: &[usize]) -> Result<CharacterBatch> {
        let batches = indices
            .par_iter()
            .map(|&index| {
                let mut rng = record_rng(self.seed, index);
                self.pipeline.sample(index, &mut rng)
            })
            .collect::<Result<Vec<_>>>()?;
        collate(&batches)
    }
}

impl<S: SampleSource> Iterator for BatchLoader<'_, S> {
    type Item = Result<CharacterBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.indices.len() {
            return None;
        }
        let end = (self.position + self.records_per_step).min(self.indices.len());
        let step = self.indices[self.position..end].to_vec();
        self.position = end;
        Some(self.load(&step))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, Array4};

    use super::*;

    fn batch(n: usize, label: i64) -> CharacterBatch {
        CharacterBatch {
            images: Array4::from_elem((n, 3, 4, 4), label as f32),
            labels: Array1::from_elem(n, label),
        }
    }

    #[test]
    fn collate_concatenates_along_samples() {
        let collated = collate(&[batch(2, 1), batch(0, 9), batch(3, 2)]).unwrap();
        assert_eq!(collated.images.dim(), (5, 3, 4, 4));
        assert_eq!(collated.labels.to_vec(), vec![1, 1, 2, 2, 2]);
        assert_eq!(collated.images[[4, 0, 0, 0]], 2.0);
    }

    #[test]
    fn collate_of_nothing_is_empty() {
        assert!(collate(&[]).unwrap().is_empty());
    }

    #[test]
    fn split_covers_every_index_once() {
        let split = split_indices(103, &mut StdRng::seed_from_u64(3));
        assert_eq!(split.train.len(), 82);
        assert_eq!(split.test.len(), 15);
        assert_eq!(split.validation.len(), 6);

        let mut all = [split.train, split.test, split.validation].concat();
        all.sort_unstable();
        assert_eq!(all, (0..103).collect::<Vec<_>>());
    }

    #[test]
    fn record_streams_differ_per_index() {
        let a = record_rng(1, 0).random::<u64>();
        let b = record_rng(1, 1).random::<u64>();
        assert_ne!(a, b);
        assert_eq!(a, record_rng(1, 0).random::<u64>());
    }
}
