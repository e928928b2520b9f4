use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    loader::BatchLoader, pipeline::SamplePipeline, source::SampleSource, CharacterBatch, Result,
};

/// One optimization step of a character classifier. The network, loss,
/// optimizer and device live behind this trait.
pub trait Trainer {
    /// Runs forward, backward and optimizer step on `batch`, returning the
    /// loss.
    fn step(&mut self, batch: &CharacterBatch) -> Result<f32>;

    /// Persists the current weights.
    fn checkpoint(&mut self, _iteration: usize) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSchedule {
    pub epochs: usize,
    pub records_per_step: usize,
    /// Steps between running loss reports.
    pub print_every: usize,
    /// Steps between checkpoints.
    pub save_every: usize,
    pub seed: u64,
}

impl Default for TrainingSchedule {
    fn default() -> Self {
        Self {
            epochs: 1,
            records_per_step: 1,
            print_every: 100,
            save_every: 10_000,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingStats {
    pub steps: usize,
    /// Steps whose batch had no characters left after filtering.
    pub skipped: usize,
    pub samples: usize,
    pub last_running_loss: Option<f32>,
}

/// Feeds the records at `indices` through `trainer` for the configured
/// number of epochs. Each epoch visits the records in a fresh random order.
#[instrument(level = "debug", skip_all, fields(records = indices.len()))]
pub fn train<S: SampleSource, T: Trainer>(
    pipeline: &SamplePipeline<S>,
    indices: &[usize],
    trainer: &mut T,
    schedule: &TrainingSchedule,
) -> Result<TrainingStats> {
    let start = Instant::now();
    let print_every = schedule.print_every.max(1);
    let save_every = schedule.save_every.max(1);
    let mut stats = TrainingStats::default();
    let mut running_loss = 0.0f32;
    let mut since_print = 0usize;

    for epoch in 0..schedule.epochs {
        let seed = schedule.seed.wrapping_add(epoch as u64);
        let loader = BatchLoader::new(pipeline, indices.to_vec(), seed)
            .records_per_step(schedule.records_per_step)
            .shuffled();

        for batch in loader {
            let batch = batch?;
            if batch.is_empty() {
                stats.skipped += 1;
                continue;
            }

            running_loss += trainer.step(&batch)?;
            since_print += 1;
            stats.steps += 1;
            stats.samples += batch.len();

            if stats.steps % print_every == 0 {
                let mean = running_loss / since_print as f32;
                log::info!(
                    "[{epoch}, {:5}] loss: {mean:.3} ({:.1?} elapsed)",
                    stats.steps,
                    start.elapsed()
                );
                stats.last_running_loss = Some(mean);
                running_loss = 0.0;
                since_print = 0;
            }
            if stats.steps % save_every == 0 {
                log::info!("Saving checkpoint at step {}", stats.steps);
                trainer.checkpoint(stats.steps)?;
            }
        }
    }

    log::info!("Finished training in {:.1?}", start.elapsed());
    Ok(stats)
}
