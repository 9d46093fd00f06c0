//! Background sample loading.
//!
//! Worker threads decode whole batches ahead of the consumer and hand them
//! over through a bounded channel. Batches are delivered in completion order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};

use lungfusion_core::{DataConfig, Result};

use crate::dataset::{DatasetIndex, TrainingExample};

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchOptions {
    pub workers: usize,
    /// Loaded batches buffered ahead of the consumer.
    pub queue_depth: usize,
    /// Log and drop samples that fail to load instead of aborting.
    pub skip_failed: bool,
}

impl PrefetchOptions {
    pub fn from_config(config: &DataConfig) -> Self {
        Self {
            workers: config.prefetch_workers,
            queue_depth: config.prefetch_queue,
            skip_failed: config.skip_failed_samples,
        }
    }
}

/// A loaded batch. `examples` may be shorter than requested when samples
/// were skipped.
#[derive(Debug)]
pub struct LoadedBatch {
    pub examples: Vec<TrainingExample>,
    pub skipped: usize,
}

/// Load every batch in `batches` on a worker pool and feed each one to
/// `consume` on the calling thread.
///
/// Returns the first error from a worker (when skipping is disabled) or from
/// `consume`. Outstanding workers stop once the consumer goes away.
pub fn for_each_batch<F>(
    dataset: &DatasetIndex,
    batches: &[Vec<usize>],
    options: PrefetchOptions,
    consume: F,
) -> Result<()>
where
    F: FnMut(LoadedBatch) -> Result<()>,
{
    if batches.is_empty() {
        return Ok(());
    }
    let workers = options.workers.clamp(1, batches.len());
    let (tx, rx) = mpsc::sync_channel::<Result<LoadedBatch>>(options.queue_depth.max(1));
    let next = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            scope.spawn(move || loop {
                let i = next.fetch_add(1, Ordering::Relaxed);
                let Some(indices) = batches.get(i) else {
                    break;
                };
                let loaded = load_batch(dataset, indices, options.skip_failed);
                let failed = loaded.is_err();
                if tx.send(loaded).is_err() || failed {
                    break;
                }
            });
        }
        drop(tx);
        drain(rx, consume)
    })
}

/// Consumes `rx` so that an early return drops the receiver and unblocks
/// workers waiting on a full channel before the scope joins them.
fn drain<F>(rx: Receiver<Result<LoadedBatch>>, mut consume: F) -> Result<()>
where
    F: FnMut(LoadedBatch) -> Result<()>,
{
    for loaded in rx {
        consume(loaded?)?;
    }
    Ok(())
}

fn load_batch(dataset: &DatasetIndex, indices: &[usize], skip_failed: bool) -> Result<LoadedBatch> {
    let mut examples = Vec::with_capacity(indices.len());
    let mut skipped = 0;
    for &index in indices {
        match dataset.get(index) {
            Ok(example) => examples.push(example),
            Err(e) if skip_failed => {
                let clip = dataset.clips().get(index).map(|c| c.video_path.display().to_string());
                tracing::warn!(
                    index,
                    patient = ?dataset.patient_of(index).map(|p| p.as_str()),
                    clip = ?clip,
                    error = %e,
                    "Skipping sample that failed to load"
                );
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(LoadedBatch { examples, skipped })
}
