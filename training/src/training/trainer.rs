//! Training loop with best-validation-accuracy checkpointing.

use candle_core::{Device, D};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use indicatif::{ProgressBar, ProgressStyle};
use lungfusion_core::{LungFusionError, PipelineConfig, Result};
use lungfusion_model::{CheckpointMeta, LungFusionModel};

use crate::dataset::DatasetIndex;
use crate::training::data::{collate, split_dataset, BatchPlan};
use crate::training::metrics::{ConfusionMatrix, ValidationMetrics};
use crate::training::prefetch::{for_each_batch, PrefetchOptions};

/// Per-epoch metrics logged during training.
#[derive(Debug, Clone)]
pub struct EpochMetrics {
    /// 1-based.
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_metrics: ValidationMetrics,
    /// Whether this epoch replaced the checkpoint.
    pub checkpointed: bool,
    /// Samples dropped because they failed to load.
    pub skipped_samples: usize,
}

/// Decides when validation accuracy warrants a new checkpoint.
///
/// The first observation always wins; afterwards only a strict improvement
/// does.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestAccuracyTracker {
    best: Option<f64>,
}

impl BestAccuracyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an epoch's accuracy; returns `true` if it is the new best.
    pub fn observe(&mut self, accuracy: f64) -> bool {
        match self.best {
            Some(best) if accuracy <= best => false,
            _ => {
                self.best = Some(accuracy);
                true
            }
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }
}

/// Loss and accuracy accumulated over one pass.
#[derive(Debug, Default)]
struct PassStats {
    loss_sum: f64,
    confusion: ConfusionMatrix,
    skipped: usize,
}

impl PassStats {
    /// `batch_loss` is the mean over the batch; weight it by batch size.
    fn record(&mut self, batch_loss: f64, predictions: &[u32], labels: &[u32]) {
        self.loss_sum += batch_loss * labels.len() as f64;
        self.confusion.record_indices(predictions, labels);
    }

    fn mean_loss(&self) -> f64 {
        match self.confusion.total() {
            0 => 0.0,
            n => self.loss_sum / n as f64,
        }
    }
}

/// Run the full pipeline: split, train for the configured number of epochs,
/// validate after each, and keep the best checkpoint.
pub fn train(
    config: &PipelineConfig,
    dataset: &DatasetIndex,
    device: &Device,
) -> Result<Vec<EpochMetrics>> {
    let cfg = &config.training;
    let split = split_dataset(dataset, cfg.split, cfg.val_ratio, cfg.seed);
    if split.train_indices.is_empty() {
        return Err(LungFusionError::Dataset(format!(
            "training partition is empty ({} clips, val_ratio={})",
            dataset.len(),
            cfg.val_ratio
        )));
    }

    let model = LungFusionModel::new(&config.model, device)?;
    let mut optimizer = AdamW::new(
        model.trainable_vars(),
        ParamsAdamW {
            lr: cfg.lr,
            weight_decay: cfg.weight_decay,
            ..Default::default()
        },
    )
    .map_err(|e| LungFusionError::Model(format!("Failed to create optimizer: {e}")))?;

    let prefetch = PrefetchOptions::from_config(&config.data);
    let mut plan = BatchPlan::new(split.train_indices.clone(), cfg.batch_size);
    let val_batches = BatchPlan::new(split.val_indices.clone(), cfg.batch_size).batches();
    let mut tracker = BestAccuracyTracker::new();
    let mut history = Vec::with_capacity(cfg.epochs);

    tracing::info!(
        lr = cfg.lr,
        weight_decay = cfg.weight_decay,
        batch_size = cfg.batch_size,
        epochs = cfg.epochs,
        train = split.train_indices.len(),
        val = split.val_indices.len(),
        "Training started"
    );

    for epoch in 0..cfg.epochs {
        plan.reshuffle(cfg.seed, epoch);
        let batches = plan.batches();
        let progress = progress_bar(cfg.progress, batches.len(), epoch + 1, cfg.epochs);

        let mut train_stats = PassStats::default();
        for_each_batch(dataset, &batches, prefetch, |loaded| {
            train_stats.skipped += loaded.skipped;
            progress.inc(1);
            if loaded.examples.is_empty() {
                return Ok(());
            }
            let batch = collate(&loaded.examples, device)?;
            let logits = model.forward(&batch.video, &batch.clinical)?;
            let loss = candle_nn::loss::cross_entropy(&logits, &batch.labels)
                .map_err(|e| LungFusionError::Model(format!("Loss computation failed: {e}")))?;
            optimizer
                .backward_step(&loss)
                .map_err(|e| LungFusionError::Model(format!("Backward step failed: {e}")))?;

            let loss_val = loss
                .to_scalar::<f32>()
                .map_err(|e| LungFusionError::Model(format!("Loss scalar failed: {e}")))?
                as f64;
            let predictions: Vec<u32> = logits
                .argmax(D::Minus1)
                .and_then(|t| t.to_vec1())
                .map_err(|e| LungFusionError::Model(format!("argmax failed: {e}")))?;
            let labels: Vec<u32> = batch
                .labels
                .to_vec1()
                .map_err(|e| LungFusionError::Model(format!("labels to vec: {e}")))?;
            train_stats.record(loss_val, &predictions, &labels);
            progress.set_message(format!("loss={loss_val:.4}"));
            Ok(())
        })?;
        progress.finish_and_clear();

        let val_stats = validate(&model, dataset, &val_batches, prefetch, device)?;
        let val_metrics = val_stats.confusion.metrics();

        let checkpointed = tracker.observe(val_metrics.accuracy);
        if checkpointed {
            model.save_checkpoint(
                &cfg.checkpoint_path,
                &CheckpointMeta::now(val_metrics.accuracy, epoch + 1),
            )?;
        }

        let metrics = EpochMetrics {
            epoch: epoch + 1,
            train_loss: train_stats.mean_loss(),
            train_accuracy: train_stats.confusion.metrics().accuracy,
            val_loss: val_stats.mean_loss(),
            val_metrics,
            checkpointed,
            skipped_samples: train_stats.skipped + val_stats.skipped,
        };
        tracing::info!(
            epoch = metrics.epoch,
            train_loss = metrics.train_loss,
            train_acc = metrics.train_accuracy,
            val_loss = metrics.val_loss,
            checkpointed,
            skipped = metrics.skipped_samples,
            "Epoch {}/{} | {}",
            metrics.epoch,
            cfg.epochs,
            metrics.val_metrics,
        );
        history.push(metrics);
    }

    tracing::info!(
        best_val_accuracy = ?tracker.best(),
        checkpoint = %cfg.checkpoint_path.display(),
        "Training finished"
    );
    Ok(history)
}

fn validate(
    model: &LungFusionModel,
    dataset: &DatasetIndex,
    batches: &[Vec<usize>],
    prefetch: PrefetchOptions,
    device: &Device,
) -> Result<PassStats> {
    let mut stats = PassStats::default();
    for_each_batch(dataset, batches, prefetch, |loaded| {
        stats.skipped += loaded.skipped;
        if loaded.examples.is_empty() {
            return Ok(());
        }
        let batch = collate(&loaded.examples, device)?;
        let logits = model.forward(&batch.video, &batch.clinical)?.detach();
        let loss = candle_nn::loss::cross_entropy(&logits, &batch.labels)
            .and_then(|l| l.to_scalar::<f32>())
            .map_err(|e| LungFusionError::Model(format!("Val loss failed: {e}")))?;
        let predictions: Vec<u32> = logits
            .argmax(D::Minus1)
            .and_then(|t| t.to_vec1())
            .map_err(|e| LungFusionError::Model(format!("argmax failed: {e}")))?;
        let labels: Vec<u32> = batch
            .labels
            .to_vec1()
            .map_err(|e| LungFusionError::Model(format!("val labels to vec: {e}")))?;
        stats.record(loss as f64, &predictions, &labels);
        Ok(())
    })?;
    Ok(stats)
}

fn progress_bar(enabled: bool, len: usize, epoch: usize, epochs: usize) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template("{prefix} [{bar:30}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar.set_prefix(format!("epoch {epoch}/{epochs}"));
    bar
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
