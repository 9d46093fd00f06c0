//! Patient-level evaluation of a trained checkpoint.
//!
//! Every clip of the evaluation set is scored, raw logits are averaged per
//! patient, and the argmax of the mean becomes the patient's prediction.

use std::collections::BTreeMap;

use candle_core::Device;
use lungfusion_core::{CovidStatus, LungFusionError, PatientId, PipelineConfig, PredictionRecord, Result};
use lungfusion_model::{CheckpointMeta, LungFusionModel};

use crate::dataset::DatasetIndex;
use crate::training::data::{collate, BatchPlan};
use crate::training::metrics::{ConfusionMatrix, ValidationMetrics};
use crate::training::prefetch::{for_each_batch, PrefetchOptions};

pub mod aggregate;
pub mod report;

pub use aggregate::{aggregate_patient_logits, ClipLogits};
pub use report::{render_report, write_report, REPORT_HEADER};

/// Outcome of an evaluation run.
#[derive(Debug, Clone)]
pub struct EvaluationSummary {
    /// One record per patient, sorted by id.
    pub predictions: Vec<PredictionRecord>,
    pub clips_scored: usize,
    pub skipped_samples: usize,
    pub checkpoint: CheckpointMeta,
    /// Patient-level metrics, present only when every scored patient had a
    /// classification artifact.
    pub patient_metrics: Option<ValidationMetrics>,
}

/// Score every clip in `dataset` with the configured checkpoint and write the
/// patient report.
pub fn evaluate(
    config: &PipelineConfig,
    dataset: &DatasetIndex,
    device: &Device,
) -> Result<EvaluationSummary> {
    let eval = &config.evaluation;
    let (model, checkpoint) =
        LungFusionModel::from_checkpoint(&config.model, &eval.checkpoint_path, device)?;
    tracing::info!(
        checkpoint = %eval.checkpoint_path.display(),
        epoch = checkpoint.epoch,
        val_accuracy = checkpoint.val_accuracy,
        clips = dataset.len(),
        "Evaluating"
    );

    let batches = BatchPlan::new((0..dataset.len()).collect(), eval.batch_size).batches();
    let prefetch = PrefetchOptions::from_config(&config.data);

    let mut scored: Vec<ClipLogits> = Vec::with_capacity(dataset.len());
    let mut labels: BTreeMap<PatientId, CovidStatus> = BTreeMap::new();
    let mut skipped = 0;
    for_each_batch(dataset, &batches, prefetch, |loaded| {
        skipped += loaded.skipped;
        if loaded.examples.is_empty() {
            return Ok(());
        }
        let batch = collate(&loaded.examples, device)?;
        let logits: Vec<Vec<f32>> = model
            .forward(&batch.video, &batch.clinical)?
            .detach()
            .to_vec2()
            .map_err(|e| LungFusionError::Model(format!("logits to vec: {e}")))?;
        for (example, row) in loaded.examples.iter().zip(logits) {
            labels.insert(example.patient_id.clone(), example.label);
            scored.push(ClipLogits {
                patient_id: example.patient_id.clone(),
                logits: row,
            });
        }
        Ok(())
    })?;

    let clips_scored = scored.len();
    let predictions = aggregate_patient_logits(scored);
    write_report(&eval.report_path, &predictions)?;

    let patient_metrics = patient_metrics(dataset, &predictions, &labels);
    if let Some(metrics) = &patient_metrics {
        tracing::info!(patients = predictions.len(), "Patient-level {metrics}");
    }

    Ok(EvaluationSummary {
        predictions,
        clips_scored,
        skipped_samples: skipped,
        checkpoint,
        patient_metrics,
    })
}

fn patient_metrics(
    dataset: &DatasetIndex,
    predictions: &[PredictionRecord],
    labels: &BTreeMap<PatientId, CovidStatus>,
) -> Option<ValidationMetrics> {
    if predictions.is_empty() {
        return None;
    }
    let fully_labeled = predictions.iter().all(|p| {
        dataset
            .records()
            .iter()
            .any(|r| r.patient_id == p.patient_id && r.label_path.is_some())
    });
    if !fully_labeled {
        return None;
    }

    let mut confusion = ConfusionMatrix::default();
    for prediction in predictions {
        let actual = labels.get(&prediction.patient_id)?;
        confusion.record(prediction.status, *actual);
    }
    Some(confusion.metrics())
}
