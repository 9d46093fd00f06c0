//! Seeded train/validation splitting, epoch batch plans, and collation.

use std::collections::BTreeSet;

use candle_core::{Device, Tensor};
use lungfusion_core::{LungFusionError, PatientId, Result, SplitStrategy};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::dataset::{DatasetIndex, TrainingExample};
use crate::video::sampler::CLIP_CHANNELS;

/// Train/validation partition of clip indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSplit {
    pub train_indices: Vec<usize>,
    pub val_indices: Vec<usize>,
}

/// Number of items that go to training: `floor(n * (1 - val_ratio))`.
pub fn train_count(n: usize, val_ratio: f64) -> usize {
    ((n as f64) * (1.0 - val_ratio)).floor() as usize
}

/// Shuffle clip indices `0..n` and cut at [`train_count`].
pub fn random_split(n: usize, val_ratio: f64, seed: u64) -> DataSplit {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let cut = train_count(n, val_ratio);
    let val_indices = indices.split_off(cut);
    DataSplit {
        train_indices: indices,
        val_indices,
    }
}

/// Shuffle patients, cut at [`train_count`] over patients, and assign every
/// clip to its patient's side. `owners[i]` is the patient of clip `i`.
pub fn patient_split(owners: &[PatientId], val_ratio: f64, seed: u64) -> DataSplit {
    let patients: BTreeSet<&PatientId> = owners.iter().collect();
    let mut patients: Vec<&PatientId> = patients.into_iter().collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    patients.shuffle(&mut rng);

    let cut = train_count(patients.len(), val_ratio);
    let train_patients: BTreeSet<&PatientId> = patients[..cut].iter().copied().collect();

    let (train_indices, val_indices): (Vec<usize>, Vec<usize>) =
        (0..owners.len()).partition(|&i| train_patients.contains(&owners[i]));
    DataSplit {
        train_indices,
        val_indices,
    }
}

/// Split `dataset` according to `strategy`.
pub fn split_dataset(
    dataset: &DatasetIndex,
    strategy: SplitStrategy,
    val_ratio: f64,
    seed: u64,
) -> DataSplit {
    let split = match strategy {
        SplitStrategy::Clip => random_split(dataset.len(), val_ratio, seed),
        SplitStrategy::Patient => {
            let owners: Vec<PatientId> = dataset
                .clips()
                .iter()
                .map(|clip| dataset.records()[clip.record].patient_id.clone())
                .collect();
            patient_split(&owners, val_ratio, seed)
        }
    };
    tracing::info!(
        strategy = ?strategy,
        train = split.train_indices.len(),
        val = split.val_indices.len(),
        "Dataset split"
    );
    split
}

// ---------------------------------------------------------------------------
// Batch plan
// ---------------------------------------------------------------------------

/// Mini-batch order over a fixed set of clip indices. Reshuffled each epoch.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    indices: Vec<usize>,
    batch_size: usize,
}

impl BatchPlan {
    pub fn new(indices: Vec<usize>, batch_size: usize) -> Self {
        Self {
            indices,
            batch_size: batch_size.max(1),
        }
    }

    /// Reshuffle for a new epoch using a seeded RNG derived from base seed + epoch.
    pub fn reshuffle(&mut self, seed: u64, epoch: usize) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch as u64));
        self.indices.shuffle(&mut rng);
    }

    /// Current order cut into batches; the last batch may be short.
    pub fn batches(&self) -> Vec<Vec<usize>> {
        self.indices
            .chunks(self.batch_size)
            .map(<[usize]>::to_vec)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Collation
// ---------------------------------------------------------------------------

/// Stacked tensors for one mini-batch.
pub struct Batch {
    /// `[B, T, 3, H, W]`
    pub video: Tensor,
    /// `[B, L]`
    pub clinical: Tensor,
    /// `[B]` class indices (u32)
    pub labels: Tensor,
    pub patient_ids: Vec<PatientId>,
}

/// Stack loaded examples into batch tensors on `device`.
pub fn collate(examples: &[TrainingExample], device: &Device) -> Result<Batch> {
    let first = examples
        .first()
        .ok_or_else(|| LungFusionError::Dataset("cannot collate an empty batch".to_string()))?;
    let b = examples.len();
    let t = first.clip.len();
    let (h, w) = (first.clip.height() as usize, first.clip.width() as usize);
    let l = first.clinical.len();

    let mut video = Vec::with_capacity(b * t * CLIP_CHANNELS * h * w);
    let mut clinical = Vec::with_capacity(b * l);
    let mut labels = Vec::with_capacity(b);
    let mut patient_ids = Vec::with_capacity(b);
    for example in examples {
        example.clip.extend_flat(&mut video);
        clinical.extend_from_slice(example.clinical.as_slice());
        labels.push(example.label.class_index());
        patient_ids.push(example.patient_id.clone());
    }

    let tensor_error =
        |e: candle_core::Error| LungFusionError::Model(format!("Failed to build batch: {e}"));
    Ok(Batch {
        video: Tensor::from_vec(video, (b, t, CLIP_CHANNELS, h, w), device).map_err(tensor_error)?,
        clinical: Tensor::from_vec(clinical, (b, l), device).map_err(tensor_error)?,
        labels: Tensor::from_vec(labels, b, device).map_err(tensor_error)?,
        patient_ids,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
