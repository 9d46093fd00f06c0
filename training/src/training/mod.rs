//! Clip-level training pipeline.
//!
//! Splits the dataset into train and validation clips, streams batches from a
//! prefetch pool, optimises the full model with AdamW and cross-entropy, and
//! keeps the checkpoint with the best validation accuracy.

pub mod data;
pub mod metrics;
pub mod prefetch;
pub mod trainer;

pub use metrics::{ConfusionMatrix, ValidationMetrics};
pub use trainer::{train, BestAccuracyTracker, EpochMetrics};
