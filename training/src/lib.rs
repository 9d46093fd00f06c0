//! LungFusion data pipeline, training, and evaluation.
//!
//! - [`video`] — decoding and fixed-length frame sampling
//! - [`dataset`] — dataset discovery, labels, and sample assembly
//! - [`training`] — splitting, prefetching, the training loop, and metrics
//! - [`evaluation`] — patient-level aggregation and the CSV report
//! - [`config`] — YAML configuration loading

pub mod config;
pub mod dataset;
pub mod evaluation;
pub mod training;
pub mod video;

pub use dataset::{DatasetIndex, DatasetSummary, TrainingExample};
pub use evaluation::{evaluate, EvaluationSummary};
pub use training::{train, EpochMetrics};
