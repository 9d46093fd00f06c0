//! Core types, configuration, and errors for LungFusion
//!
//! This crate contains the foundational types shared by the model and training
//! crates: patient and scan identity, the binary COVID-19 outcome, per-patient
//! prediction records, the pipeline configuration tree, the clinical record
//! schema with its vectorizer, and the error taxonomy.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod clinical;

pub use clinical::{ClinicalRecord, ClinicalVector, CLINICAL_DIM};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identifier of a patient, as encoded in the storage layout (`patient_<id>`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(pub String);

impl PatientId {
    /// Create a patient ID from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PatientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which lung side an ultrasound clip was recorded on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanSide {
    Left,
    Right,
    /// The filename carried no recognisable side tag.
    Unspecified,
}

impl ScanSide {
    /// Parse the trailing side tag of a video file stem (`L` / `R`).
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "L" | "l" => Self::Left,
            "R" | "r" => Self::Right,
            _ => Self::Unspecified,
        }
    }
}

impl std::fmt::Display for ScanSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => write!(f, "L"),
            Self::Right => write!(f, "R"),
            Self::Unspecified => write!(f, "?"),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Number of output classes (negative, positive).
pub const NUM_CLASSES: usize = 2;

/// Binary COVID-19 outcome. Class index 0 = negative, 1 = positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CovidStatus {
    Negative,
    Positive,
}

impl CovidStatus {
    /// Map a predicted class index to a status. Any index other than 1 is negative.
    pub fn from_class_index(index: usize) -> Self {
        if index == 1 {
            Self::Positive
        } else {
            Self::Negative
        }
    }

    /// Class index used for training targets.
    pub fn class_index(self) -> u32 {
        match self {
            Self::Negative => 0,
            Self::Positive => 1,
        }
    }

    /// Human-readable label written to evaluation reports.
    pub fn label(self) -> &'static str {
        match self {
            Self::Negative => "Negative",
            Self::Positive => "Positive",
        }
    }
}

impl std::fmt::Display for CovidStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Patient-level prediction produced by evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Patient the prediction belongs to.
    pub patient_id: PatientId,
    /// Component-wise mean of the raw per-clip logits.
    pub mean_logits: Vec<f32>,
    /// Arg-max class of `mean_logits`.
    pub status: CovidStatus,
    /// Number of clips that contributed to the average.
    pub clip_count: usize,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Top-level pipeline configuration, typically loaded from YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Check every section for values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`LungFusionError::Config`] for out-of-range values and
    /// [`LungFusionError::ConfigMismatch`] when the declared fusion width does
    /// not match the encoder + clinical widths.
    pub fn validate(&self) -> Result<()> {
        self.data.validate()?;
        self.model.validate()?;
        self.training.validate()?;
        if self.evaluation.batch_size == 0 {
            return Err(LungFusionError::Config(
                "evaluation.batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// What to do with a clip whose patient has no classification artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MissingLabelPolicy {
    /// Keep the clip and assign a fixed placeholder class.
    Default { class: CovidStatus },
    /// Drop every clip of the unlabeled patient at scan time.
    Exclude,
}

impl Default for MissingLabelPolicy {
    fn default() -> Self {
        Self::Default {
            class: CovidStatus::Negative,
        }
    }
}

/// Dataset discovery and clip sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root directory containing `patient_<id>/patient_<id>_record/` folders.
    #[serde(default = "default_train_root")]
    pub root: PathBuf,
    /// Frames sampled per clip (T).
    #[serde(default = "default_frame_count")]
    pub frame_count: usize,
    /// Frame height after resizing (H).
    #[serde(default = "default_frame_side")]
    pub frame_height: u32,
    /// Frame width after resizing (W).
    #[serde(default = "default_frame_side")]
    pub frame_width: u32,
    /// Replicate luminance into all three channels instead of keeping RGB.
    #[serde(default = "default_true")]
    pub grayscale: bool,
    /// Video file extension, without the dot.
    #[serde(default = "default_video_extension")]
    pub video_extension: String,
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: String,
    #[serde(default)]
    pub missing_label: MissingLabelPolicy,
    /// Log and drop samples that fail to load instead of aborting the run.
    #[serde(default = "default_true")]
    pub skip_failed_samples: bool,
    /// Threads assembling batches ahead of the main loop.
    #[serde(default = "default_prefetch_workers")]
    pub prefetch_workers: usize,
    /// Maximum number of ready batches waiting for the main loop.
    #[serde(default = "default_prefetch_queue")]
    pub prefetch_queue: usize,
}

fn default_train_root() -> PathBuf {
    PathBuf::from("data/Set-4")
}

fn default_frame_count() -> usize {
    16
}

fn default_frame_side() -> u32 {
    112
}

fn default_true() -> bool {
    true
}

fn default_video_extension() -> String {
    "mp4".to_string()
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_bin() -> String {
    "ffprobe".to_string()
}

fn default_prefetch_workers() -> usize {
    4
}

fn default_prefetch_queue() -> usize {
    4
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root: default_train_root(),
            frame_count: default_frame_count(),
            frame_height: default_frame_side(),
            frame_width: default_frame_side(),
            grayscale: true,
            video_extension: default_video_extension(),
            ffmpeg_bin: default_ffmpeg_bin(),
            ffprobe_bin: default_ffprobe_bin(),
            missing_label: MissingLabelPolicy::default(),
            skip_failed_samples: true,
            prefetch_workers: default_prefetch_workers(),
            prefetch_queue: default_prefetch_queue(),
        }
    }
}

impl DataConfig {
    fn validate(&self) -> Result<()> {
        if self.frame_count == 0 {
            return Err(LungFusionError::Config(
                "data.frame_count must be at least 1".to_string(),
            ));
        }
        if self.frame_height == 0 || self.frame_width == 0 {
            return Err(LungFusionError::Config(format!(
                "data frame size must be non-zero, got {}x{}",
                self.frame_height, self.frame_width
            )));
        }
        if self.prefetch_workers == 0 || self.prefetch_queue == 0 {
            return Err(LungFusionError::Config(
                "data.prefetch_workers and data.prefetch_queue must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-frame visual feature extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameEncoderConfig {
    /// Frozen pretrained ResNet-18 without its classification head (512-dim).
    Resnet18 { weights: PathBuf },
    /// Small trainable convolutional stem, checkpointed with the model.
    ConvStem { embedding_dim: usize },
}

impl Default for FrameEncoderConfig {
    fn default() -> Self {
        Self::Resnet18 {
            weights: PathBuf::from("models/resnet18.safetensors"),
        }
    }
}

/// Model architecture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub frame_encoder: FrameEncoderConfig,
    /// LSTM hidden size; also the clip embedding width.
    #[serde(default = "default_rnn_hidden_dim")]
    pub rnn_hidden_dim: usize,
    /// Declared input width of the fusion classifier.
    #[serde(default = "default_fusion_input_dim")]
    pub fusion_input_dim: usize,
    #[serde(default = "default_fusion_hidden_dim")]
    pub fusion_hidden_dim: usize,
}

fn default_rnn_hidden_dim() -> usize {
    128
}

fn default_fusion_input_dim() -> usize {
    196
}

fn default_fusion_hidden_dim() -> usize {
    64
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            frame_encoder: FrameEncoderConfig::default(),
            rnn_hidden_dim: default_rnn_hidden_dim(),
            fusion_input_dim: default_fusion_input_dim(),
            fusion_hidden_dim: default_fusion_hidden_dim(),
        }
    }
}

impl ModelConfig {
    /// Width the fusion classifier actually receives: clip embedding + clinical vector.
    pub fn concatenated_dim(&self) -> usize {
        self.rnn_hidden_dim + CLINICAL_DIM
    }

    /// Fail fast when the declared fusion width cannot accept the concatenated input.
    pub fn validate(&self) -> Result<()> {
        if self.rnn_hidden_dim == 0 || self.fusion_hidden_dim == 0 {
            return Err(LungFusionError::Config(
                "model hidden dimensions must be non-zero".to_string(),
            ));
        }
        if let FrameEncoderConfig::ConvStem { embedding_dim: 0 } = self.frame_encoder {
            return Err(LungFusionError::Config(
                "conv_stem embedding_dim must be non-zero".to_string(),
            ));
        }
        let actual = self.concatenated_dim();
        if self.fusion_input_dim != actual {
            return Err(LungFusionError::ConfigMismatch {
                declared: self.fusion_input_dim,
                actual,
            });
        }
        Ok(())
    }
}

/// How the train/validation partition is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Split individual clips; clips of one patient may land on both sides.
    #[default]
    Clip,
    /// Assign whole patients to one side.
    Patient,
}

/// Training loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_lr")]
    pub lr: f64,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default = "default_val_ratio")]
    pub val_ratio: f64,
    #[serde(default)]
    pub split: SplitStrategy,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Single best-so-far checkpoint slot.
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,
    /// Draw progress bars on stderr.
    #[serde(default = "default_true")]
    pub progress: bool,
}

fn default_epochs() -> usize {
    5
}

fn default_batch_size() -> usize {
    8
}

fn default_lr() -> f64 {
    1e-4
}

fn default_val_ratio() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("trained-models/covid-model.safetensors")
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            lr: default_lr(),
            weight_decay: 0.0,
            val_ratio: default_val_ratio(),
            split: SplitStrategy::default(),
            seed: default_seed(),
            checkpoint_path: default_checkpoint_path(),
            progress: true,
        }
    }
}

impl TrainingConfig {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(LungFusionError::Config(
                "training.batch_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.val_ratio) {
            return Err(LungFusionError::Config(format!(
                "training.val_ratio must be in [0, 1), got {}",
                self.val_ratio
            )));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(LungFusionError::Config(format!(
                "training.lr must be a positive number, got {}",
                self.lr
            )));
        }
        Ok(())
    }
}

/// Evaluation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Root of the held-out dataset (same layout as training).
    #[serde(default = "default_eval_root")]
    pub root: PathBuf,
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// CSV report with header `patient_id,covid_status`.
    #[serde(default = "default_report_path")]
    pub report_path: PathBuf,
}

fn default_eval_root() -> PathBuf {
    PathBuf::from("test-data/set-4-test")
}

fn default_report_path() -> PathBuf {
    PathBuf::from("test-result/predictions.csv")
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            root: default_eval_root(),
            checkpoint_path: default_checkpoint_path(),
            batch_size: default_batch_size(),
            report_path: default_report_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: `text` (human-readable) or `json` (structured).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Core error types.
#[derive(thiserror::Error, Debug)]
pub enum LungFusionError {
    /// Video unreadable, or no frame could be decoded.
    #[error("Decode error for {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    /// Dataset discovery or sample assembly failed.
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Classification artifact exists but could not be read.
    #[error("Label error for {path}: {reason}")]
    Label { path: PathBuf, reason: String },

    /// Fusion input width does not match the concatenated feature width.
    #[error("Fusion input width mismatch: declared {declared}, embedding + clinical = {actual}")]
    ConfigMismatch { declared: usize, actual: usize },

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Model construction or forward pass failed.
    #[error("Model error: {0}")]
    Model(String),

    /// Checkpoint could not be written or restored.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Evaluation report could not be written.
    #[error("Report error: {0}")]
    Report(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization / deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias for `std::result::Result<T, LungFusionError>`.
pub type Result<T> = std::result::Result<T, LungFusionError>;

// ---------------------------------------------------------------------------
// Filesystem helpers
// ---------------------------------------------------------------------------

/// Replace `path` with `contents` via a sibling temp file and a rename, so a
/// crash mid-write never leaves a truncated artifact behind.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
