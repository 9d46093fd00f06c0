//! Neural components for LungFusion
//!
//! Builds the two-stage classifier used for patient outcome prediction:
//!
//! ```text
//! clip [B, T, 3, H, W] ──► VisualTemporalEncoder ──► [B, hidden] ─┐
//!                                                                 ├─► FusionClassifier ──► logits [B, 2]
//! clinical [B, L] ────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`frame_encoder`] — pluggable per-frame feature extractors (frozen ResNet-18, conv stem)
//! - [`temporal`] — frame encoder + LSTM clip encoder
//! - [`fusion_classifier`] — late-fusion MLP head
//! - [`model`] — the assembled model and its trainable parameter set
//! - [`checkpoint`] — single-slot safetensors checkpoint with metadata
//! - [`device`] — compute device selection

pub mod checkpoint;
pub mod device;
pub mod frame_encoder;
pub mod fusion_classifier;
pub mod model;
pub mod temporal;

pub use checkpoint::{read_checkpoint_meta, CheckpointMeta};
pub use device::select_device;
pub use frame_encoder::{ConvStemEncoder, FrameEncoder, ResNetFrameEncoder};
pub use fusion_classifier::FusionClassifier;
pub use model::LungFusionModel;
pub use temporal::VisualTemporalEncoder;
