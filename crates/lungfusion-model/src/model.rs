//! The complete clip + clinical classifier.

use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use lungfusion_core::{LungFusionError, ModelConfig, Result, NUM_CLASSES};

use crate::checkpoint::{self, CheckpointMeta};
use crate::frame_encoder::build_frame_encoder;
use crate::fusion_classifier::FusionClassifier;
use crate::temporal::VisualTemporalEncoder;

/// Visual-temporal encoder followed by the fusion head.
///
/// Trainable parameters are owned by an internal [`VarMap`]; a frozen frame
/// encoder keeps its weights outside of it.
pub struct LungFusionModel {
    varmap: VarMap,
    encoder: VisualTemporalEncoder,
    fusion: FusionClassifier,
    device: Device,
}

impl LungFusionModel {
    /// Build a freshly initialised model.
    ///
    /// # Errors
    ///
    /// Returns [`LungFusionError::ConfigMismatch`] before allocating any
    /// parameters when the declared fusion width does not equal
    /// `rnn_hidden_dim + CLINICAL_DIM`.
    pub fn new(config: &ModelConfig, device: &Device) -> Result<Self> {
        config.validate()?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let frame_encoder =
            build_frame_encoder(&config.frame_encoder, vb.pp("frame_encoder"), device)?;
        let encoder = VisualTemporalEncoder::new(frame_encoder, config.rnn_hidden_dim, vb.pp("rnn"))
            .map_err(|e| LungFusionError::Model(format!("Failed to create LSTM: {e}")))?;
        let fusion = FusionClassifier::new(
            vb.pp("fusion"),
            config.fusion_input_dim,
            config.fusion_hidden_dim,
            NUM_CLASSES,
        )?;

        tracing::debug!(
            rnn_hidden_dim = config.rnn_hidden_dim,
            fusion_input_dim = config.fusion_input_dim,
            trainable_tensors = varmap.all_vars().len(),
            "Model constructed"
        );

        Ok(Self {
            varmap,
            encoder,
            fusion,
            device: device.clone(),
        })
    }

    /// Build a model and restore its trainable parameters from a checkpoint.
    pub fn from_checkpoint(
        config: &ModelConfig,
        path: &Path,
        device: &Device,
    ) -> Result<(Self, CheckpointMeta)> {
        let mut model = Self::new(config, device)?;
        let meta = checkpoint::load_checkpoint(&mut model.varmap, path)?;
        Ok((model, meta))
    }

    /// Compute logits `[B, 2]` for clips `[B, T, 3, H, W]` and clinical vectors `[B, L]`.
    pub fn forward(&self, video: &Tensor, clinical: &Tensor) -> Result<Tensor> {
        let embedding = self
            .encoder
            .forward(video)
            .map_err(|e| LungFusionError::Model(format!("Visual-temporal encoder failed: {e}")))?;
        self.fusion.forward_logits(&embedding, clinical)
    }

    /// Trainable variables, for the optimizer.
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Write the trainable parameters to the checkpoint slot at `path`.
    pub fn save_checkpoint(&self, path: &Path, meta: &CheckpointMeta) -> Result<()> {
        checkpoint::save_checkpoint(&self.varmap, path, meta)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use lungfusion_core::{FrameEncoderConfig, CLINICAL_DIM};

    fn small_config() -> ModelConfig {
        ModelConfig {
            frame_encoder: FrameEncoderConfig::ConvStem { embedding_dim: 8 },
            rnn_hidden_dim: 4,
            fusion_input_dim: 4 + CLINICAL_DIM,
            fusion_hidden_dim: 6,
        }
    }

    #[test]
    fn test_forward_shape() {
        let device = Device::Cpu;
        let model = LungFusionModel::new(&small_config(), &device).unwrap();

        let video = Tensor::randn(0f32, 1.0, (2, 3, 3, 16, 16), &device).unwrap();
        let clinical = Tensor::zeros((2, CLINICAL_DIM), DType::F32, &device).unwrap();
        let logits = model.forward(&video, &clinical).unwrap();
        assert_eq!(logits.dims(), &[2, NUM_CLASSES]);
    }

    #[test]
    fn test_mismatched_width_fails_at_construction() {
        let config = ModelConfig {
            fusion_input_dim: 196,
            ..small_config()
        };
        let result = LungFusionModel::new(&config, &Device::Cpu);
        assert!(matches!(
            result,
            Err(LungFusionError::ConfigMismatch {
                declared: 196,
                actual
            }) if actual == 4 + CLINICAL_DIM
        ));
    }

    #[test]
    fn test_checkpoint_restores_identical_logits() {
        let device = Device::Cpu;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best.safetensors");

        let model = LungFusionModel::new(&small_config(), &device).unwrap();
        model
            .save_checkpoint(&path, &CheckpointMeta::now(0.6, 2))
            .unwrap();

        let (restored, meta) =
            LungFusionModel::from_checkpoint(&small_config(), &path, &device).unwrap();
        assert_eq!(meta.epoch, 2);

        let video = Tensor::randn(0f32, 1.0, (1, 3, 3, 16, 16), &device).unwrap();
        let clinical = Tensor::ones((1, CLINICAL_DIM), DType::F32, &device).unwrap();
        let a: Vec<f32> = model.forward(&video, &clinical).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let b: Vec<f32> = restored.forward(&video, &clinical).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_trainable_vars_include_stem_rnn_and_fusion() {
        let model = LungFusionModel::new(&small_config(), &Device::Cpu).unwrap();
        // stem: 6, lstm: 4, fusion: 4
        assert_eq!(model.trainable_vars().len(), 14);
    }
}
