//! Per-frame visual feature extractors.
//!
//! A [`FrameEncoder`] maps a batch of independent frames `[N, 3, H, W]` to one
//! fixed-width embedding per frame `[N, D]`. Frames are processed without any
//! notion of order; temporal structure is restored by the caller.
//!
//! Two implementations are provided:
//!
//! - [`ResNetFrameEncoder`] — ResNet-18 with its classification head removed
//!   (512-dim), loaded from a safetensors file and kept frozen. Weight names
//!   follow the torchvision layout (`conv1`, `bn1`, `layer1.0.conv1`, ...).
//! - [`ConvStemEncoder`] — two strided convolutions, global average pooling,
//!   and a linear projection. Its parameters live in the model's trainable
//!   [`candle_nn::VarMap`] and are checkpointed with it.

use std::path::Path;

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{Conv2dConfig, VarBuilder};
use lungfusion_core::{FrameEncoderConfig, LungFusionError, Result};

/// Output width of ResNet-18 without its final fully-connected layer.
pub const RESNET18_EMBEDDING_DIM: usize = 512;

/// Channels expected on every input frame.
pub const FRAME_CHANNELS: usize = 3;

/// Pluggable frame feature extractor.
pub trait FrameEncoder {
    /// Width `D` of each frame embedding.
    fn embedding_dim(&self) -> usize;

    /// Encode `[N, 3, H, W]` frames into `[N, D]` embeddings.
    fn encode(&self, frames: &Tensor) -> candle_core::Result<Tensor>;
}

/// Frozen pretrained ResNet-18 backbone.
pub struct ResNetFrameEncoder {
    backbone: candle_nn::Func<'static>,
}

impl ResNetFrameEncoder {
    /// Load backbone weights from a safetensors file.
    ///
    /// The weights are memory-mapped into their own [`VarBuilder`], so they are
    /// never part of the trainable parameter set.
    pub fn load(weights: &Path, device: &Device) -> Result<Self> {
        if !weights.exists() {
            return Err(LungFusionError::Model(format!(
                "ResNet-18 weights not found at {}",
                weights.display()
            )));
        }
        // SAFETY: the weights file must not change while it is mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights.to_path_buf()], DType::F32, device)
                .map_err(|e| {
                    LungFusionError::Model(format!("Failed to map ResNet-18 weights: {e}"))
                })?
        };
        let backbone = candle_transformers::models::resnet::resnet18_no_final_layer(vb)
            .map_err(|e| LungFusionError::Model(format!("Failed to build ResNet-18: {e}")))?;
        tracing::info!(path = %weights.display(), "Loaded frozen ResNet-18 frame encoder");
        Ok(Self { backbone })
    }
}

impl FrameEncoder for ResNetFrameEncoder {
    fn embedding_dim(&self) -> usize {
        RESNET18_EMBEDDING_DIM
    }

    fn encode(&self, frames: &Tensor) -> candle_core::Result<Tensor> {
        self.backbone.forward(frames)?.detach().flatten_from(1)
    }
}

/// Lightweight trainable convolutional frame encoder.
pub struct ConvStemEncoder {
    conv1: candle_nn::Conv2d,
    conv2: candle_nn::Conv2d,
    proj: candle_nn::Linear,
    embedding_dim: usize,
}

const STEM_CHANNELS_1: usize = 16;
const STEM_CHANNELS_2: usize = 32;

impl ConvStemEncoder {
    pub fn new(embedding_dim: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let strided = Conv2dConfig {
            padding: 1,
            stride: 2,
            ..Default::default()
        };
        let conv1 = candle_nn::conv2d(FRAME_CHANNELS, STEM_CHANNELS_1, 3, strided, vb.pp("conv1"))?;
        let conv2 = candle_nn::conv2d(STEM_CHANNELS_1, STEM_CHANNELS_2, 3, strided, vb.pp("conv2"))?;
        let proj = candle_nn::linear(STEM_CHANNELS_2, embedding_dim, vb.pp("proj"))?;
        Ok(Self {
            conv1,
            conv2,
            proj,
            embedding_dim,
        })
    }
}

impl FrameEncoder for ConvStemEncoder {
    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    fn encode(&self, frames: &Tensor) -> candle_core::Result<Tensor> {
        // Global average pool over H then W: [N, C, H, W] -> [N, C]
        let pooled = frames
            .apply(&self.conv1)?
            .relu()?
            .apply(&self.conv2)?
            .relu()?
            .mean(D::Minus1)?
            .mean(D::Minus1)?;
        pooled.apply(&self.proj)
    }
}

/// Build the configured frame encoder.
///
/// `vb` is the trainable builder; only encoders with trainable parameters use it.
pub fn build_frame_encoder(
    config: &FrameEncoderConfig,
    vb: VarBuilder,
    device: &Device,
) -> Result<Box<dyn FrameEncoder>> {
    match config {
        FrameEncoderConfig::Resnet18 { weights } => {
            Ok(Box::new(ResNetFrameEncoder::load(weights, device)?))
        }
        FrameEncoderConfig::ConvStem { embedding_dim } => {
            let encoder = ConvStemEncoder::new(*embedding_dim, vb).map_err(|e| {
                LungFusionError::Model(format!("Failed to create conv stem encoder: {e}"))
            })?;
            Ok(Box::new(encoder))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    #[test]
    fn test_conv_stem_output_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = ConvStemEncoder::new(24, vb).unwrap();

        let frames = Tensor::zeros((5, 3, 16, 16), DType::F32, &device).unwrap();
        let out = encoder.encode(&frames).unwrap();
        assert_eq!(out.dims(), &[5, 24]);
        assert_eq!(encoder.embedding_dim(), 24);
    }

    #[test]
    fn test_conv_stem_registers_trainable_vars() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let _encoder = ConvStemEncoder::new(8, vb.pp("frame_encoder")).unwrap();
        // conv1 w+b, conv2 w+b, proj w+b
        assert_eq!(varmap.all_vars().len(), 6);
    }

    #[test]
    fn test_resnet_missing_weights_fails() {
        let result = ResNetFrameEncoder::load(Path::new("/nonexistent/resnet18.safetensors"), &Device::Cpu);
        assert!(result.is_err());
    }

    #[test]
    fn test_build_frame_encoder_conv_stem() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder =
            build_frame_encoder(&FrameEncoderConfig::ConvStem { embedding_dim: 12 }, vb, &device)
                .unwrap();
        assert_eq!(encoder.embedding_dim(), 12);
    }
}
