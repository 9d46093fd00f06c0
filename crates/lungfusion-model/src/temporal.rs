//! Visual-temporal clip encoder.
//!
//! ```text
//! [B, T, C, H, W] → reshape [B·T, C, H, W] → FrameEncoder → [B·T, D]
//!                 → reshape [B, T, D] → LSTM (temporal order) → h_T [B, hidden]
//! ```
//!
//! Frame encoding is order-independent; the LSTM is not. Its final hidden state
//! is the clip embedding, so tail-padded duplicate frames weigh the summary
//! toward the last decoded frame.

use candle_core::Tensor;
use candle_nn::{LSTMConfig, VarBuilder, LSTM, RNN};

use crate::frame_encoder::FrameEncoder;

/// Frame encoder + single-layer LSTM over the frame sequence.
pub struct VisualTemporalEncoder {
    frame_encoder: Box<dyn FrameEncoder>,
    lstm: LSTM,
    hidden_dim: usize,
}

impl VisualTemporalEncoder {
    /// Create the encoder; LSTM parameters are registered under `vb`.
    pub fn new(
        frame_encoder: Box<dyn FrameEncoder>,
        hidden_dim: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let lstm = candle_nn::lstm(
            frame_encoder.embedding_dim(),
            hidden_dim,
            LSTMConfig::default(),
            vb,
        )?;
        Ok(Self {
            frame_encoder,
            lstm,
            hidden_dim,
        })
    }

    /// Width of the clip embedding.
    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Encode `[B, T, C, H, W]` clips into `[B, hidden]` embeddings.
    pub fn forward(&self, video: &Tensor) -> candle_core::Result<Tensor> {
        let (batch, frames, channels, height, width) = video.dims5()?;
        if frames == 0 {
            candle_core::bail!("clip has no frames");
        }

        let flat = video.reshape((batch * frames, channels, height, width))?;
        let features = self.frame_encoder.encode(&flat)?;
        let dim = features.dim(1)?;
        let sequence = features.reshape((batch, frames, dim))?;

        let states = self.lstm.seq(&sequence)?;
        match states.last() {
            Some(state) => Ok(state.h().clone()),
            None => candle_core::bail!("LSTM produced no states"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_encoder::ConvStemEncoder;
    use candle_core::{DType, Device, IndexOp};
    use candle_nn::VarMap;

    fn encoder(varmap: &VarMap, device: &Device) -> VisualTemporalEncoder {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        let frames = ConvStemEncoder::new(8, vb.pp("frame_encoder")).unwrap();
        VisualTemporalEncoder::new(Box::new(frames), 6, vb.pp("rnn")).unwrap()
    }

    #[test]
    fn test_output_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let enc = encoder(&varmap, &device);

        let video = Tensor::randn(0f32, 1.0, (2, 4, 3, 16, 16), &device).unwrap();
        let out = enc.forward(&video).unwrap();
        assert_eq!(out.dims(), &[2, 6]);
        assert_eq!(enc.hidden_dim(), 6);
    }

    #[test]
    fn test_frame_order_matters() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let enc = encoder(&varmap, &device);

        let a = Tensor::randn(0f32, 1.0, (1, 1, 3, 16, 16), &device).unwrap();
        let b = Tensor::randn(0f32, 1.0, (1, 1, 3, 16, 16), &device).unwrap();
        let forward = Tensor::cat(&[&a, &b], 1).unwrap();
        let reversed = Tensor::cat(&[&b, &a], 1).unwrap();

        let h1: Vec<f32> = enc.forward(&forward).unwrap().i(0).unwrap().to_vec1().unwrap();
        let h2: Vec<f32> = enc.forward(&reversed).unwrap().i(0).unwrap().to_vec1().unwrap();
        let diff: f32 = h1.iter().zip(&h2).map(|(x, y)| (x - y).abs()).sum();
        assert!(diff > 1e-6, "reordering frames should change the clip embedding");
    }

    #[test]
    fn test_rejects_non_5d_input() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let enc = encoder(&varmap, &device);
        let video = Tensor::zeros((4, 3, 16, 16), DType::F32, &device).unwrap();
        assert!(enc.forward(&video).is_err());
    }
}
