//! Late-fusion classifier over clip embedding + clinical vector.
//!
//! Concatenates the LSTM clip embedding (default 128-dim) with the clinical
//! feature vector (68-dim) and produces 2-class (negative/positive) logits.
//!
//! # Architecture
//!
//! ```text
//! Input (196) → Linear(64) → ReLU → Linear(2)
//! ```
//!
//! The declared input width is taken from configuration and checked against the
//! concatenated width on every forward pass.

use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;
use lungfusion_core::{LungFusionError, Result};

/// Two-layer fully-connected fusion head.
pub struct FusionClassifier {
    fc1: candle_nn::Linear,
    fc2: candle_nn::Linear,
    input_dim: usize,
}

impl FusionClassifier {
    /// Create a fusion head whose parameters are registered under `vb`.
    pub fn new(
        vb: VarBuilder,
        input_dim: usize,
        hidden_dim: usize,
        num_classes: usize,
    ) -> Result<Self> {
        let fc1 = candle_nn::linear(input_dim, hidden_dim, vb.pp("fc1"))
            .map_err(|e| LungFusionError::Model(format!("Failed to create fusion fc1: {e}")))?;
        let fc2 = candle_nn::linear(hidden_dim, num_classes, vb.pp("fc2"))
            .map_err(|e| LungFusionError::Model(format!("Failed to create fusion fc2: {e}")))?;

        Ok(Self {
            fc1,
            fc2,
            input_dim,
        })
    }

    /// Declared input width.
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Run a forward pass and return raw logits.
    ///
    /// # Arguments
    ///
    /// * `embedding` — clip embeddings of shape `[batch, hidden]`
    /// * `clinical` — clinical vectors of shape `[batch, CLINICAL_DIM]`
    ///
    /// # Returns
    ///
    /// Logits of shape `[batch, num_classes]`.
    pub fn forward_logits(&self, embedding: &Tensor, clinical: &Tensor) -> Result<Tensor> {
        let embed_dim = embedding
            .dim(1)
            .map_err(|e| LungFusionError::Model(format!("Invalid embedding shape: {e}")))?;
        let clinical_dim = clinical
            .dim(1)
            .map_err(|e| LungFusionError::Model(format!("Invalid clinical shape: {e}")))?;
        if embed_dim + clinical_dim != self.input_dim {
            return Err(LungFusionError::ConfigMismatch {
                declared: self.input_dim,
                actual: embed_dim + clinical_dim,
            });
        }

        // Concatenate: [batch, hidden + clinical]
        let input = Tensor::cat(&[embedding, clinical], 1).map_err(|e| {
            LungFusionError::Model(format!("Failed to concatenate fusion input: {e}"))
        })?;

        // Forward pass: fc1 → ReLU → fc2
        let h1 = self
            .fc1
            .forward(&input)
            .map_err(|e| LungFusionError::Model(format!("Fusion fc1 forward failed: {e}")))?;
        let h1 = h1
            .relu()
            .map_err(|e| LungFusionError::Model(format!("Fusion ReLU failed: {e}")))?;

        self.fc2
            .forward(&h1)
            .map_err(|e| LungFusionError::Model(format!("Fusion fc2 forward failed: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use lungfusion_core::CLINICAL_DIM;

    fn classifier(varmap: &VarMap, input_dim: usize) -> FusionClassifier {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        FusionClassifier::new(vb, input_dim, 64, 2).unwrap()
    }

    #[test]
    fn test_forward_logits_shape() {
        let varmap = VarMap::new();
        let head = classifier(&varmap, 128 + CLINICAL_DIM);

        let embedding = Tensor::zeros((3, 128), DType::F32, &Device::Cpu).unwrap();
        let clinical = Tensor::ones((3, CLINICAL_DIM), DType::F32, &Device::Cpu).unwrap();
        let logits = head.forward_logits(&embedding, &clinical).unwrap();
        assert_eq!(logits.dims(), &[3, 2]);
        assert_eq!(head.input_dim(), 196);
    }

    #[test]
    fn test_width_mismatch_is_config_error() {
        let varmap = VarMap::new();
        let head = classifier(&varmap, 196);

        let embedding = Tensor::zeros((1, 512), DType::F32, &Device::Cpu).unwrap();
        let clinical = Tensor::zeros((1, CLINICAL_DIM), DType::F32, &Device::Cpu).unwrap();
        match head.forward_logits(&embedding, &clinical) {
            Err(LungFusionError::ConfigMismatch { declared, actual }) => {
                assert_eq!(declared, 196);
                assert_eq!(actual, 512 + CLINICAL_DIM);
            }
            Err(e) => panic!("expected ConfigMismatch, got {e}"),
            Ok(_) => panic!("expected ConfigMismatch, got logits"),
        }
    }

    #[test]
    fn test_parameters_registered() {
        let varmap = VarMap::new();
        let _head = classifier(&varmap, 196);
        assert_eq!(varmap.all_vars().len(), 4);
    }
}
