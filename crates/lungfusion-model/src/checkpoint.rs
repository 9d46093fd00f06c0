//! Best-so-far checkpoint slot.
//!
//! A checkpoint is a single safetensors file holding every trainable parameter
//! plus string metadata describing the validation result that triggered the
//! write. Writes go through a sibling temp file and an atomic rename.

use std::collections::HashMap;
use std::path::Path;

use candle_core::DType;
use candle_nn::VarMap;
use lungfusion_core::{write_atomic, LungFusionError, Result};

const META_FORMAT: &str = "format";
const META_VAL_ACCURACY: &str = "val_accuracy";
const META_EPOCH: &str = "epoch";
const META_SAVED_AT: &str = "saved_at";
const FORMAT_TAG: &str = "lungfusion-v1";

/// Metadata stored alongside checkpointed parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointMeta {
    /// Validation accuracy of the epoch that produced this checkpoint.
    pub val_accuracy: f64,
    /// 1-based epoch number.
    pub epoch: usize,
    /// RFC 3339 timestamp of the write.
    pub saved_at: String,
}

impl CheckpointMeta {
    /// Metadata for a checkpoint written now.
    pub fn now(val_accuracy: f64, epoch: usize) -> Self {
        Self {
            val_accuracy,
            epoch,
            saved_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn to_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            (META_FORMAT.to_string(), FORMAT_TAG.to_string()),
            (META_VAL_ACCURACY.to_string(), self.val_accuracy.to_string()),
            (META_EPOCH.to_string(), self.epoch.to_string()),
            (META_SAVED_AT.to_string(), self.saved_at.clone()),
        ])
    }

    fn from_metadata(metadata: &HashMap<String, String>) -> Result<Self> {
        let field = |key: &str| {
            metadata.get(key).ok_or_else(|| {
                LungFusionError::Checkpoint(format!("checkpoint metadata missing '{key}'"))
            })
        };
        if field(META_FORMAT)? != FORMAT_TAG {
            return Err(LungFusionError::Checkpoint(format!(
                "unsupported checkpoint format '{}'",
                field(META_FORMAT)?
            )));
        }
        let val_accuracy = field(META_VAL_ACCURACY)?
            .parse::<f64>()
            .map_err(|e| LungFusionError::Checkpoint(format!("bad val_accuracy: {e}")))?;
        let epoch = field(META_EPOCH)?
            .parse::<usize>()
            .map_err(|e| LungFusionError::Checkpoint(format!("bad epoch: {e}")))?;
        Ok(Self {
            val_accuracy,
            epoch,
            saved_at: field(META_SAVED_AT)?.clone(),
        })
    }
}

/// Serialize every variable in `varmap` to `path`, replacing any previous file.
pub fn save_checkpoint(varmap: &VarMap, path: &Path, meta: &CheckpointMeta) -> Result<()> {
    let mut buffers: Vec<(String, Vec<usize>, Vec<u8>)> = Vec::new();
    {
        let vars = varmap
            .data()
            .lock()
            .map_err(|e| LungFusionError::Checkpoint(format!("varmap lock poisoned: {e}")))?;
        for (name, var) in vars.iter() {
            let tensor = var.as_tensor();
            let values: Vec<f32> = tensor
                .to_dtype(DType::F32)
                .and_then(|t| t.flatten_all())
                .and_then(|t| t.to_vec1())
                .map_err(|e| LungFusionError::Checkpoint(format!("Failed to read {name}: {e}")))?;
            let bytes: Vec<u8> = values.iter().flat_map(|f| f.to_le_bytes()).collect();
            buffers.push((name.clone(), tensor.dims().to_vec(), bytes));
        }
    }

    let mut views = HashMap::new();
    for (name, shape, bytes) in &buffers {
        let view = safetensors::tensor::TensorView::new(safetensors::Dtype::F32, shape.clone(), bytes)
            .map_err(|e| LungFusionError::Checkpoint(format!("TensorView for {name}: {e}")))?;
        views.insert(name.clone(), view);
    }
    let serialized = safetensors::tensor::serialize(&views, &Some(meta.to_metadata()))
        .map_err(|e| LungFusionError::Checkpoint(format!("serialize: {e}")))?;

    write_atomic(path, &serialized)?;
    tracing::debug!(
        path = %path.display(),
        tensors = buffers.len(),
        val_accuracy = meta.val_accuracy,
        "Checkpoint written"
    );
    Ok(())
}

/// Read only the metadata of a checkpoint.
pub fn read_checkpoint_meta(path: &Path) -> Result<CheckpointMeta> {
    let data = std::fs::read(path).map_err(|e| {
        LungFusionError::Checkpoint(format!("Failed to read {}: {e}", path.display()))
    })?;
    let (_, metadata) = safetensors::SafeTensors::read_metadata(&data).map_err(|e| {
        LungFusionError::Checkpoint(format!("Failed to parse header of {}: {e}", path.display()))
    })?;
    match metadata.metadata() {
        Some(map) => CheckpointMeta::from_metadata(map),
        None => Err(LungFusionError::Checkpoint(format!(
            "{} carries no checkpoint metadata",
            path.display()
        ))),
    }
}

/// Restore every variable of an already-constructed `varmap` from `path`.
pub fn load_checkpoint(varmap: &mut VarMap, path: &Path) -> Result<CheckpointMeta> {
    let meta = read_checkpoint_meta(path)?;
    varmap.load(path).map_err(|e| {
        LungFusionError::Checkpoint(format!("Failed to load {}: {e}", path.display()))
    })?;
    Ok(meta)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
