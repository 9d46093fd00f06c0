//! Configuration loading.
//!
//! Resolution order: an explicit `--config` path, then `LUNGFUSION_CONFIG`,
//! then built-in defaults. The loaded file is validated before use.

use std::path::{Path, PathBuf};

use lungfusion_core::PipelineConfig;

/// Environment variable naming a YAML config file.
pub const CONFIG_ENV: &str = "LUNGFUSION_CONFIG";

/// Load pipeline configuration from a YAML file. Omitted fields take their
/// defaults.
pub fn load_config(path: &Path) -> anyhow::Result<PipelineConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let config: PipelineConfig = serde_yaml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", path.display(), e))?;
    Ok(config)
}

/// Resolve the config source and load it.
pub fn resolve_config(explicit: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    match explicit.map(Path::to_path_buf).or(from_env) {
        Some(path) => load_config(&path),
        None => Ok(PipelineConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lungfusion_core::{FrameEncoderConfig, MissingLabelPolicy, SplitStrategy};
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper to write YAML to a temp file and return the path.
    fn write_yaml(yaml: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_load_config_full() {
        let yaml = r#"
data:
  root: "data/Set-4"
  frame_count: 8
  frame_height: 64
  frame_width: 64
  missing_label:
    mode: exclude
  prefetch_workers: 2
model:
  frame_encoder:
    kind: conv_stem
    embedding_dim: 32
  rnn_hidden_dim: 16
  fusion_input_dim: 84
  fusion_hidden_dim: 8
training:
  epochs: 3
  batch_size: 4
  lr: 0.001
  split: patient
  checkpoint_path: "out/best.safetensors"
evaluation:
  root: "test-data"
  report_path: "out/predictions.csv"
logging:
  level: debug
  format: json
"#;
        let f = write_yaml(yaml);
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.data.frame_count, 8);
        assert_eq!(config.data.missing_label, MissingLabelPolicy::Exclude);
        assert_eq!(
            config.model.frame_encoder,
            FrameEncoderConfig::ConvStem { embedding_dim: 32 }
        );
        assert_eq!(config.training.split, SplitStrategy::Patient);
        assert_eq!(config.training.epochs, 3);
        assert_eq!(config.evaluation.batch_size, 8);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_load_config_empty_mapping_uses_defaults() {
        let f = write_yaml("{}\n");
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.data.frame_count, 16);
        assert_eq!(config.model.fusion_input_dim, 196);
        assert_eq!(config.training.epochs, 5);
    }

    #[test]
    fn test_load_config_rejects_width_mismatch() {
        let yaml = r#"
model:
  rnn_hidden_dim: 64
  fusion_input_dim: 196
"#;
        let f = write_yaml(yaml);
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("mismatch"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config(Path::new("/nonexistent/config.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_yaml() {
        let f = write_yaml("not: [valid: yaml: {{{}}}");
        let result = load_config(f.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_config_prefers_explicit_path() {
        let f = write_yaml("training:\n  epochs: 2\n");
        let config = resolve_config(Some(f.path())).unwrap();
        assert_eq!(config.training.epochs, 2);
    }
}
