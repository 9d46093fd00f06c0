//! CLI entry point for the LungFusion pipeline.
//!
//! Subcommands:
//!   train     -- Train the clip + clinical classifier and keep the best checkpoint
//!   evaluate  -- Score a dataset with a checkpoint and write per-patient predictions
//!   inspect   -- Index a dataset and print what was found

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use lungfusion_core::{LoggingConfig, PipelineConfig};
use lungfusion_model::{read_checkpoint_meta, select_device};
use lungfusion_training::config::resolve_config;
use lungfusion_training::video::FfmpegDecoder;
use lungfusion_training::{evaluate, train, DatasetIndex};

#[derive(Parser)]
#[command(name = "lungfusion", about = "Lung ultrasound + clinical record COVID classifier")]
struct Cli {
    /// YAML config file. Falls back to $LUNGFUSION_CONFIG, then defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run on CPU even when an accelerator is available.
    #[arg(long, global = true)]
    cpu: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train on a dataset and checkpoint the best validation epoch.
    Train {
        /// Dataset root (overrides data.root).
        #[arg(long)]
        root: Option<PathBuf>,

        /// Checkpoint output path.
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Number of epochs.
        #[arg(long)]
        epochs: Option<usize>,

        /// Mini-batch size.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Learning rate.
        #[arg(long)]
        lr: Option<f64>,

        /// Random seed.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Evaluate a checkpoint and write the patient report.
    Evaluate {
        /// Dataset root (overrides evaluation.root).
        #[arg(long)]
        root: Option<PathBuf>,

        /// Checkpoint to load.
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Report output path.
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Index a dataset and summarise it.
    Inspect {
        /// Dataset root (defaults to data.root).
        #[arg(long)]
        root: Option<PathBuf>,

        /// Also print metadata of this checkpoint.
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match resolve_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    init_logging(&config.logging);

    if let Err(e) = run(cli.command, config, cli.cpu) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(command: Command, mut config: PipelineConfig, force_cpu: bool) -> anyhow::Result<()> {
    let decoder = Arc::new(FfmpegDecoder::from_config(&config.data));

    match command {
        Command::Train {
            root,
            checkpoint,
            epochs,
            batch_size,
            lr,
            seed,
        } => {
            let training = &mut config.training;
            if let Some(path) = checkpoint {
                training.checkpoint_path = path;
            }
            training.epochs = epochs.unwrap_or(training.epochs);
            training.batch_size = batch_size.unwrap_or(training.batch_size);
            training.lr = lr.unwrap_or(training.lr);
            training.seed = seed.unwrap_or(training.seed);
            if let Some(root) = root {
                config.data.root = root;
            }
            config.validate()?;

            let device = select_device(force_cpu);
            let dataset = DatasetIndex::scan(&config.data.root, &config.data, decoder)?;
            let history = train(&config, &dataset, &device)?;

            if let Some(best) = history.iter().rev().find(|m| m.checkpointed) {
                println!(
                    "Best epoch {}: {} -> {}",
                    best.epoch,
                    best.val_metrics,
                    config.training.checkpoint_path.display()
                );
            }
        }

        Command::Evaluate {
            root,
            checkpoint,
            report,
        } => {
            let evaluation = &mut config.evaluation;
            if let Some(root) = root {
                evaluation.root = root;
            }
            if let Some(path) = checkpoint {
                evaluation.checkpoint_path = path;
            }
            if let Some(path) = report {
                evaluation.report_path = path;
            }
            config.validate()?;

            let device = select_device(force_cpu);
            let dataset =
                DatasetIndex::scan_for_evaluation(&config.evaluation.root, &config.data, decoder)?;
            let summary = evaluate(&config, &dataset, &device)?;

            println!(
                "Scored {} clips for {} patients ({} skipped) -> {}",
                summary.clips_scored,
                summary.predictions.len(),
                summary.skipped_samples,
                config.evaluation.report_path.display()
            );
            if let Some(metrics) = summary.patient_metrics {
                println!("Patient-level: {metrics}");
            }
        }

        Command::Inspect { root, checkpoint } => {
            let root = root.unwrap_or_else(|| config.data.root.clone());
            let dataset = DatasetIndex::scan(&root, &config.data, decoder)?;
            let summary = dataset.summary();
            println!("Dataset: {}", root.display());
            println!(
                "  clips={} (L={} R={} other={})",
                summary.clips, summary.left_clips, summary.right_clips, summary.unspecified_clips
            );
            println!(
                "  patients={} labeled={} excluded={}",
                summary.patients, summary.labeled_patients, summary.excluded_patients
            );

            if let Some(path) = checkpoint {
                let meta = read_checkpoint_meta(&path)?;
                println!(
                    "Checkpoint: {} (epoch {}, val_acc={:.4}, saved {})",
                    path.display(),
                    meta.epoch,
                    meta.val_accuracy,
                    meta.saved_at
                );
            }
        }
    }
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
