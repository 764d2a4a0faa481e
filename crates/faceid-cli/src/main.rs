use anyhow::Result;
use clap::{Parser, Subcommand};
use faceid_core::{ConfidenceMapping, DistanceMetric};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod display;

use config::Config;

#[derive(Parser)]
#[command(name = "faceid", version, about = "Nearest-neighbor face identification")]
struct Cli {
    /// TOML config file (default: $FACEID_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Classifier artifact path
    #[arg(long, global = true)]
    classifier: Option<PathBuf>,

    /// Scaler artifact path
    #[arg(long, global = true)]
    scaler: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a 1-NN classifier from a CSV of face measurements
    Train {
        /// Input table with a header row
        #[arg(default_value = "face_measurements.csv")]
        data: PathBuf,
        /// Column holding the identity label
        #[arg(long, default_value = faceid_core::dataset::DEFAULT_LABEL_COLUMN)]
        label_column: String,
        /// Share of rows held out for the accuracy estimate
        #[arg(long, default_value_t = 0.2)]
        test_fraction: f64,
        /// Shuffle seed for the train/test split
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Distance metric: euclidean or cosine
        #[arg(long, default_value_t = DistanceMetric::Euclidean)]
        metric: DistanceMetric,
    },
    /// Identify faces in the live camera stream
    Identify {
        /// V4L2 device (e.g. /dev/video0)
        #[arg(long)]
        device: Option<String>,
        #[command(flatten)]
        policy: PolicyArgs,
        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<u64>,
        /// Do not read keys from the terminal
        #[arg(long)]
        headless: bool,
        /// Image file the annotated frame is written to
        #[arg(long)]
        preview: Option<PathBuf>,
    },
    /// Identify faces in a still image
    Classify {
        image: PathBuf,
        #[command(flatten)]
        policy: PolicyArgs,
        /// Write the annotated image here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Summarize a trained classifier/scaler pair
    Inspect,
    /// List V4L2 capture devices
    Devices,
}

#[derive(clap::Args)]
struct PolicyArgs {
    /// Maximum distance accepted as a known identity
    #[arg(long)]
    threshold: Option<f32>,
    /// Confidence display mapping: linear or inverse
    #[arg(long)]
    mapping: Option<ConfidenceMapping>,
    /// Fall back to a mean face shape when a box has no keypoints
    #[arg(long)]
    mean_shape_fallback: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(path) = cli.classifier {
        config.classifier_path = path;
    }
    if let Some(path) = cli.scaler {
        config.scaler_path = path;
    }

    match cli.command {
        Commands::Train {
            data,
            label_column,
            test_fraction,
            seed,
            metric,
        } => commands::train(
            &config,
            &data,
            &label_column,
            &faceid_core::trainer::TrainConfig {
                test_fraction,
                seed,
                metric,
            },
        ),
        Commands::Identify {
            device,
            policy,
            max_frames,
            headless,
            preview,
        } => {
            policy.apply(&mut config);
            if let Some(device) = device {
                config.camera_device = device;
            }
            if let Some(preview) = preview {
                config.preview_path = preview;
            }
            commands::identify(&config, policy.mean_shape_fallback, max_frames, headless)
        }
        Commands::Classify { image, policy, output } => {
            policy.apply(&mut config);
            commands::classify(&config, policy.mean_shape_fallback, &image, output.as_deref())
        }
        Commands::Inspect => commands::inspect(&config),
        Commands::Devices => commands::devices(),
    }
}

impl PolicyArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(threshold) = self.threshold {
            config.distance_threshold = threshold;
        }
        if let Some(mapping) = self.mapping {
            config.confidence_mapping = mapping;
        }
    }
}
