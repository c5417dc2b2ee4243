//! CLI entry point for pose-mdn.

use candle_core::Device;
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pose_mdn_rs::config::PoseMdnConfig;
use pose_mdn_rs::error::PoseMdnResult;
use pose_mdn_rs::sampler::{sample_to_file, DEFAULT_SAMPLE_STEPS};
use pose_mdn_rs::trainer::{load_checkpoint, Trainer};

#[derive(Parser)]
#[command(name = "pose-mdn")]
#[command(about = "Mixture-density RNN for continuous pose trajectories")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        config: String,
    },
    /// Train a model
    Train {
        /// Path to configuration file
        config: String,
        /// Resume from a checkpoint directory
        #[arg(long)]
        resume: Option<String>,
    },
    /// Sample a trajectory from a trained model
    Sample {
        /// Path to configuration file
        config: String,
        /// Checkpoint directory (defaults to <output_dir>/checkpoint-final)
        #[arg(long)]
        checkpoint: Option<String>,
        /// Number of generated steps after the seed pose
        #[arg(long, default_value_t = DEFAULT_SAMPLE_STEPS)]
        num: usize,
        /// Output file for the trajectory
        #[arg(long, default_value = "output.txt")]
        output: String,
        /// Sampling seed (defaults to the configured seed)
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Generate a starter configuration file
    Init {
        /// Output path for the config file
        #[arg(default_value = "config.yaml")]
        output: String,
        /// Configuration preset (dance, test)
        #[arg(long, default_value = "dance")]
        preset: String,
    },
}

fn main() -> PoseMdnResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            tracing::info!("Validating configuration: {}", config);
            let config = PoseMdnConfig::from_file(&config)?;
            config.validate()?;
            println!("✓ Configuration is valid");
            println!("  Cell: {}", config.model);
            println!(
                "  Encoder: {} layers of width {}",
                config.num_layers, config.rnn_size
            );
            println!("  Mixture components: {}", config.num_mixture);
            println!("  Dataset: {}", config.dataset.path);
        }
        Commands::Train { config, resume } => {
            tracing::info!("Starting training with config: {}", config);
            let config = PoseMdnConfig::from_file(&config)?;

            let mut trainer = Trainer::new(config)?;
            if let Some(checkpoint) = resume {
                trainer.resume_from(&checkpoint)?;
            }
            let summary = trainer.train()?;
            match summary.final_loss {
                Some(loss) => println!(
                    "✓ Trained {} steps, final loss {loss:.4}",
                    summary.steps
                ),
                None => println!(
                    "✓ No steps run, checkpoint already complete at step {}",
                    summary.steps
                ),
            }
        }
        Commands::Sample {
            config,
            checkpoint,
            num,
            output,
            seed,
        } => {
            let config = PoseMdnConfig::from_file(&config)?;
            config.validate()?;
            let checkpoint = checkpoint
                .unwrap_or_else(|| format!("{}/checkpoint-final", config.output_dir));
            tracing::info!("Sampling {} steps from {}", num, checkpoint);

            let (model, _) = load_checkpoint(&checkpoint, &Device::Cpu)?;
            let rng = ChaCha8Rng::seed_from_u64(seed.unwrap_or(config.seed));
            let written = sample_to_file(&model, num, rng, &output)?;
            println!("✓ Wrote {written} poses to {output}");
        }
        Commands::Init { output, preset } => {
            tracing::info!("Generating config for preset: {}", preset);
            let config = PoseMdnConfig::from_preset(&preset)?;
            config.to_file(&output)?;
            println!("✓ Configuration written to: {output}");
        }
    }

    Ok(())
}
