//! Model manager for BiFormer.
//!
//! Lists the model registry, prints configurations, runs forward and forward-backward
//! passes on random input and downloads pretrained checkpoints.

use anyhow::Result;
use biformer_burn::{BiFormerConfig, ModelRegistry};
use biformer_demos::{
    create_device, get_backend_name, get_training_backend_name, CheckpointedTrainingBackend,
    SelectedBackend, TrainingBackend,
};
use burn::{
    prelude::*,
    tensor::{backend::AutodiffBackend, Distribution},
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "model_manager")]
#[command(about = "BiFormer Model Manager")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all registered models
    List,
    /// Show the configuration and checkpoint of a model
    Info {
        /// Model name
        model_name: String,
    },
    /// Build a model and run it on a random image batch
    Forward {
        /// Model name
        model_name: String,
        /// Input height and width
        #[arg(long, default_value_t = 224)]
        size: usize,
        /// Batch size
        #[arg(long, default_value_t = 1)]
        batch: usize,
        /// Load pretrained weights before running
        #[cfg(feature = "pretrained")]
        #[arg(long)]
        pretrained: bool,
    },
    /// Run a forward and backward pass on a random image batch
    Backward {
        /// Model name
        model_name: String,
        /// Input height and width
        #[arg(long, default_value_t = 224)]
        size: usize,
        /// Batch size
        #[arg(long, default_value_t = 1)]
        batch: usize,
        /// Stages to train with activation checkpointing (overrides the configuration)
        #[arg(long, num_args = 1..)]
        checkpoint_stages: Option<Vec<usize>>,
    },
    /// Download and verify the pretrained checkpoint of a model
    #[cfg(feature = "pretrained")]
    Download {
        /// Model name
        model_name: String,
        /// Cache directory (defaults to the platform cache directory)
        #[arg(long)]
        cache_dir: Option<std::path::PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let registry = ModelRegistry::builtin();

    match args.command {
        Commands::List => {
            println!("Available BiFormer models:");
            for name in registry.names() {
                println!("  - {name}");
            }
        }
        Commands::Info { model_name } => {
            let spec = registry.get(&model_name)?;
            let config = (spec.config_builder)();
            print_config(&model_name, &config);
            match &spec.checkpoint {
                Some(checkpoint) => {
                    println!("Checkpoint: {} ({})", checkpoint.key, checkpoint.url);
                    println!("File name: {}", checkpoint.file_name);
                }
                None => println!("Checkpoint: none"),
            }
        }
        Commands::Forward {
            model_name,
            size,
            batch,
            #[cfg(feature = "pretrained")]
            pretrained,
        } => {
            let device = create_device();
            tracing::info!(backend = get_backend_name(), "selected backend");

            #[cfg(feature = "pretrained")]
            let model = if pretrained {
                let fetcher = biformer_burn::HttpFetcher::with_default_cache()?;
                biformer_burn::load_pretrained::<SelectedBackend>(&registry, &model_name, &fetcher, &device)?
            } else {
                registry.config(&model_name)?.init::<SelectedBackend>(&device)?
            };
            #[cfg(not(feature = "pretrained"))]
            let model = registry.config(&model_name)?.init::<SelectedBackend>(&device)?;

            let input = Tensor::<SelectedBackend, 4>::random(
                [batch, model.in_channels(), size, size],
                Distribution::Normal(0.0, 1.0),
                &device,
            );
            let output = model.forward(input)?;
            println!("Output shape: {:?}", output.dims());

            if model.num_classes() > 0 {
                let top = output.argmax(1).flatten::<1>(0, 1);
                println!("Top-1 classes: {}", top.to_data());
            }
        }
        Commands::Backward {
            model_name,
            size,
            batch,
            checkpoint_stages,
        } => {
            let mut config = registry.config(&model_name)?;
            if let Some(stages) = checkpoint_stages {
                config.use_checkpoint_stages = stages;
            }
            let device = create_device();
            let checkpointing = config.requests_checkpointing();
            tracing::info!(
                backend = get_training_backend_name(checkpointing),
                stages = ?config.use_checkpoint_stages,
                "selected autodiff backend"
            );

            if checkpointing {
                run_backward::<CheckpointedTrainingBackend>(&config, batch, size, &device)?;
            } else {
                run_backward::<TrainingBackend>(&config, batch, size, &device)?;
            }
        }
        #[cfg(feature = "pretrained")]
        Commands::Download {
            model_name,
            cache_dir,
        } => {
            let fetcher = match cache_dir {
                Some(dir) => biformer_burn::HttpFetcher::new(dir),
                None => biformer_burn::HttpFetcher::with_default_cache()?,
            };
            let path = biformer_burn::fetch_checkpoint(&registry, &model_name, &fetcher)?;
            println!("Checkpoint ready: {}", path.display());
        }
    }

    Ok(())
}

fn run_backward<B: AutodiffBackend>(
    config: &BiFormerConfig,
    batch: usize,
    size: usize,
    device: &B::Device,
) -> Result<()> {
    let model = config.init::<B>(device)?;
    let input = Tensor::<B, 4>::random(
        [batch, config.in_channels, size, size],
        Distribution::Normal(0.0, 1.0),
        device,
    );

    let loss = model.forward(input)?.powf_scalar(2.0).mean();
    let grads = loss.backward();
    println!("Loss: {}", loss.into_scalar());

    if let Some(grad) = model.head().and_then(|head| head.weight.val().grad(&grads)) {
        println!("Head gradient norm: {}", grad.powf_scalar(2.0).sum().sqrt().into_scalar());
    }
    Ok(())
}

fn print_config(name: &str, config: &BiFormerConfig) {
    println!("Model: {name}");
    println!("  Depth: {:?}", config.depth);
    println!("  Embedding dims: {:?}", config.embed_dim);
    println!("  Heads: {:?}", config.num_heads());
    println!("  Window grids: {:?}", config.n_wins);
    println!("  Routing top-k: {:?}", config.topks);
    println!("  Norm: {:?}", config.norm_layer);
    println!("  Checkpointed stages: {:?}", config.use_checkpoint_stages);
    println!("  Classes: {}", config.num_classes);
}
