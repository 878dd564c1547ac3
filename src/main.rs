//! latentforge CLI - encode an image into VAE latent space.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use latentforge::image::ImageStore;
use latentforge::model::{ModelCache, ModelLoader, VaeRef};
use latentforge::tensor::TensorStore;
use latentforge::{ImageToLatents, PipelineContext};

/// Encode an image into VAE latent space for diffusion pipelines.
#[derive(Parser, Debug)]
#[command(name = "latentforge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Input image path.
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Model repository holding the VAE package.
    #[arg(long, default_value = "latentforge/sd15-vae-onnx", value_name = "REPO")]
    vae: String,

    /// Subfolder of the repository the package lives in.
    #[arg(long, value_name = "NAME")]
    subfolder: Option<String>,

    /// Encode in overlapping tiles to bound peak memory on large images.
    #[arg(long)]
    tiled: bool,

    /// Run the VAE at full 32-bit precision instead of half.
    #[arg(long)]
    fp32: bool,

    /// Random seed for reproducible sampling with standard VAEs.
    #[arg(long, value_name = "INT")]
    seed: Option<u64>,

    /// Directory for the image and tensor stores.
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("latentforge={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(err) = run(&args) {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(args: &Args) -> Result<()> {
    if !args.input.exists() {
        anyhow::bail!("Input file does not exist: {}", args.input.display());
    }

    let data_dir = match &args.data_dir {
        Some(dir) => dir.clone(),
        None => dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("latentforge"),
    };

    let mut ctx = PipelineContext::new(
        ImageStore::new(data_dir.join("images")).context("Failed to open image store")?,
        ModelLoader::new(ModelCache::new().context("Failed to open model cache")?),
        TensorStore::new(data_dir.join("tensors")).context("Failed to open tensor store")?,
    );
    ctx.seed = args.seed;

    let mut vae = VaeRef::new(args.vae.clone());
    if let Some(subfolder) = &args.subfolder {
        vae = vae.with_subfolder(subfolder);
    }

    let image = ctx
        .images
        .ingest(&args.input)
        .context("Failed to ingest input image")?;

    let node = ImageToLatents {
        image,
        vae,
        tiled: args.tiled,
        fp32: args.fp32,
    };
    let latents = node.invoke(&ctx).context("Failed to encode image")?;

    println!(
        "Encoded {} -> {} (shape {:?}, {})",
        args.input.display(),
        latents.latents_id,
        latents.shape,
        latents.dtype.name(),
    );

    Ok(())
}
