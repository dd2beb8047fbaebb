//! netception CLI - Visualize what a filter of an image network detects.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use netception::image::{inception_to_bytes, load_seed_image, save_image, DISPLAY_SIZE};
use netception::model::{FilterTarget, Model, Sequential};
use netception::{Inceptor, InceptorConfig};

/// Maximize one filter of a VGG-style network by gradient ascent and save the result.
#[derive(Parser, Debug)]
#[command(name = "netception")]
#[command(version, about, long_about = None)]
struct Args {
    /// Output image path.
    #[arg(value_name = "OUTPUT", required_unless_present = "list_layers")]
    output: Option<PathBuf>,

    /// Layer whose filter is maximized.
    #[arg(short, long, default_value = "block3_conv1", value_name = "NAME")]
    layer: String,

    /// Filter (channel) index within the layer.
    #[arg(short, long, default_value = "0", value_name = "INT")]
    filter: usize,

    /// Inception rate: scale of each normalized ascent step.
    #[arg(short, long, default_value = "0.5", value_name = "FLOAT")]
    rate: f32,

    /// Maximum number of ascent steps.
    #[arg(long, default_value = "200", value_name = "INT")]
    max_steps: usize,

    /// Steps per improvement window for early stopping.
    #[arg(long, default_value = "5", value_name = "INT")]
    check_interval: usize,

    /// Minimum fractional improvement per window (0 disables early stopping).
    #[arg(long, default_value = "0.05", value_name = "FLOAT")]
    threshold: f32,

    /// Contrast of the output image (0.0-1.0).
    #[arg(short, long, default_value = "0.15", value_name = "FLOAT")]
    colorfulness: f32,

    /// Input height of the network.
    #[arg(long, default_value = "64", value_name = "INT")]
    height: usize,

    /// Input width of the network.
    #[arg(long, default_value = "64", value_name = "INT")]
    width: usize,

    /// Side of the saved square image (0 keeps the network resolution).
    #[arg(long, default_value_t = DISPLAY_SIZE, value_name = "INT")]
    size: u32,

    /// Output JPEG quality (1-100).
    #[arg(short, long, default_value = "95", value_name = "INT")]
    quality: u8,

    /// Start from this image instead of random noise.
    #[arg(long, value_name = "PATH")]
    seed_image: Option<PathBuf>,

    /// Random seed for the initial noise.
    #[arg(long, value_name = "INT")]
    seed: Option<u64>,

    /// Random seed for the network weights.
    #[arg(long, value_name = "INT")]
    model_seed: Option<u64>,

    /// Print the network's layers and exit.
    #[arg(long)]
    list_layers: bool,

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
                .unwrap_or_else(|_| format!("netception={log_level}").into()),
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
    let model = Sequential::vgg_like(args.height, args.width, args.model_seed)
        .context("Failed to build network")?;

    if args.list_layers {
        for (name, shape) in model.summary() {
            println!("{name:<16} {shape:?}");
        }
        return Ok(());
    }

    let Some(output) = &args.output else {
        anyhow::bail!("No output path given");
    };

    let seed = args
        .seed_image
        .as_ref()
        .map(|path| {
            let [_, height, width, _] = model.input_shape() else {
                anyhow::bail!("Network input is not an NHWC image");
            };
            load_seed_image(path, u32::try_from(*height)?, u32::try_from(*width)?)
                .with_context(|| format!("Failed to load seed image {}", path.display()))
        })
        .transpose()?;

    // Build configuration
    let config = InceptorConfig {
        inception_rate: args.rate,
        max_steps: args.max_steps,
        improvement_check_interval: args.check_interval,
        improvement_threshold: args.threshold,
        seed: args.seed,
        show_progress: true,
    };

    let target = FilterTarget::new(args.layer.as_str(), args.filter);
    let inceptor = Inceptor::new(&model, target, config).context("Failed to initialize inceptor")?;

    let inception = inceptor
        .incept(seed.as_ref())
        .context("Failed to run inception")?;

    let bytes = inception_to_bytes(&inception.tensor, args.colorfulness)
        .context("Failed to convert inception to image bytes")?;

    let size = (args.size > 0).then_some((args.size, args.size));
    save_image(&bytes, output, size, args.quality).context("Failed to save image")?;

    println!(
        "Incepted {} filter {} in {} steps (score {:.4}) -> {}",
        args.layer,
        args.filter,
        inception.steps,
        inception.score,
        output.display()
    );

    Ok(())
}
