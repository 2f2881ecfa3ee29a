use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cutout::config::Settings;
use cutout::matte::ResampleFilter;
use cutout::output::{OutputSink, PngFile, Stdout};
use cutout::progress::ProgressChannel;
use cutout::segmentation::SegformerLoader;
use cutout::{Remover, Session};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input image (any format the image crate decodes)
    input: PathBuf,

    /// Output PNG path, or "-" for stdout
    /// Defaults to <input stem>_cutout.png next to the input
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Path to segmentation model (ONNX file)
    #[arg(long)]
    model: Option<PathBuf>,

    /// TOML settings file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Gaussian blur radius applied to the resampled mask
    #[arg(long)]
    blur_radius: Option<f32>,

    /// Falloff exponent of the alpha curve
    #[arg(long)]
    gamma: Option<f32>,

    /// Alpha values below this are made fully transparent
    #[arg(long)]
    threshold: Option<u8>,

    /// Interpolation for mask upsampling
    #[arg(long, value_enum)]
    filter: Option<ResampleFilter>,

    /// Write the alpha mask (grayscale) instead of the composite
    #[arg(long)]
    matte_only: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = load_settings(&args).await?;
    tracing::info!(
        "Feather: blur={} gamma={} threshold={}, filter: {:?}",
        settings.feather.blur_radius,
        settings.feather.gamma,
        settings.feather.threshold,
        settings.resample.filter
    );

    let loader = SegformerLoader::new(&settings.model).context("Failed to configure model")?;
    let session = Arc::new(Session::new(loader));
    let remover = Remover::new(Arc::clone(&session), &settings);

    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;

    let (progress, mut events) = ProgressChannel::new(16);
    let reporter = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!("[{:>3}%] {}", event.percent, event.stage);
        }
    });

    let encoded = if args.matte_only {
        remover.matte(&bytes, &progress).await
    } else {
        remover.process(&bytes, &progress).await.map(|cutout| cutout.png)
    };
    drop(progress);
    let _ = reporter.await;

    let encoded = encoded.with_context(|| format!("Failed to process {}", args.input.display()))?;

    let mut sink: Box<dyn OutputSink> = match output_path(&args) {
        Some(path) => Box::new(PngFile::new(path)),
        None => Box::new(Stdout),
    };
    sink.write_image(&encoded)?;

    Ok(())
}

async fn load_settings(args: &Args) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)
            .await
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };

    if let Some(model) = &args.model {
        settings.model.path = Some(model.clone());
    }
    if let Some(blur_radius) = args.blur_radius {
        settings.feather.blur_radius = blur_radius;
    }
    if let Some(gamma) = args.gamma {
        settings.feather.gamma = gamma;
    }
    if let Some(threshold) = args.threshold {
        settings.feather.threshold = threshold;
    }
    if let Some(filter) = args.filter {
        settings.resample.filter = filter;
    }

    settings.validate()?;
    Ok(settings)
}

/// `None` means stdout.
fn output_path(args: &Args) -> Option<PathBuf> {
    match &args.output {
        Some(path) if path.as_os_str() == "-" => None,
        Some(path) => Some(path.clone()),
        None => Some(default_output(&args.input, args.matte_only)),
    }
}

fn default_output(input: &Path, matte_only: bool) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("out");
    let suffix = if matte_only { "_matte.png" } else { "_cutout.png" };
    input.with_file_name(format!("{stem}{suffix}"))
}
