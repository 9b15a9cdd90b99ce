use anyhow::{Context, Result};
use clap::Parser;
use polyp_seg::{
    config::{Config, ConfigFile},
    models::DeviceSelector,
    web::serve,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "polyp-seg")]
#[command(about = "UNet++ polyp segmentation web service")]
struct Args {
    /// YAML configuration file (model_path, im_width, im_height)
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Server bind address
    #[arg(long, default_value = "0.0.0.0:7860")]
    bind: String,

    /// Compute device, overrides the configuration file
    #[arg(long, value_enum)]
    device: Option<DeviceSelector>,

    /// Number of worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志系统
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting polyp segmentation service...");
    tracing::info!("Configuration file: {}", args.config.display());

    let file = ConfigFile::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    tracing::info!(
        "Model: {} ({}x{})",
        file.model_path.display(),
        file.im_width,
        file.im_height
    );

    let config = Config::new(args.bind, file, args.workers, args.device)?;
    tracing::info!("Bind address: {}", config.bind_addr);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(serve(config))?;

    Ok(())
}
