use gridwatch::{schedule, signals};
use gridwatch_common::config::Config;
use gridwatch_source::CameraFactory;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    // stdout carries the detection stream, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        url = config.capture.url,
        mode = ?config.capture.mode,
        width = config.capture.width,
        height = config.capture.height,
        scale = config.detect.scale,
        threshold = config.detect.threshold,
        multiplier = config.detect.multiplier,
        lower_scan_cutoff = config.detect.lower_scan_cutoff,
        loop_secs = config.schedule.loop_secs,
        "starting gridwatch"
    );

    let flags = Arc::new(signals::SignalFlags::default());
    if let Err(e) = signals::install(&flags) {
        error!(error = %e, "failed to install signal handlers");
        std::process::exit(1);
    }

    let factory = match CameraFactory::new() {
        Ok(f) => f,
        Err(e) => {
            error!(error = %e, "failed to create HTTP client");
            std::process::exit(1);
        }
    };

    if let Err(e) = schedule::run(&factory, &config_path, config, &flags).await {
        error!(error = %e, "capture failed");
        std::process::exit(1);
    }
}
