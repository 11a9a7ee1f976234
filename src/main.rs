//! Headless trainer: runs one session to completion and logs its progress.
//!
//! Usage:
//!   cargo run --release -- [config.json]

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ferrite_trainer::train::ProgressEvent;
use ferrite_trainer::{StartStatus, StudioConfig};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = match StudioConfig::load(path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            process::exit(2);
        }
    };
    let controller = match config.build_controller() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "Could not load dataset");
            process::exit(1);
        }
    };

    // Ctrl-C stops the run; the event stream below then ends on its own.
    let interrupted = Arc::clone(&controller);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received SIGINT, stopping training");
        interrupted.stop();
    }) {
        error!(error = %e, "Could not install Ctrl-C handler");
    }

    match controller.start() {
        Ok(StartStatus::Started) | Ok(StartStatus::AlreadyRunning) => {}
        Err(e) => {
            error!(error = %e, "Could not start training");
            process::exit(1);
        }
    }

    for event in controller.subscribe() {
        match event {
            ProgressEvent::EpochComplete { epoch, val_loss, val_accuracy, .. } => {
                info!(epoch, val_loss, val_accuracy = %format!("{:.2}%", val_accuracy * 100.0), "epoch");
            }
            ProgressEvent::TrainingComplete { predictions, true_labels, .. } => {
                let hits = predictions.iter().zip(&true_labels).filter(|(p, t)| p == t).count();
                info!(hits, sample = predictions.len(), "Sample predictions");
            }
            ProgressEvent::Error { message, .. } => error!(%message, "Training failed"),
            ProgressEvent::BatchUpdate { .. } => {}
        }
    }

    if controller.wait(config.train.join_timeout()).is_none() {
        controller.shutdown();
    }
    let metrics = controller.metrics();
    info!(
        state = ?metrics.state,
        epochs = metrics.loss.len(),
        artifact = metrics.artifact_path.as_deref().unwrap_or("-"),
        elapsed_ms = metrics.elapsed_ms.unwrap_or(0),
        "Done"
    );
    if metrics.error_message.is_some() {
        process::exit(1);
    }
}
