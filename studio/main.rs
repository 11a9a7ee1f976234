/// ferrite-trainer Studio
///
/// JSON control API plus a live Server-Sent Events feed for the single
/// training session. Served by a synchronous tiny_http server.
///
/// Run with:
///   cargo run --bin studio --release -- [config.json]
/// Then:
///   curl -X POST http://127.0.0.1:7878/start_training
///   curl -N http://127.0.0.1:7878/train/events
///
/// Endpoints:
///   POST /start_training          GET /get_metrics
///   POST /stop_training           GET /train/events
///   GET  /get_random_predictions  GET /sample_image?index=N
///   GET  /health

mod handlers;
mod routes;
mod state;
mod util;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use tiny_http::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ferrite_trainer::StudioConfig;
use state::{AppState, SharedState};

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
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Could not load dataset");
            process::exit(1);
        }
    };
    let server = match Server::http(&config.bind_addr) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(addr = %config.bind_addr, error = %e, "Failed to bind HTTP server");
            process::exit(1);
        }
    };

    println!("╔══════════════════════════════════════════════╗");
    println!("║          ferrite-trainer Studio              ║");
    println!("╠══════════════════════════════════════════════╣");
    println!("║  Listening on http://{:<24}║", config.bind_addr);
    println!("║  POST /start_training to begin               ║");
    println!("╚══════════════════════════════════════════════╝");
    info!(
        addr = %config.bind_addr,
        checkpoint_dir = %config.checkpoint_dir.display(),
        max_epochs = config.train.max_epochs,
        "Studio ready"
    );

    let state = Arc::new(AppState { controller });

    // Ctrl-C unblocks the accept loop below so the worker is stopped cleanly.
    let interrupted = Arc::clone(&server);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received SIGINT, shutting down");
        interrupted.unblock();
    }) {
        error!(error = %e, "Could not install Ctrl-C handler");
    }

    serve(&server, &state);
    info!("Studio stopped");
}

/// Accepts requests until the server is unblocked, then stops any active run.
///
/// Each request is dispatched on its own thread so the SSE handler (which
/// blocks for the entire run) does not stall the control endpoints.
fn serve(server: &Server, state: &SharedState) {
    for request in server.incoming_requests() {
        let state = Arc::clone(state);
        std::thread::spawn(move || routes::dispatch(request, state));
    }
    state.controller.shutdown();
}
