use ferrite_trainer::TrainError;
use tracing::warn;

use crate::routes::{error_response, json_response, Reply};
use crate::state::SharedState;

/// `POST /start_training`
///
/// Dataset and configuration problems are the caller's to fix (422); a
/// failed thread spawn is ours (500).
pub fn handle_start(state: &SharedState) -> Reply {
    match state.controller.start() {
        Ok(status) => json_response(200, &status),
        Err(e @ TrainError::Io(_)) => {
            warn!(error = %e, "Could not start training");
            error_response(500, &e.to_string())
        }
        Err(e) => {
            warn!(error = %e, "Rejected start");
            error_response(422, &e.to_string())
        }
    }
}

/// `POST /stop_training`
pub fn handle_stop(state: &SharedState) -> Reply {
    json_response(200, &state.controller.stop())
}

/// `GET /get_metrics`
pub fn handle_metrics(state: &SharedState) -> Reply {
    json_response(200, &state.controller.metrics())
}
