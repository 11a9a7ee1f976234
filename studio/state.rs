use std::sync::Arc;

use ferrite_trainer::SessionController;

/// Everything a request handler can reach. The controller does its own
/// locking, so the state itself is shared without a mutex.
pub struct AppState {
    pub controller: SessionController,
}

pub type SharedState = Arc<AppState>;
