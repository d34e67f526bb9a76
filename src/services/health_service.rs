use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report whether the session store is usable, pinging it when one is installed.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.session_store().await {
        Some(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "session store health check failed");
            }
        }
        None => warn!("session store unavailable (degraded mode)"),
    }

    if state.is_degraded() {
        HealthResponse::degraded()
    } else {
        HealthResponse::ok()
    }
}
