use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Health payload; probes the store so outages show up in the logs.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.session_store().await {
        Some(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "session store health check failed");
            }
        }
        None => warn!("session store unavailable (degraded mode)"),
    }

    let live_sessions = state.session_count();
    if state.is_degraded() {
        HealthResponse::degraded(live_sessions)
    } else {
        HealthResponse::ok(live_sessions)
    }
}
