use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Probe the installed document store and report whether rooms can be served.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let healthy = match state.document_store().await {
        Some(store) => match store.health_check().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "document store health check failed");
                false
            }
        },
        None => {
            warn!("no document store installed (degraded mode)");
            false
        }
    };

    if healthy && !state.is_degraded().await {
        HealthResponse::ok()
    } else {
        HealthResponse::degraded()
    }
}
