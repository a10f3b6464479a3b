use serde::Serialize;
use utoipa::ToSchema;

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "ok" or "degraded".
    pub status: String,
    /// Whether a document store is installed and answered its last health check.
    pub store_ready: bool,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            store_ready: true,
        }
    }

    /// No usable document store: every room operation answers 503.
    pub fn degraded() -> Self {
        Self {
            status: "degraded".to_string(),
            store_ready: false,
        }
    }
}
