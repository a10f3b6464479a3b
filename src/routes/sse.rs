use std::convert::Infallible;

use axum::{
    Extension, Router,
    extract::{Path, State},
    middleware,
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;

use crate::{
    error::AppError, routes::auth::require_caller, services::auth::CallerIdentity,
    services::sse_service, state::SharedState,
};

#[utoipa::path(
    get,
    path = "/rooms/{id}/events",
    tag = "sse",
    params(
        ("Authorization" = String, Header, description = "Bearer token"),
        ("id" = String, Path, description = "Room code")
    ),
    responses(
        (status = 200, description = "Room and leaderboard updates", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown room", body = crate::error::ErrorBody)
    )
)]
/// Stream room snapshots and leaderboard updates; a host connection also keeps its heartbeat.
pub async fn room_events(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(room_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    Ok(sse_service::room_stream(state, room_id, caller).await?)
}

/// Configure the SSE endpoints.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/rooms/{id}/events", get(room_events))
        .route_layer(middleware::from_fn_with_state(state, require_caller))
}
