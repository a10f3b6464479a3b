use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{delete, get, post},
};
use axum_valid::Valid;

use crate::{
    dto::{
        player::{JoinRoomRequest, LeaderboardEntryView, LeaveResponse, PlayerView},
        presence::{PresenceResponse, RecoveryResponse},
        room::{
            AdvanceQuery, CreateRoomRequest, JoinableResponse, RoomCodeResponse, RoomSummary,
            RoomView,
        },
        submission::{SubmissionResponse, SubmitAnswerRequest},
    },
    error::{AppError, ErrorBody},
    routes::auth::require_caller,
    services::{
        auth::CallerIdentity,
        discovery_service, lifecycle_service, presence_service, session_service,
        submission_service::{self, AnswerSubmission, SubmissionStatus},
    },
    state::SharedState,
};

/// Room discovery, lifecycle, roster, scoring and presence endpoints.
pub fn router(state: SharedState) -> Router<SharedState> {
    let public = Router::new()
        .route("/rooms", get(list_rooms))
        .route("/rooms/code", post(generate_code))
        .route("/rooms/{id}/joinable", get(joinable))
        .route("/rooms/{id}/players", get(list_players))
        .route("/rooms/{id}/leaderboard", get(leaderboard))
        .route("/rooms/{id}/presence", get(presence));

    let authenticated = Router::new()
        .route("/rooms", post(create_room))
        .route("/rooms/{id}", get(get_room))
        .route("/rooms/{id}/start", post(start_quiz))
        .route("/rooms/{id}/advance", post(advance_question))
        .route("/rooms/{id}/finish", post(finish_quiz))
        .route("/rooms/{id}/players", post(join_room))
        .route("/rooms/{id}/players/me", delete(leave_room))
        .route("/rooms/{id}/answers", post(submit_answer))
        .route("/rooms/{id}/heartbeat", post(heartbeat))
        .route("/rooms/{id}/host/recover", post(recover_host))
        .route_layer(middleware::from_fn_with_state(state, require_caller));

    public.merge(authenticated)
}

/// Open a new room hosted by the caller.
#[utoipa::path(
    post,
    path = "/rooms",
    tag = "rooms",
    params(("Authorization" = String, Header, description = "Bearer token of the host")),
    request_body = CreateRoomRequest,
    responses(
        (status = 201, description = "Room created", body = RoomView),
        (status = 409, description = "Room code already taken", body = ErrorBody)
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    Valid(Json(payload)): Valid<Json<CreateRoomRequest>>,
) -> Result<(StatusCode, Json<RoomView>), AppError> {
    let room_id = match payload.room_id.clone() {
        Some(room_id) => room_id,
        None => discovery_service::generate_room_code(&state).await?,
    };
    let room =
        lifecycle_service::create_room(&state, &caller, payload.into_new_room(room_id)).await?;
    Ok((StatusCode::CREATED, Json(room.into())))
}

/// Public rooms still waiting for players.
#[utoipa::path(
    get,
    path = "/rooms",
    tag = "rooms",
    responses((status = 200, description = "Joinable public rooms", body = [RoomSummary]))
)]
pub async fn list_rooms(
    State(state): State<SharedState>,
) -> Result<Json<Vec<RoomSummary>>, AppError> {
    let rooms = discovery_service::list_public_rooms(&state).await?;
    Ok(Json(rooms.into_iter().map(Into::into).collect()))
}

/// Reserve-free room code suggestion.
#[utoipa::path(
    post,
    path = "/rooms/code",
    tag = "rooms",
    responses((status = 200, description = "Unused room code", body = RoomCodeResponse))
)]
pub async fn generate_code(
    State(state): State<SharedState>,
) -> Result<Json<RoomCodeResponse>, AppError> {
    let room_id = discovery_service::generate_room_code(&state).await?;
    Ok(Json(RoomCodeResponse { room_id }))
}

/// Read a room; reads by the host refresh its heartbeat.
#[utoipa::path(
    get,
    path = "/rooms/{id}",
    tag = "rooms",
    params(
        ("Authorization" = String, Header, description = "Bearer token"),
        ("id" = String, Path, description = "Room code")
    ),
    responses(
        (status = 200, description = "Room", body = RoomView),
        (status = 404, description = "Unknown room", body = ErrorBody)
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomView>, AppError> {
    let room = lifecycle_service::get_room(&state, &room_id, Some(&caller)).await?;
    Ok(Json(room.into()))
}

/// Whether a room exists and has not finished.
#[utoipa::path(
    get,
    path = "/rooms/{id}/joinable",
    tag = "rooms",
    params(("id" = String, Path, description = "Room code")),
    responses((status = 200, description = "Joinability", body = JoinableResponse))
)]
pub async fn joinable(
    State(state): State<SharedState>,
    Path(room_id): Path<String>,
) -> Result<Json<JoinableResponse>, AppError> {
    let joinable = discovery_service::validate_joinable(&state, &room_id).await?;
    Ok(Json(JoinableResponse { room_id, joinable }))
}

/// Start the quiz (host only).
#[utoipa::path(
    post,
    path = "/rooms/{id}/start",
    tag = "lifecycle",
    params(
        ("Authorization" = String, Header, description = "Bearer token of the host"),
        ("id" = String, Path, description = "Room code")
    ),
    responses(
        (status = 200, description = "Quiz started", body = RoomView),
        (status = 403, description = "Caller is not the host", body = ErrorBody),
        (status = 409, description = "Already started", body = ErrorBody),
        (status = 412, description = "Not enough players", body = ErrorBody)
    )
)]
pub async fn start_quiz(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomView>, AppError> {
    let room = lifecycle_service::start_quiz(&state, &room_id, &caller).await?;
    Ok(Json(room.into()))
}

/// Open the next question, or finish after the last one (host only).
#[utoipa::path(
    post,
    path = "/rooms/{id}/advance",
    tag = "lifecycle",
    params(
        ("Authorization" = String, Header, description = "Bearer token of the host"),
        ("id" = String, Path, description = "Room code"),
        AdvanceQuery
    ),
    responses(
        (status = 200, description = "Room after advancing", body = RoomView),
        (status = 403, description = "Caller is not the host", body = ErrorBody),
        (status = 409, description = "Room is not live", body = ErrorBody)
    )
)]
pub async fn advance_question(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(room_id): Path<String>,
    Query(query): Query<AdvanceQuery>,
) -> Result<Json<RoomView>, AppError> {
    let room =
        lifecycle_service::advance_question(&state, &room_id, &caller, query.expected_question)
            .await?;
    Ok(Json(room.into()))
}

/// End the quiz (host only).
#[utoipa::path(
    post,
    path = "/rooms/{id}/finish",
    tag = "lifecycle",
    params(
        ("Authorization" = String, Header, description = "Bearer token of the host"),
        ("id" = String, Path, description = "Room code")
    ),
    responses(
        (status = 200, description = "Quiz finished", body = RoomView),
        (status = 403, description = "Caller is not the host", body = ErrorBody)
    )
)]
pub async fn finish_quiz(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomView>, AppError> {
    let room = lifecycle_service::finish_quiz(&state, &room_id, &caller).await?;
    Ok(Json(room.into()))
}

/// Join the room, or update the caller's display name when already on the roster.
#[utoipa::path(
    post,
    path = "/rooms/{id}/players",
    tag = "players",
    params(
        ("Authorization" = String, Header, description = "Bearer token"),
        ("id" = String, Path, description = "Room code")
    ),
    request_body = JoinRoomRequest,
    responses(
        (status = 200, description = "Roster entry", body = PlayerView),
        (status = 409, description = "Room finished", body = ErrorBody),
        (status = 412, description = "Room full", body = ErrorBody)
    )
)]
pub async fn join_room(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(room_id): Path<String>,
    Valid(Json(payload)): Valid<Json<JoinRoomRequest>>,
) -> Result<Json<PlayerView>, AppError> {
    let player = session_service::join_room(&state, &room_id, &caller, &payload.name).await?;
    Ok(Json(player.into()))
}

/// Current roster in join order.
#[utoipa::path(
    get,
    path = "/rooms/{id}/players",
    tag = "players",
    params(("id" = String, Path, description = "Room code")),
    responses((status = 200, description = "Roster", body = [PlayerView]))
)]
pub async fn list_players(
    State(state): State<SharedState>,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<PlayerView>>, AppError> {
    let players = session_service::list_players(&state, &room_id).await?;
    Ok(Json(players.into_iter().map(Into::into).collect()))
}

/// Leave the room.
#[utoipa::path(
    delete,
    path = "/rooms/{id}/players/me",
    tag = "players",
    params(
        ("Authorization" = String, Header, description = "Bearer token"),
        ("id" = String, Path, description = "Room code")
    ),
    responses((status = 200, description = "Left the room", body = LeaveResponse))
)]
pub async fn leave_room(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(room_id): Path<String>,
) -> Result<Json<LeaveResponse>, AppError> {
    let removed = session_service::leave_room(&state, &room_id, &caller).await?;
    Ok(Json(LeaveResponse { removed }))
}

/// Players ranked by score.
#[utoipa::path(
    get,
    path = "/rooms/{id}/leaderboard",
    tag = "players",
    params(("id" = String, Path, description = "Room code")),
    responses((status = 200, description = "Leaderboard", body = [LeaderboardEntryView]))
)]
pub async fn leaderboard(
    State(state): State<SharedState>,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<LeaderboardEntryView>>, AppError> {
    let board = session_service::get_leaderboard(&state, &room_id).await?;
    Ok(Json(board.into_iter().map(Into::into).collect()))
}

/// Submit an answer to the open question. Resubmissions return `409` with the original
/// result, which clients treat as success.
#[utoipa::path(
    post,
    path = "/rooms/{id}/answers",
    tag = "answers",
    params(
        ("Authorization" = String, Header, description = "Bearer token"),
        ("id" = String, Path, description = "Room code")
    ),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Answer scored", body = SubmissionResponse),
        (status = 409, description = "Already answered (body carries the original result) or stale question", body = SubmissionResponse)
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(room_id): Path<String>,
    Valid(Json(payload)): Valid<Json<SubmitAnswerRequest>>,
) -> Result<(StatusCode, Json<SubmissionResponse>), AppError> {
    let submission = AnswerSubmission {
        room_id,
        question_index: payload.question_index,
        answer_index: payload.answer_index,
        submission_id: payload.submission_id,
    };
    let outcome = submission_service::submit_answer_as(&state, &caller, submission).await?;
    let status = match outcome.status {
        SubmissionStatus::Accepted => StatusCode::OK,
        SubmissionStatus::AlreadySubmitted => StatusCode::CONFLICT,
    };
    Ok((status, Json(outcome.into())))
}

/// Explicit host heartbeat.
#[utoipa::path(
    post,
    path = "/rooms/{id}/heartbeat",
    tag = "presence",
    params(
        ("Authorization" = String, Header, description = "Bearer token of the host"),
        ("id" = String, Path, description = "Room code")
    ),
    responses(
        (status = 200, description = "Heartbeat recorded", body = RoomView),
        (status = 403, description = "Caller is not the host", body = ErrorBody)
    )
)]
pub async fn heartbeat(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomView>, AppError> {
    let room = presence_service::heartbeat(&state, &room_id, &caller).await?;
    Ok(Json(room.into()))
}

/// Whether the host has been heard from within the timeout.
#[utoipa::path(
    get,
    path = "/rooms/{id}/presence",
    tag = "presence",
    params(("id" = String, Path, description = "Room code")),
    responses((status = 200, description = "Host presence", body = PresenceResponse))
)]
pub async fn presence(
    State(state): State<SharedState>,
    Path(room_id): Path<String>,
) -> Result<Json<PresenceResponse>, AppError> {
    let check = presence_service::check_host_presence(&state, &room_id).await?;
    Ok(Json(check.into()))
}

/// Promote a new host if the current one went silent.
#[utoipa::path(
    post,
    path = "/rooms/{id}/host/recover",
    tag = "presence",
    params(
        ("Authorization" = String, Header, description = "Bearer token of a participant"),
        ("id" = String, Path, description = "Room code")
    ),
    responses((status = 200, description = "Host after recovery", body = RecoveryResponse))
)]
pub async fn recover_host(
    State(state): State<SharedState>,
    Extension(_caller): Extension<CallerIdentity>,
    Path(room_id): Path<String>,
) -> Result<Json<RecoveryResponse>, AppError> {
    let recovery = presence_service::recover_if_host_absent(&state, &room_id).await?;
    Ok(Json(recovery.into()))
}
