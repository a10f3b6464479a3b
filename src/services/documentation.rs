use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the Arena room API.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rooms::create_room,
        crate::routes::rooms::list_rooms,
        crate::routes::rooms::generate_code,
        crate::routes::rooms::get_room,
        crate::routes::rooms::joinable,
        crate::routes::rooms::start_quiz,
        crate::routes::rooms::advance_question,
        crate::routes::rooms::finish_quiz,
        crate::routes::rooms::join_room,
        crate::routes::rooms::list_players,
        crate::routes::rooms::leave_room,
        crate::routes::rooms::leaderboard,
        crate::routes::rooms::submit_answer,
        crate::routes::rooms::heartbeat,
        crate::routes::rooms::presence,
        crate::routes::rooms::recover_host,
        crate::routes::sse::room_events,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::dto::health::HealthResponse,
            crate::dto::room::CreateRoomRequest,
            crate::dto::room::QuestionInput,
            crate::dto::room::QuestionKindDto,
            crate::dto::room::RoomPhaseDto,
            crate::dto::room::QuestionView,
            crate::dto::room::RoomView,
            crate::dto::room::RoomSummary,
            crate::dto::room::RoomCodeResponse,
            crate::dto::room::JoinableResponse,
            crate::dto::player::JoinRoomRequest,
            crate::dto::player::PlayerView,
            crate::dto::player::LeaveResponse,
            crate::dto::player::LeaderboardEntryView,
            crate::dto::submission::SubmitAnswerRequest,
            crate::dto::submission::SubmissionStatusDto,
            crate::dto::submission::SubmissionResponse,
            crate::dto::presence::HostPresenceDto,
            crate::dto::presence::PresenceResponse,
            crate::dto::presence::RecoveryOutcomeDto,
            crate::dto::presence::RecoveryResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::RoomClosedEvent,
            crate::dto::sse::FeedFailedEvent,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Room creation and discovery"),
        (name = "lifecycle", description = "Host-only quiz progression"),
        (name = "players", description = "Roster and leaderboard"),
        (name = "answers", description = "Idempotent answer submission"),
        (name = "presence", description = "Host heartbeat and migration"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
