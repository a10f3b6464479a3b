use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, state::state_machine::InvalidTransition};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Caller could not be identified from the presented token.
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),
    /// Caller is not the current host of the room.
    #[error("only the host of room `{room_id}` may do this")]
    NotHost { room_id: String },
    /// The host is no longer on the room roster.
    #[error("host of room `{room_id}` has left the roster")]
    HostNotInRoster { room_id: String },
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The quiz was already started.
    #[error("room `{room_id}` has already started")]
    AlreadyStarted { room_id: String },
    /// Not enough players on the roster to start.
    #[error("room needs at least {required} player(s), has {actual}")]
    BelowMinimumPlayers { required: usize, actual: usize },
    /// The roster is full.
    #[error("room is full ({capacity} players)")]
    RoomFull { capacity: usize },
    /// Another room already uses this code.
    #[error("room code `{0}` is already taken")]
    RoomIdCollision(String),
    /// Submission targets a question that is no longer current.
    #[error("question {submitted} is no longer active (current is {current})")]
    StaleQuestion { submitted: u32, current: i32 },
    /// Compare-and-set retries were exhausted by concurrent writers.
    #[error("concurrent update on `{0}`; retry")]
    Conflict(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Timeout(_) => ServiceError::Timeout,
            StorageError::Conflict(path) => ServiceError::Conflict(path),
            StorageError::NotFound(path) => ServiceError::NotFound(path),
            other => ServiceError::Unavailable(other),
        }
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

impl ServiceError {
    /// Stable machine-readable code carried in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Unavailable(_) | ServiceError::Degraded => "unavailable",
            ServiceError::NotAuthenticated(_) => "not_authenticated",
            ServiceError::NotHost { .. } => "not_host",
            ServiceError::HostNotInRoster { .. } => "host_only",
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::InvalidState(_) => "invalid_state",
            ServiceError::AlreadyStarted { .. } => "already_started",
            ServiceError::BelowMinimumPlayers { .. } => "below_minimum_players",
            ServiceError::RoomFull { .. } => "room_full",
            ServiceError::RoomIdCollision(_) => "room_id_collision",
            ServiceError::StaleQuestion { .. } => "stale_question",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Timeout => "timeout",
        }
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Missing or invalid credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Authenticated but not allowed.
    #[error("forbidden: {message}")]
    Forbidden { code: &'static str, message: String },
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {message}")]
    Conflict { code: &'static str, message: String },
    /// A gameplay precondition does not hold.
    #[error("precondition failed: {message}")]
    PreconditionFailed { code: &'static str, message: String },
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let code = err.code();
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
            ServiceError::NotAuthenticated(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            other @ (ServiceError::NotHost { .. } | ServiceError::HostNotInRoster { .. }) => {
                AppError::Forbidden {
                    code,
                    message: other.to_string(),
                }
            }
            other @ (ServiceError::BelowMinimumPlayers { .. } | ServiceError::RoomFull { .. }) => {
                AppError::PreconditionFailed {
                    code,
                    message: other.to_string(),
                }
            }
            other => AppError::Conflict {
                code,
                message: other.to_string(),
            },
        }
    }
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "invalid_input",
            AppError::Unauthorized(_) => "not_authenticated",
            AppError::Forbidden { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::PreconditionFailed { code, .. } => code,
            AppError::NotFound(_) => "not_found",
            AppError::ServiceUnavailable(_) => "unavailable",
            AppError::Internal(_) => "internal",
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error kind (e.g. `stale_question`).
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ServiceError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn authority_errors_are_forbidden() {
        assert_eq!(
            status_of(ServiceError::NotHost {
                room_id: "ABC".into()
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(ServiceError::NotAuthenticated("bad token".into())),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn lifecycle_conflicts_keep_their_code() {
        let err = AppError::from(ServiceError::StaleQuestion {
            submitted: 0,
            current: 1,
        });
        assert_eq!(err.code(), "stale_question");
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
        assert_eq!(
            status_of(ServiceError::BelowMinimumPlayers {
                required: 1,
                actual: 0
            }),
            StatusCode::PRECONDITION_FAILED
        );
    }
}
