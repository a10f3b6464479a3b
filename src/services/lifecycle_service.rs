//! Host-only room lifecycle: create, start, advance, finish.
//!
//! Every mutation re-reads the room and writes with the revision it read, retrying on
//! conflicts. Each transition touches the room document only.

use std::time::{Duration, SystemTime};

use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::{
    dao::{
        document_store::{FeedEvent, FeedTarget, paths},
        models::RoomEntity,
        rooms::{self, RoomRepository},
        storage::StorageError,
    },
    error::ServiceError,
    services::{
        auth::CallerIdentity,
        change_feed::{ChangeFeed, RetryPolicy},
        discovery_service::normalize_room_code,
        presence_service, session_service,
    },
    state::{
        SharedState,
        room::{Question, Room},
        state_machine::{RoomEvent, RoomPhase},
    },
};

const MAX_TITLE_LENGTH: usize = 80;
const MIN_OPTIONS: usize = 2;

/// Everything needed to open a new room.
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub room_id: String,
    pub title: String,
    pub public: bool,
    pub host_name: String,
    pub quiz: Vec<Question>,
    /// Falls back to the configured duration when absent.
    pub question_duration: Option<Duration>,
}

/// Outcome of planning a write against a freshly read room.
pub(crate) enum RoomWrite {
    /// Nothing to change; the read state is the answer.
    Keep,
    Patch(Map<String, Value>),
}

/// Create a waiting room and join its host as the first player.
pub async fn create_room(
    state: &SharedState,
    host: &CallerIdentity,
    request: NewRoom,
) -> Result<Room, ServiceError> {
    let room_id = normalize_room_code(&request.room_id)?;
    validate_quiz(&request.quiz)?;
    let host_name = session_service::normalize_player_name(&request.host_name)?;
    let title = request.title.trim().to_string();
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(ServiceError::InvalidInput(format!(
            "title must be at most {MAX_TITLE_LENGTH} characters"
        )));
    }

    let now = SystemTime::now();
    let question_duration = request
        .question_duration
        .unwrap_or_else(|| state.config().question_duration());
    if question_duration.is_zero() {
        return Err(ServiceError::InvalidInput(
            "question duration must be positive".into(),
        ));
    }

    let room = Room {
        room_id: room_id.clone(),
        title,
        public: request.public,
        host_id: host.uid.clone(),
        previous_host_id: None,
        host_transferred_at: None,
        started: false,
        finished: false,
        current_question: -1,
        quiz: request.quiz,
        question_duration,
        question_start_time: None,
        host_last_seen: now,
        created_at: now,
        started_at: None,
        finished_at: None,
    };

    let repository = state.rooms().await?;
    match repository.create_room(&room.clone().into()).await {
        Ok(_) => {}
        Err(StorageError::AlreadyExists(_)) => {
            return Err(ServiceError::RoomIdCollision(room_id));
        }
        Err(err) => return Err(err.into()),
    }
    info!(room_id = %room_id, host_id = %host.uid, questions = room.quiz.len(), "room created");

    if let Err(err) = session_service::join_room(state, &room_id, host, &host_name).await {
        warn!(room_id = %room_id, error = %err, "host could not join the room it created");
        return Err(err);
    }

    Ok(room)
}

/// Leave the lobby and open the first question.
pub async fn start_quiz(
    state: &SharedState,
    room_id: &str,
    caller: &CallerIdentity,
) -> Result<Room, ServiceError> {
    let room_id = normalize_room_code(room_id)?;
    let repository = state.rooms().await?;
    let min_players = state.config().min_players.max(1);

    // The roster lives in other documents; it is read once, outside the room write.
    let roster = repository.list_players(&room_id).await?;

    let room = mutate_room(state, &repository, &room_id, |room| {
        ensure_host(room, caller)?;
        if room.phase() != RoomPhase::Waiting {
            return Err(ServiceError::AlreadyStarted {
                room_id: room.room_id.clone(),
            });
        }
        if roster.len() < min_players {
            return Err(ServiceError::BelowMinimumPlayers {
                required: min_players,
                actual: roster.len(),
            });
        }
        if !roster.iter().any(|player| player.user_id == room.host_id) {
            return Err(ServiceError::HostNotInRoster {
                room_id: room.room_id.clone(),
            });
        }

        room.phase().apply(RoomEvent::Start)?;
        let now = SystemTime::now();
        Ok(RoomWrite::Patch(rooms::patch(json!({
            "started": true,
            "current_question": 0,
            "started_at": now,
            "question_start_time": now,
            "host_last_seen": now,
        }))))
    })
    .await?;

    info!(room_id = %room_id, "quiz started");
    Ok(room)
}

/// Open the next question, finishing the quiz after the last one.
///
/// When `expected_question` is given and the room already moved past it, the call is a no-op.
/// A retry after losing a race to another advance never increments twice.
pub async fn advance_question(
    state: &SharedState,
    room_id: &str,
    caller: &CallerIdentity,
    expected_question: Option<u32>,
) -> Result<Room, ServiceError> {
    let room_id = normalize_room_code(room_id)?;
    let repository = state.rooms().await?;
    let mut observed: Option<i32> = None;

    let room = mutate_room(state, &repository, &room_id, |room| {
        ensure_host(room, caller)?;
        if let Some(seen) = observed
            && (room.finished || room.current_question != seen)
        {
            return Ok(RoomWrite::Keep);
        }
        if let Some(expected) = expected_question {
            let expected = i64::from(expected);
            let current = i64::from(room.current_question);
            if room.finished || current > expected {
                return Ok(RoomWrite::Keep);
            }
            if current < expected {
                return Err(ServiceError::InvalidState(format!(
                    "room is on question {current}, not {expected}"
                )));
            }
        }
        observed = Some(room.current_question);

        let next = room.phase().apply(RoomEvent::Advance {
            question_count: room.quiz.len(),
        })?;
        let now = SystemTime::now();
        let patch = match next {
            RoomPhase::Live { question } => json!({
                "current_question": question,
                "question_start_time": now,
                "host_last_seen": now,
            }),
            _ => finish_patch(now),
        };
        Ok(RoomWrite::Patch(rooms::patch(patch)))
    })
    .await?;

    if room.finished {
        info!(room_id = %room_id, "last question closed; quiz finished");
    } else {
        info!(room_id = %room_id, question = room.current_question, "question opened");
    }
    Ok(room)
}

/// End the quiz. Finishing a finished room is a no-op.
pub async fn finish_quiz(
    state: &SharedState,
    room_id: &str,
    caller: &CallerIdentity,
) -> Result<Room, ServiceError> {
    let room_id = normalize_room_code(room_id)?;
    let repository = state.rooms().await?;

    let room = mutate_room(state, &repository, &room_id, |room| {
        ensure_host(room, caller)?;
        if room.finished {
            return Ok(RoomWrite::Keep);
        }
        room.phase().apply(RoomEvent::Finish)?;
        Ok(RoomWrite::Patch(rooms::patch(finish_patch(SystemTime::now()))))
    })
    .await?;

    info!(room_id = %room_id, "quiz finished");
    Ok(room)
}

/// Read a room. Reads made by the current host double as its heartbeat.
pub async fn get_room(
    state: &SharedState,
    room_id: &str,
    caller: Option<&CallerIdentity>,
) -> Result<Room, ServiceError> {
    let room_id = normalize_room_code(room_id)?;
    let repository = state.rooms().await?;
    let Some(stored) = repository.find_room(&room_id).await? else {
        return Err(room_not_found(&room_id));
    };

    match caller {
        Some(caller) if caller.uid == stored.value.host_id => {
            Ok(presence_service::heartbeat_if_due(state, &repository, stored).await)
        }
        _ => Ok(stored.value.into()),
    }
}

/// Push the room to `on_update` every time it changes, `None` once it is gone.
///
/// The returned feed stops when dropped.
pub async fn listen_to_room<F>(
    state: &SharedState,
    room_id: &str,
    on_update: F,
) -> Result<ChangeFeed, ServiceError>
where
    F: Fn(Option<Room>) + Send + Sync + 'static,
{
    let room_id = normalize_room_code(room_id)?;
    let store = state.require_document_store().await?;
    let target = FeedTarget::Document(paths::room_path(&room_id));

    Ok(ChangeFeed::spawn(
        store,
        target,
        RetryPolicy::from(&state.config().feed),
        move |event| {
            let FeedEvent::Document { path, document } = event else {
                return;
            };
            match document.map(rooms::decode::<RoomEntity>).transpose() {
                Ok(room) => on_update(room.map(|stored| Room::from(stored.value))),
                Err(err) => warn!(path = %path, error = %err, "ignoring malformed room snapshot"),
            }
        },
    ))
}

/// Read, plan and compare-and-set a room until the write lands or attempts run out.
///
/// `plan` runs on every fresh read and may return [`RoomWrite::Keep`] to answer with the
/// state it saw.
pub(crate) async fn mutate_room<P>(
    state: &SharedState,
    repository: &RoomRepository,
    room_id: &str,
    mut plan: P,
) -> Result<Room, ServiceError>
where
    P: FnMut(&Room) -> Result<RoomWrite, ServiceError>,
{
    let attempts = state.config().write_attempts;
    let path = paths::room_path(room_id);

    for attempt in 1..=attempts {
        let Some(stored) = repository.find_room(room_id).await? else {
            return Err(room_not_found(room_id));
        };
        let room = Room::from(stored.value.clone());

        let patch = match plan(&room)? {
            RoomWrite::Keep => return Ok(room),
            RoomWrite::Patch(patch) => patch,
        };

        match repository
            .update_room(room_id, patch.clone(), Some(stored.revision))
            .await
        {
            Ok(_) => {
                let updated: RoomEntity = rooms::patched(&path, &stored.value, &patch)?;
                return Ok(updated.into());
            }
            Err(StorageError::Conflict(_)) => {
                warn!(room_id = %room_id, attempt, "room changed concurrently; re-reading");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::Conflict(path))
}

pub(crate) fn ensure_host(room: &Room, caller: &CallerIdentity) -> Result<(), ServiceError> {
    if room.host_id != caller.uid {
        return Err(ServiceError::NotHost {
            room_id: room.room_id.clone(),
        });
    }
    Ok(())
}

pub(crate) fn room_not_found(room_id: &str) -> ServiceError {
    ServiceError::NotFound(format!("room `{room_id}` not found"))
}

fn finish_patch(now: SystemTime) -> Value {
    json!({
        "finished": true,
        "finished_at": now,
        "host_last_seen": now,
    })
}

fn validate_quiz(quiz: &[Question]) -> Result<(), ServiceError> {
    if quiz.is_empty() {
        return Err(ServiceError::InvalidInput(
            "a quiz requires at least one question".into(),
        ));
    }
    if i32::try_from(quiz.len()).is_err() {
        return Err(ServiceError::InvalidInput("quiz is too long".into()));
    }
    for (index, question) in quiz.iter().enumerate() {
        if question.question.trim().is_empty() {
            return Err(ServiceError::InvalidInput(format!(
                "question {index} has no text"
            )));
        }
        if question.options.len() < MIN_OPTIONS {
            return Err(ServiceError::InvalidInput(format!(
                "question {index} needs at least {MIN_OPTIONS} options"
            )));
        }
        if question.correct_index >= question.options.len() {
            return Err(ServiceError::InvalidInput(format!(
                "question {index} points at option {} of {}",
                question.correct_index,
                question.options.len()
            )));
        }
    }
    Ok(())
}
