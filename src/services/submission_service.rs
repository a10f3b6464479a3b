//! Server-side half of answer submission: authoritative scoring, exactly once per
//! (player, question).
//!
//! The answer record and the score increment live on the player document and are written
//! together in one compare-and-set, so a retried submission can never score twice.

use std::time::SystemTime;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    dao::{
        document_store::paths,
        models::AnswerEntity,
        rooms,
        storage::StorageError,
    },
    error::ServiceError,
    services::{
        auth::CallerIdentity, discovery_service::normalize_room_code,
        lifecycle_service::room_not_found,
    },
    state::{
        SharedState,
        room::{AnswerRecord, Player, Room},
    },
};

const MAX_SUBMISSION_ID_LENGTH: usize = 128;

/// One answer as sent by a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerSubmission {
    pub room_id: String,
    /// Question the participant saw when answering.
    pub question_index: u32,
    pub answer_index: usize,
    /// Client-generated idempotency key.
    pub submission_id: String,
}

/// Whether this call recorded the answer or found an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Accepted,
    AlreadySubmitted,
}

/// Scoring result returned to the participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub status: SubmissionStatus,
    pub correct: bool,
    pub points_awarded: u32,
    pub correct_index: usize,
    /// Player score after this submission.
    pub score: u32,
}

/// Verify the caller token, then score the answer.
pub async fn submit_answer(
    state: &SharedState,
    token: &str,
    submission: AnswerSubmission,
) -> Result<SubmissionOutcome, ServiceError> {
    let caller = state.verifier().verify(token).await?;
    submit_answer_as(state, &caller, submission).await
}

/// Score an answer for an already verified caller.
pub async fn submit_answer_as(
    state: &SharedState,
    caller: &CallerIdentity,
    submission: AnswerSubmission,
) -> Result<SubmissionOutcome, ServiceError> {
    let room_id = normalize_room_code(&submission.room_id)?;
    let submission_id = submission.submission_id.trim().to_string();
    if submission_id.is_empty() || submission_id.len() > MAX_SUBMISSION_ID_LENGTH {
        return Err(ServiceError::InvalidInput(format!(
            "submission id must be 1 to {MAX_SUBMISSION_ID_LENGTH} characters"
        )));
    }

    let repository = state.rooms().await?;
    let question_index = submission.question_index;
    let attempts = state.config().write_attempts;

    for attempt in 1..=attempts {
        let Some(stored_room) = repository.find_room(&room_id).await? else {
            return Err(room_not_found(&room_id));
        };
        let room = Room::from(stored_room.value);

        let active = room
            .active_question()
            .filter(|active| u32::try_from(*active).is_ok_and(|active| active == question_index));
        let Some(active) = active else {
            debug!(
                room_id = %room_id,
                user_id = %caller.uid,
                submitted = question_index,
                current = room.current_question,
                "stale submission rejected"
            );
            return Err(ServiceError::StaleQuestion {
                submitted: question_index,
                current: room.current_question,
            });
        };
        let Some(question) = room.question(active) else {
            return Err(ServiceError::InvalidState(format!(
                "room `{room_id}` has no question {active}"
            )));
        };
        if submission.answer_index >= question.options.len() {
            return Err(ServiceError::InvalidInput(format!(
                "answer {} is not one of the {} options",
                submission.answer_index,
                question.options.len()
            )));
        }

        let Some(stored_player) = repository.find_player(&room_id, &caller.uid).await? else {
            return Err(ServiceError::NotFound(format!(
                "player `{}` is not in room `{room_id}`",
                caller.uid
            )));
        };
        let player = Player::from(stored_player.value.clone());

        if let Some(existing) = player.answers.get(&question_index) {
            debug!(
                room_id = %room_id,
                user_id = %caller.uid,
                question = question_index,
                submission_id = %submission_id,
                original_submission_id = %existing.submission_id,
                "duplicate submission absorbed"
            );
            return Ok(SubmissionOutcome {
                status: SubmissionStatus::AlreadySubmitted,
                correct: existing.correct,
                points_awarded: existing.points,
                correct_index: question.correct_index,
                score: player.score,
            });
        }

        let correct = submission.answer_index == question.correct_index;
        let points = if correct {
            state.config().points_per_correct
        } else {
            0
        };
        let record = AnswerRecord {
            question_index,
            answer_index: submission.answer_index,
            correct,
            points,
            submission_id: submission_id.clone(),
            submitted_at: SystemTime::now(),
        };
        let score = player.score.saturating_add(points);

        let mut answers = stored_player.value.answers;
        answers.insert(question_index, AnswerEntity::from(record));
        let answers = serde_json::to_value(&answers).map_err(|source| StorageError::Malformed {
            path: paths::player_path(&room_id, &caller.uid),
            source,
        })?;
        let patch = rooms::patch(json!({
            "answers": answers,
            "score": score,
        }));

        match repository
            .update_player(&room_id, &caller.uid, patch, Some(stored_player.revision))
            .await
        {
            Ok(_) => {
                info!(
                    room_id = %room_id,
                    user_id = %caller.uid,
                    question = question_index,
                    correct,
                    points,
                    score,
                    "answer scored"
                );
                return Ok(SubmissionOutcome {
                    status: SubmissionStatus::Accepted,
                    correct,
                    points_awarded: points,
                    correct_index: question.correct_index,
                    score,
                });
            }
            // Another write landed first; the next read decides again, duplicates included.
            Err(StorageError::Conflict(_)) => {
                warn!(room_id = %room_id, user_id = %caller.uid, attempt, "player changed while scoring; re-reading");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::Conflict(paths::player_path(&room_id, &caller.uid)))
}
