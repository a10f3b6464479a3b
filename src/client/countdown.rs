use std::time::{Duration, SystemTime};

use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::{
    client::submission::{AnswerSubmitter, SubmitError},
    dto::room::{RoomPhaseDto, RoomView},
    services::submission_service::SubmissionOutcome,
};

/// Countdown of one question, anchored on the server-written start time so every client
/// expires at the same instant regardless of when it loaded the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    pub question_index: u32,
    pub started_at: SystemTime,
    pub duration: Duration,
}

/// What happened when the countdown reached zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expiry {
    /// The selected option was sent on the participant's behalf.
    AutoSubmitted(SubmissionOutcome),
    /// An answer had already been recorded.
    AlreadyAnswered,
    /// A manual submission was still pending; it decides the outcome.
    Pending,
    /// Nothing selected, nothing sent.
    NoSelection,
    /// The room moved to another question before this one expired.
    Superseded,
}

impl Countdown {
    pub fn new(question_index: u32, started_at: SystemTime, duration: Duration) -> Self {
        Self {
            question_index,
            started_at,
            duration,
        }
    }

    /// Countdown of the question open on `room`, if any.
    pub fn from_room(room: &RoomView) -> Option<Self> {
        if room.phase != RoomPhaseDto::Live {
            return None;
        }
        let question_index = room
            .active_question
            .as_ref()
            .and_then(|question| u32::try_from(question.index).ok())?;
        let started_at = room
            .question_start_time
            .as_deref()
            .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok())
            .map(SystemTime::from)?;
        Some(Self::new(
            question_index,
            started_at,
            Duration::from_millis(room.question_duration_ms),
        ))
    }

    pub fn deadline(&self) -> SystemTime {
        self.started_at + self.duration
    }

    /// Time left at `now`, zero once expired. A start time in the future (clock skew)
    /// never yields more than the full duration.
    pub fn remaining_at(&self, now: SystemTime) -> Duration {
        match self.deadline().duration_since(now) {
            Ok(left) => left.min(self.duration),
            Err(_) => Duration::ZERO,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.remaining_at(SystemTime::now())
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.remaining_at(now).is_zero()
    }
}

/// Wait for the countdown to reach zero, then auto-submit the selected option if it was
/// never sent.
pub async fn run_until_expiry(
    submitter: &AnswerSubmitter,
    countdown: Countdown,
) -> Result<Expiry, SubmitError> {
    let left = countdown.remaining();
    debug!(question = countdown.question_index, left = ?left, "countdown running");
    sleep(left).await;

    let Some(slot) = submitter.snapshot().await else {
        return Ok(Expiry::Superseded);
    };
    if slot.question_index != countdown.question_index {
        return Ok(Expiry::Superseded);
    }
    if slot.outcome.is_some() {
        return Ok(Expiry::AlreadyAnswered);
    }
    if slot.selected.is_none() {
        debug!(question = countdown.question_index, "countdown expired without a selection");
        return Ok(Expiry::NoSelection);
    }

    info!(room_id = %slot.room_id, question = countdown.question_index, "countdown expired; auto-submitting");
    match submitter.submit().await {
        Ok(outcome) => Ok(Expiry::AutoSubmitted(outcome)),
        Err(SubmitError::InFlight) => Ok(Expiry::Pending),
        Err(SubmitError::AlreadyAnswered { .. }) => Ok(Expiry::AlreadyAnswered),
        Err(SubmitError::NoSelection) => Ok(Expiry::NoSelection),
        Err(err) => Err(err),
    }
}
