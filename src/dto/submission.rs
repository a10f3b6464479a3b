use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::services::submission_service::{SubmissionOutcome, SubmissionStatus};

/// One answer to the currently open question.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate, PartialEq, Eq)]
pub struct SubmitAnswerRequest {
    /// Question index the participant saw when answering.
    pub question_index: u32,
    pub answer_index: usize,
    /// Client-generated idempotency key, reused on retries.
    #[validate(length(min = 1, max = 128))]
    pub submission_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatusDto {
    Accepted,
    AlreadySubmitted,
}

/// Scoring result. Also the body of the `409` returned for duplicates.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct SubmissionResponse {
    pub status: SubmissionStatusDto,
    pub correct: bool,
    pub points_awarded: u32,
    pub correct_index: usize,
    pub score: u32,
}

impl From<SubmissionStatus> for SubmissionStatusDto {
    fn from(value: SubmissionStatus) -> Self {
        match value {
            SubmissionStatus::Accepted => SubmissionStatusDto::Accepted,
            SubmissionStatus::AlreadySubmitted => SubmissionStatusDto::AlreadySubmitted,
        }
    }
}

impl From<SubmissionStatusDto> for SubmissionStatus {
    fn from(value: SubmissionStatusDto) -> Self {
        match value {
            SubmissionStatusDto::Accepted => SubmissionStatus::Accepted,
            SubmissionStatusDto::AlreadySubmitted => SubmissionStatus::AlreadySubmitted,
        }
    }
}

impl From<SubmissionOutcome> for SubmissionResponse {
    fn from(outcome: SubmissionOutcome) -> Self {
        Self {
            status: outcome.status.into(),
            correct: outcome.correct,
            points_awarded: outcome.points_awarded,
            correct_index: outcome.correct_index,
            score: outcome.score,
        }
    }
}

impl From<SubmissionResponse> for SubmissionOutcome {
    fn from(response: SubmissionResponse) -> Self {
        Self {
            status: response.status.into(),
            correct: response.correct,
            points_awarded: response.points_awarded,
            correct_index: response.correct_index,
            score: response.score,
        }
    }
}
