use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    dto::format_system_time,
    services::lifecycle_service::NewRoom,
    state::{
        room::{Question, QuestionKind, Room},
        state_machine::RoomPhase,
    },
};

/// How clients should render a question.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKindDto {
    #[default]
    MultipleChoice,
    TrueFalse,
}

/// Question supplied by the host when creating a room.
#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
pub struct QuestionInput {
    #[validate(length(min = 1, max = 500))]
    pub question: String,
    #[validate(length(min = 2, max = 10))]
    pub options: Vec<String>,
    pub correct_index: usize,
    #[serde(default)]
    pub kind: QuestionKindDto,
}

/// Payload used to open a new room.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateRoomRequest {
    /// Room code to claim; a free one is generated when omitted.
    #[serde(default)]
    #[validate(length(min = 1, max = 32))]
    pub room_id: Option<String>,
    #[serde(default)]
    #[validate(length(max = 80))]
    pub title: String,
    /// Listed by discovery while waiting when true.
    #[serde(default)]
    pub public: bool,
    #[validate(length(min = 1, max = 40))]
    pub host_name: String,
    #[validate(length(min = 1), nested)]
    pub quiz: Vec<QuestionInput>,
    /// Countdown per question; the server default applies when omitted.
    #[serde(default)]
    #[validate(range(min = 1, max = 3600))]
    pub question_duration_secs: Option<u64>,
}

/// Optional precondition for advancing.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AdvanceQuery {
    /// Index the host believes is current; the call is a no-op once the room moved past it.
    pub expected_question: Option<u32>,
}

/// Lifecycle phase exposed to clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhaseDto {
    Waiting,
    Live,
    Finished,
}

/// Question as shown to players, without its answer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct QuestionView {
    pub index: usize,
    pub question: String,
    pub options: Vec<String>,
    pub kind: QuestionKindDto,
}

/// Full projection of a room document.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct RoomView {
    pub room_id: String,
    pub title: String,
    pub public: bool,
    pub host_id: String,
    pub previous_host_id: Option<String>,
    pub host_transferred_at: Option<String>,
    pub phase: RoomPhaseDto,
    /// `-1` while waiting.
    pub current_question: i32,
    pub question_count: usize,
    /// Present while a question is open.
    pub active_question: Option<QuestionView>,
    pub question_duration_ms: u64,
    /// Shared countdown origin; clients derive the remaining time from it.
    pub question_start_time: Option<String>,
    pub question_deadline: Option<String>,
    pub host_last_seen: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

/// Discovery listing entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct RoomSummary {
    pub room_id: String,
    pub title: String,
    pub host_id: String,
    pub question_count: usize,
    pub created_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoomCodeResponse {
    pub room_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct JoinableResponse {
    pub room_id: String,
    pub joinable: bool,
}

impl From<QuestionKindDto> for QuestionKind {
    fn from(value: QuestionKindDto) -> Self {
        match value {
            QuestionKindDto::MultipleChoice => QuestionKind::MultipleChoice,
            QuestionKindDto::TrueFalse => QuestionKind::TrueFalse,
        }
    }
}

impl From<QuestionKind> for QuestionKindDto {
    fn from(value: QuestionKind) -> Self {
        match value {
            QuestionKind::MultipleChoice => QuestionKindDto::MultipleChoice,
            QuestionKind::TrueFalse => QuestionKindDto::TrueFalse,
        }
    }
}

impl From<QuestionInput> for Question {
    fn from(value: QuestionInput) -> Self {
        Self {
            question: value.question,
            options: value.options,
            correct_index: value.correct_index,
            kind: value.kind.into(),
        }
    }
}

impl CreateRoomRequest {
    /// Turn the payload into a service request for the given room code.
    pub fn into_new_room(self, room_id: String) -> NewRoom {
        NewRoom {
            room_id,
            title: self.title,
            public: self.public,
            host_name: self.host_name,
            quiz: self.quiz.into_iter().map(Question::from).collect(),
            question_duration: self.question_duration_secs.map(Duration::from_secs),
        }
    }
}

impl From<RoomPhase> for RoomPhaseDto {
    fn from(value: RoomPhase) -> Self {
        match value {
            RoomPhase::Waiting => RoomPhaseDto::Waiting,
            RoomPhase::Live { .. } => RoomPhaseDto::Live,
            RoomPhase::Finished => RoomPhaseDto::Finished,
        }
    }
}

impl From<Room> for RoomView {
    fn from(room: Room) -> Self {
        let active_question = room.active_question().and_then(|index| {
            room.question(index).map(|question| QuestionView {
                index,
                question: question.question.clone(),
                options: question.options.clone(),
                kind: question.kind.into(),
            })
        });
        let question_deadline = room.question_deadline().map(format_system_time);

        Self {
            phase: room.phase().into(),
            question_count: room.quiz.len(),
            active_question,
            question_duration_ms: u64::try_from(room.question_duration.as_millis())
                .unwrap_or(u64::MAX),
            question_start_time: room.question_start_time.map(format_system_time),
            question_deadline,
            host_last_seen: format_system_time(room.host_last_seen),
            created_at: format_system_time(room.created_at),
            started_at: room.started_at.map(format_system_time),
            finished_at: room.finished_at.map(format_system_time),
            host_transferred_at: room.host_transferred_at.map(format_system_time),
            room_id: room.room_id,
            title: room.title,
            public: room.public,
            host_id: room.host_id,
            previous_host_id: room.previous_host_id,
            current_question: room.current_question,
        }
    }
}

impl From<Room> for RoomSummary {
    fn from(room: Room) -> Self {
        Self {
            question_count: room.quiz.len(),
            created_at: format_system_time(room.created_at),
            room_id: room.room_id,
            title: room.title,
            host_id: room.host_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    fn live_room() -> Room {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        Room {
            room_id: "QUIZ42".into(),
            title: "Friday".into(),
            public: true,
            host_id: "host".into(),
            previous_host_id: None,
            host_transferred_at: None,
            started: true,
            finished: false,
            current_question: 0,
            quiz: vec![Question {
                question: "2 + 2?".into(),
                options: vec!["3".into(), "4".into()],
                correct_index: 1,
                kind: QuestionKind::MultipleChoice,
            }],
            question_duration: Duration::from_secs(20),
            question_start_time: Some(start),
            host_last_seen: start,
            created_at: start,
            started_at: Some(start),
            finished_at: None,
        }
    }

    #[test]
    fn live_view_hides_the_answer_and_exposes_the_deadline() {
        let view = RoomView::from(live_room());
        assert_eq!(view.phase, RoomPhaseDto::Live);
        assert_eq!(view.question_duration_ms, 20_000);
        assert_eq!(
            view.question_deadline.as_deref(),
            Some("2023-11-14T22:13:40Z")
        );

        let json = serde_json::to_value(&view).unwrap();
        assert!(json["active_question"].get("correct_index").is_none());
        assert!(json.get("finished_at").is_none());
    }

    #[test]
    fn create_requests_validate_each_question() {
        let request: CreateRoomRequest = serde_json::from_value(serde_json::json!({
            "host_name": "Host",
            "quiz": [
                {"question": "2 + 2?", "options": ["3", "4"], "correct_index": 1},
                {"question": "Lonely?", "options": ["yes"], "correct_index": 0}
            ]
        }))
        .unwrap();

        let errors = request.validate().unwrap_err();
        assert!(errors.errors().contains_key("quiz"));
    }
}
