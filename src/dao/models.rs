use std::{collections::BTreeMap, time::SystemTime};

use serde::{Deserialize, Serialize};

/// Kind of question; only affects how clients render the options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKindEntity {
    #[default]
    MultipleChoice,
    TrueFalse,
}

/// One question of a room quiz, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    #[serde(default)]
    pub kind: QuestionKindEntity,
}

/// Room document stored at `rooms/{room_id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEntity {
    /// Short join code, also the document id.
    pub room_id: String,
    pub title: String,
    /// Whether discovery lists this room.
    pub public: bool,
    pub host_id: String,
    #[serde(default)]
    pub previous_host_id: Option<String>,
    #[serde(default)]
    pub host_transferred_at: Option<SystemTime>,
    pub started: bool,
    pub finished: bool,
    /// `-1` while waiting, otherwise an index into `quiz`.
    pub current_question: i32,
    pub quiz: Vec<QuestionEntity>,
    /// Countdown length every client derives from `question_start_time`.
    pub question_duration_ms: u64,
    #[serde(default)]
    pub question_start_time: Option<SystemTime>,
    pub host_last_seen: SystemTime,
    pub created_at: SystemTime,
    #[serde(default)]
    pub started_at: Option<SystemTime>,
    #[serde(default)]
    pub finished_at: Option<SystemTime>,
}

/// Accepted answer of one player to one question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerEntity {
    pub question_index: u32,
    pub answer_index: usize,
    pub correct: bool,
    pub points: u32,
    /// Client-generated idempotency key of the submission that created this record.
    pub submission_id: String,
    pub submitted_at: SystemTime,
}

/// Player document stored at `rooms/{room_id}/players/{user_id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    pub user_id: String,
    pub name: String,
    pub score: u32,
    pub joined_at: SystemTime,
    /// Answer records keyed by question index; at most one per question.
    #[serde(default)]
    pub answers: BTreeMap<u32, AnswerEntity>,
}
