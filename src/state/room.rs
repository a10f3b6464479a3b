use std::{
    collections::BTreeMap,
    time::{Duration, SystemTime},
};

use crate::{
    dao::models::{AnswerEntity, PlayerEntity, QuestionEntity, QuestionKindEntity, RoomEntity},
    state::state_machine::RoomPhase,
};

/// How a question is presented to players.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    MultipleChoice,
    TrueFalse,
}

/// Immutable question supplied by the quiz content source at room creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub kind: QuestionKind,
}

/// Runtime view of a room document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub room_id: String,
    pub title: String,
    pub public: bool,
    pub host_id: String,
    pub previous_host_id: Option<String>,
    pub host_transferred_at: Option<SystemTime>,
    pub started: bool,
    pub finished: bool,
    pub current_question: i32,
    pub quiz: Vec<Question>,
    pub question_duration: Duration,
    pub question_start_time: Option<SystemTime>,
    pub host_last_seen: SystemTime,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
}

/// Answer accepted for one (player, question) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRecord {
    pub question_index: u32,
    pub answer_index: usize,
    pub correct: bool,
    pub points: u32,
    pub submission_id: String,
    pub submitted_at: SystemTime,
}

/// Roster entry of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub user_id: String,
    pub name: String,
    pub score: u32,
    pub joined_at: SystemTime,
    pub answers: BTreeMap<u32, AnswerRecord>,
}

/// Ranked leaderboard line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    /// 1-based rank; tied scores share a rank.
    pub rank: usize,
    pub user_id: String,
    pub name: String,
    pub score: u32,
}

impl Room {
    pub fn phase(&self) -> RoomPhase {
        RoomPhase::from_flags(self.started, self.finished, self.current_question)
    }

    /// Index of the question currently open for answers.
    pub fn active_question(&self) -> Option<usize> {
        match self.phase() {
            RoomPhase::Live { question } => Some(question),
            _ => None,
        }
    }

    pub fn question(&self, index: usize) -> Option<&Question> {
        self.quiz.get(index)
    }

    /// Moment the shared countdown of the active question reaches zero.
    pub fn question_deadline(&self) -> Option<SystemTime> {
        self.active_question()?;
        self.question_start_time
            .map(|start| start + self.question_duration)
    }

    /// How long the host has been silent as of `now`.
    pub fn host_silence(&self, now: SystemTime) -> Duration {
        now.duration_since(self.host_last_seen)
            .unwrap_or(Duration::ZERO)
    }

    /// Joinable rooms exist and have not finished.
    pub fn is_joinable(&self) -> bool {
        !self.finished
    }
}

impl Player {
    pub fn has_answered(&self, question_index: u32) -> bool {
        self.answers.contains_key(&question_index)
    }
}

/// Sort players by score, highest first, keeping roster order among equal scores.
pub fn leaderboard(players: Vec<Player>) -> Vec<LeaderboardEntry> {
    let mut players = players;
    players.sort_by(|a, b| b.score.cmp(&a.score));

    let mut entries: Vec<LeaderboardEntry> = Vec::with_capacity(players.len());
    for (position, player) in players.into_iter().enumerate() {
        let rank = match entries.last() {
            Some(previous) if previous.score == player.score => previous.rank,
            _ => position + 1,
        };
        entries.push(LeaderboardEntry {
            rank,
            user_id: player.user_id,
            name: player.name,
            score: player.score,
        });
    }
    entries
}

impl From<QuestionKindEntity> for QuestionKind {
    fn from(value: QuestionKindEntity) -> Self {
        match value {
            QuestionKindEntity::MultipleChoice => QuestionKind::MultipleChoice,
            QuestionKindEntity::TrueFalse => QuestionKind::TrueFalse,
        }
    }
}

impl From<QuestionKind> for QuestionKindEntity {
    fn from(value: QuestionKind) -> Self {
        match value {
            QuestionKind::MultipleChoice => QuestionKindEntity::MultipleChoice,
            QuestionKind::TrueFalse => QuestionKindEntity::TrueFalse,
        }
    }
}

impl From<QuestionEntity> for Question {
    fn from(value: QuestionEntity) -> Self {
        Self {
            question: value.question,
            options: value.options,
            correct_index: value.correct_index,
            kind: value.kind.into(),
        }
    }
}

impl From<Question> for QuestionEntity {
    fn from(value: Question) -> Self {
        Self {
            question: value.question,
            options: value.options,
            correct_index: value.correct_index,
            kind: value.kind.into(),
        }
    }
}

impl From<RoomEntity> for Room {
    fn from(value: RoomEntity) -> Self {
        Self {
            room_id: value.room_id,
            title: value.title,
            public: value.public,
            host_id: value.host_id,
            previous_host_id: value.previous_host_id,
            host_transferred_at: value.host_transferred_at,
            started: value.started,
            finished: value.finished,
            current_question: value.current_question,
            quiz: value.quiz.into_iter().map(Into::into).collect(),
            question_duration: Duration::from_millis(value.question_duration_ms),
            question_start_time: value.question_start_time,
            host_last_seen: value.host_last_seen,
            created_at: value.created_at,
            started_at: value.started_at,
            finished_at: value.finished_at,
        }
    }
}

impl From<Room> for RoomEntity {
    fn from(value: Room) -> Self {
        Self {
            room_id: value.room_id,
            title: value.title,
            public: value.public,
            host_id: value.host_id,
            previous_host_id: value.previous_host_id,
            host_transferred_at: value.host_transferred_at,
            started: value.started,
            finished: value.finished,
            current_question: value.current_question,
            quiz: value.quiz.into_iter().map(Into::into).collect(),
            question_duration_ms: u64::try_from(value.question_duration.as_millis())
                .unwrap_or(u64::MAX),
            question_start_time: value.question_start_time,
            host_last_seen: value.host_last_seen,
            created_at: value.created_at,
            started_at: value.started_at,
            finished_at: value.finished_at,
        }
    }
}

impl From<AnswerEntity> for AnswerRecord {
    fn from(value: AnswerEntity) -> Self {
        Self {
            question_index: value.question_index,
            answer_index: value.answer_index,
            correct: value.correct,
            points: value.points,
            submission_id: value.submission_id,
            submitted_at: value.submitted_at,
        }
    }
}

impl From<AnswerRecord> for AnswerEntity {
    fn from(value: AnswerRecord) -> Self {
        Self {
            question_index: value.question_index,
            answer_index: value.answer_index,
            correct: value.correct,
            points: value.points,
            submission_id: value.submission_id,
            submitted_at: value.submitted_at,
        }
    }
}

impl From<PlayerEntity> for Player {
    fn from(value: PlayerEntity) -> Self {
        Self {
            user_id: value.user_id,
            name: value.name,
            score: value.score,
            joined_at: value.joined_at,
            answers: value
                .answers
                .into_iter()
                .map(|(index, answer)| (index, answer.into()))
                .collect(),
        }
    }
}

impl From<Player> for PlayerEntity {
    fn from(value: Player) -> Self {
        Self {
            user_id: value.user_id,
            name: value.name,
            score: value.score,
            joined_at: value.joined_at,
            answers: value
                .answers
                .into_iter()
                .map(|(index, answer)| (index, answer.into()))
                .collect(),
        }
    }
}
