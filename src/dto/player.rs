use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::format_system_time,
    state::room::{LeaderboardEntry, Player},
};

/// Payload used to join (or rejoin) a room.
#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct JoinRoomRequest {
    #[validate(length(min = 1, max = 40))]
    pub name: String,
}

/// Roster entry returned after joining.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct PlayerView {
    pub user_id: String,
    pub name: String,
    pub score: u32,
    pub joined_at: String,
    /// Question indices this player already answered.
    pub answered: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LeaveResponse {
    /// False when the caller was not on the roster.
    pub removed: bool,
}

/// Ranked leaderboard line; tied scores share a rank.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct LeaderboardEntryView {
    pub rank: usize,
    pub user_id: String,
    pub name: String,
    pub score: u32,
}

impl From<Player> for PlayerView {
    fn from(player: Player) -> Self {
        Self {
            answered: player.answers.keys().copied().collect(),
            joined_at: format_system_time(player.joined_at),
            user_id: player.user_id,
            name: player.name,
            score: player.score,
        }
    }
}

impl From<LeaderboardEntry> for LeaderboardEntryView {
    fn from(entry: LeaderboardEntry) -> Self {
        Self {
            rank: entry.rank,
            user_id: entry.user_id,
            name: entry.name,
            score: entry.score,
        }
    }
}
