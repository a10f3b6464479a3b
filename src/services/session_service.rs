use std::{collections::BTreeMap, time::SystemTime};

use serde_json::json;
use tracing::{debug, info};

use crate::{
    dao::{
        document_store::{FeedEvent, FeedTarget, paths},
        models::PlayerEntity,
        rooms::{self, RoomRepository},
        storage::StorageError,
    },
    error::ServiceError,
    services::{
        auth::CallerIdentity,
        change_feed::{ChangeFeed, RetryPolicy},
        discovery_service::normalize_room_code,
        lifecycle_service::room_not_found,
    },
    state::{
        SharedState,
        room::{LeaderboardEntry, Player, Room, leaderboard},
    },
};

const MAX_NAME_LENGTH: usize = 40;

/// Add the caller to a room's roster, or rename them if they are already on it.
///
/// Rejoining never resets the score or the recorded answers.
pub async fn join_room(
    state: &SharedState,
    room_id: &str,
    caller: &CallerIdentity,
    user_name: &str,
) -> Result<Player, ServiceError> {
    let room_id = normalize_room_code(room_id)?;
    let name = normalize_player_name(user_name)?;
    let repository = state.rooms().await?;

    let Some(stored) = repository.find_room(&room_id).await? else {
        return Err(room_not_found(&room_id));
    };
    let room = Room::from(stored.value);
    if !room.is_joinable() {
        return Err(ServiceError::InvalidState(format!(
            "room `{room_id}` has finished"
        )));
    }

    if repository.find_player(&room_id, &caller.uid).await?.is_some() {
        return rename(&repository, &room_id, &caller.uid, &name).await;
    }

    let capacity = state.config().max_players;
    let roster = repository.list_players(&room_id).await?;
    if roster.len() >= capacity {
        return Err(ServiceError::RoomFull { capacity });
    }

    let player = PlayerEntity {
        user_id: caller.uid.clone(),
        name,
        score: 0,
        joined_at: SystemTime::now(),
        answers: BTreeMap::new(),
    };
    match repository.create_player(&room_id, &player).await {
        Ok(_) => {
            info!(room_id = %room_id, user_id = %caller.uid, "player joined");
            Ok(player.into())
        }
        // Lost a race against our own earlier join.
        Err(StorageError::AlreadyExists(_)) => {
            rename(&repository, &room_id, &caller.uid, &player.name).await
        }
        Err(err) => Err(err.into()),
    }
}

/// Remove the caller from the roster. Returns whether they were on it.
pub async fn leave_room(
    state: &SharedState,
    room_id: &str,
    caller: &CallerIdentity,
) -> Result<bool, ServiceError> {
    let room_id = normalize_room_code(room_id)?;
    let repository = state.rooms().await?;
    if repository.find_room(&room_id).await?.is_none() {
        return Err(room_not_found(&room_id));
    }

    let removed = repository.delete_player(&room_id, &caller.uid).await?;
    if removed {
        info!(room_id = %room_id, user_id = %caller.uid, "player left");
    } else {
        debug!(room_id = %room_id, user_id = %caller.uid, "leave for a player not on the roster");
    }
    Ok(removed)
}

/// Roster of a room.
pub async fn list_players(state: &SharedState, room_id: &str) -> Result<Vec<Player>, ServiceError> {
    let room_id = normalize_room_code(room_id)?;
    let repository = state.rooms().await?;
    if repository.find_room(&room_id).await?.is_none() {
        return Err(room_not_found(&room_id));
    }
    let players = repository.list_players(&room_id).await?;
    Ok(players.into_iter().map(Player::from).collect())
}

/// Players ranked by score, highest first; equal scores keep roster order.
pub async fn get_leaderboard(
    state: &SharedState,
    room_id: &str,
) -> Result<Vec<LeaderboardEntry>, ServiceError> {
    Ok(leaderboard(list_players(state, room_id).await?))
}

/// Push a fresh leaderboard to `on_update` every time the roster changes.
///
/// The returned feed stops when dropped.
pub async fn listen_to_leaderboard<F>(
    state: &SharedState,
    room_id: &str,
    on_update: F,
) -> Result<ChangeFeed, ServiceError>
where
    F: Fn(Vec<LeaderboardEntry>) + Send + Sync + 'static,
{
    let room_id = normalize_room_code(room_id)?;
    let store = state.require_document_store().await?;
    let target = FeedTarget::Collection(paths::players_path(&room_id));

    Ok(ChangeFeed::spawn(
        store,
        target,
        RetryPolicy::from(&state.config().feed),
        move |event| {
            if let FeedEvent::Collection { documents, .. } = event {
                let players: Vec<PlayerEntity> = rooms::decode_all(documents);
                on_update(leaderboard(players.into_iter().map(Player::from).collect()));
            }
        },
    ))
}

/// Trimmed display name, refused when blank or too long.
pub fn normalize_player_name(raw: &str) -> Result<String, ServiceError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ServiceError::InvalidInput("player name must not be empty".into()));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(ServiceError::InvalidInput(format!(
            "player name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(name.to_string())
}

async fn rename(
    repository: &RoomRepository,
    room_id: &str,
    user_id: &str,
    name: &str,
) -> Result<Player, ServiceError> {
    // Only the name is written, so concurrent score updates are never clobbered.
    repository
        .update_player(room_id, user_id, rooms::patch(json!({ "name": name })), None)
        .await?;
    let Some(stored) = repository.find_player(room_id, user_id).await? else {
        return Err(ServiceError::NotFound(format!(
            "player `{user_id}` left room `{room_id}`"
        )));
    };
    debug!(room_id = %room_id, user_id = %user_id, "player rejoined");
    Ok(stored.value.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_and_bounded() {
        assert_eq!(normalize_player_name("  Ada ").unwrap(), "Ada");
        assert!(normalize_player_name("   ").is_err());
        assert!(normalize_player_name(&"x".repeat(41)).is_err());
    }
}
