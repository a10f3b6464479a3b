//! Host liveness and cooperative host migration.
//!
//! The host keeps `host_last_seen` fresh through its own reads and an open event stream.
//! Any participant may notice the host went silent and promote the longest-standing player;
//! the promotion is a compare-and-set on the room revision in which the absent host was
//! observed, so concurrent recoveries converge on a single winner.

use std::time::{Duration, SystemTime};

use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    dao::{
        document_store::paths,
        models::RoomEntity,
        rooms::{self, RoomRepository, Stored},
        storage::StorageError,
    },
    error::ServiceError,
    services::{
        auth::CallerIdentity,
        discovery_service::normalize_room_code,
        lifecycle_service::{RoomWrite, ensure_host, mutate_room, room_not_found},
    },
    state::{
        SharedState,
        room::{Player, Room},
    },
};

/// Whether the host has been heard from recently enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPresence {
    Present,
    Absent,
}

/// Result of [`check_host_presence`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceCheck {
    pub host_id: String,
    pub presence: HostPresence,
    pub silent_for: Duration,
}

/// Result of [`recover_if_host_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRecovery {
    /// The host is alive (or another participant already replaced it).
    Present { host_id: String },
    /// The silent host was replaced, by this call or a concurrent one.
    Promoted {
        host_id: String,
        previous_host_id: String,
    },
    /// Nobody is left to take over; the room is unrecoverable.
    Abandoned,
}

/// Explicit heartbeat from the host.
pub async fn heartbeat(
    state: &SharedState,
    room_id: &str,
    caller: &CallerIdentity,
) -> Result<Room, ServiceError> {
    let room_id = normalize_room_code(room_id)?;
    let repository = state.rooms().await?;
    mutate_room(state, &repository, &room_id, |room| {
        ensure_host(room, caller)?;
        Ok(RoomWrite::Patch(rooms::patch(json!({
            "host_last_seen": SystemTime::now(),
        }))))
    })
    .await
}

/// Refresh `host_last_seen` after a host read, at most once per heartbeat interval.
///
/// Failures are logged and swallowed: the read itself already succeeded.
pub(crate) async fn heartbeat_if_due(
    state: &SharedState,
    repository: &RoomRepository,
    stored: Stored<RoomEntity>,
) -> Room {
    let Stored { revision, value } = stored;
    let mut room = Room::from(value);
    let now = SystemTime::now();
    if room.host_silence(now) < state.config().heartbeat_interval() {
        return room;
    }

    let patch = rooms::patch(json!({ "host_last_seen": now }));
    match repository
        .update_room(&room.room_id, patch, Some(revision))
        .await
    {
        Ok(_) => {
            debug!(room_id = %room.room_id, "host heartbeat recorded");
            room.host_last_seen = now;
        }
        // Someone else wrote the room meanwhile; the next read will try again.
        Err(StorageError::Conflict(_)) => {}
        Err(err) => warn!(room_id = %room.room_id, error = %err, "host heartbeat failed"),
    }
    room
}

/// Report the host absent once its silence exceeds the configured timeout.
pub async fn check_host_presence(
    state: &SharedState,
    room_id: &str,
) -> Result<PresenceCheck, ServiceError> {
    let room_id = normalize_room_code(room_id)?;
    let Some(stored) = state.rooms().await?.find_room(&room_id).await? else {
        return Err(room_not_found(&room_id));
    };
    let room = Room::from(stored.value);
    let silent_for = room.host_silence(SystemTime::now());
    let presence = if silent_for > state.config().host_timeout() {
        HostPresence::Absent
    } else {
        HostPresence::Present
    };

    Ok(PresenceCheck {
        host_id: room.host_id,
        presence,
        silent_for,
    })
}

/// Promote the earliest-joined non-host player if the host is still absent.
///
/// Returns the host after the call: the promoted player, the host that won a concurrent
/// promotion, or the current host when it turned out to be alive. `None` means no player
/// can take over.
pub async fn handle_host_abandonment(
    state: &SharedState,
    room_id: &str,
) -> Result<Option<String>, ServiceError> {
    let room_id = normalize_room_code(room_id)?;
    let repository = state.rooms().await?;
    let host_timeout = state.config().host_timeout();

    for attempt in 1..=state.config().write_attempts {
        let Some(stored) = repository.find_room(&room_id).await? else {
            return Err(room_not_found(&room_id));
        };
        let room = Room::from(stored.value.clone());
        let now = SystemTime::now();

        if room.finished || room.host_silence(now) <= host_timeout {
            return Ok(Some(room.host_id));
        }

        let roster: Vec<Player> = repository
            .list_players(&room_id)
            .await?
            .into_iter()
            .map(Player::from)
            .collect();
        let Some(candidate) = promotion_candidate(&roster, &room.host_id) else {
            warn!(room_id = %room_id, host_id = %room.host_id, "host absent and no player can take over");
            return Ok(None);
        };
        let candidate = candidate.user_id.clone();

        let patch = rooms::patch(json!({
            "host_id": candidate,
            "previous_host_id": room.host_id,
            "host_transferred_at": now,
            "host_last_seen": now,
        }));
        match repository
            .update_room(&room_id, patch, Some(stored.revision))
            .await
        {
            Ok(_) => {
                info!(
                    room_id = %room_id,
                    previous_host_id = %room.host_id,
                    host_id = %candidate,
                    "host promoted after abandonment"
                );
                return Ok(Some(candidate));
            }
            Err(StorageError::Conflict(_)) => {
                debug!(room_id = %room_id, attempt, "room changed during host promotion; re-reading");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::Conflict(paths::room_path(&room_id)))
}

/// Participant-side routine: check presence and promote a replacement when needed.
pub async fn recover_if_host_absent(
    state: &SharedState,
    room_id: &str,
) -> Result<HostRecovery, ServiceError> {
    let check = check_host_presence(state, room_id).await?;
    if check.presence == HostPresence::Present {
        return Ok(HostRecovery::Present {
            host_id: check.host_id,
        });
    }

    Ok(match handle_host_abandonment(state, room_id).await? {
        Some(host_id) if host_id != check.host_id => HostRecovery::Promoted {
            host_id,
            previous_host_id: check.host_id,
        },
        Some(host_id) => HostRecovery::Present { host_id },
        None => HostRecovery::Abandoned,
    })
}

/// Earliest-joined player other than `host_id`; ties go to the smaller user id.
fn promotion_candidate<'a>(roster: &'a [Player], host_id: &str) -> Option<&'a Player> {
    roster
        .iter()
        .filter(|player| player.user_id != host_id)
        .min_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn player(user_id: &str, joined_secs: u64) -> Player {
        Player {
            user_id: user_id.into(),
            name: user_id.into(),
            score: 0,
            joined_at: SystemTime::UNIX_EPOCH + Duration::from_secs(joined_secs),
            answers: BTreeMap::new(),
        }
    }

    #[test]
    fn candidate_is_the_longest_standing_non_host() {
        let roster = vec![player("host", 0), player("late", 30), player("early", 10)];
        assert_eq!(
            promotion_candidate(&roster, "host").map(|p| p.user_id.as_str()),
            Some("early")
        );
    }

    #[test]
    fn join_time_ties_break_on_user_id() {
        let roster = vec![player("zed", 10), player("amy", 10)];
        assert_eq!(
            promotion_candidate(&roster, "host").map(|p| p.user_id.as_str()),
            Some("amy")
        );
    }

    #[test]
    fn lone_host_has_no_successor() {
        assert!(promotion_candidate(&[player("host", 0)], "host").is_none());
        assert!(promotion_candidate(&[], "host").is_none());
    }
}
