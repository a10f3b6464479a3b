use rand::Rng;
use tracing::{debug, warn};

use crate::{
    error::ServiceError,
    state::{SharedState, room::Room},
};

/// Upper-case letters and digits minus the look-alikes `I`, `O`, `0` and `1`.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const MAX_CODE_LENGTH: usize = 32;

/// Draw a random room code that no stored room uses yet.
///
/// The check is advisory: room creation still relies on the conditional create.
pub async fn generate_room_code(state: &SharedState) -> Result<String, ServiceError> {
    let rooms = state.rooms().await?;
    let length = state.config().room_code_length;
    let attempts = state.config().room_code_attempts;

    for attempt in 1..=attempts {
        let code = random_code(length);
        if rooms.find_room(&code).await?.is_none() {
            debug!(code = %code, attempt, "generated room code");
            return Ok(code);
        }
        debug!(code = %code, attempt, "room code already taken");
    }

    warn!(attempts, "could not find a free room code");
    Err(ServiceError::Conflict(format!(
        "no free room code after {attempts} attempts"
    )))
}

/// Public rooms still waiting in the lobby, in store listing order.
pub async fn list_public_rooms(state: &SharedState) -> Result<Vec<Room>, ServiceError> {
    let rooms = state.rooms().await?.list_rooms().await?;
    Ok(rooms
        .into_iter()
        .filter(|room| room.public && !room.started && !room.finished)
        .map(Room::from)
        .collect())
}

/// A room is joinable when it exists and has not finished.
pub async fn validate_joinable(state: &SharedState, room_id: &str) -> Result<bool, ServiceError> {
    let room_id = normalize_room_code(room_id)?;
    let stored = state.rooms().await?.find_room(&room_id).await?;
    Ok(stored.is_some_and(|stored| Room::from(stored.value).is_joinable()))
}

/// Canonical form of a user-typed room code: trimmed and upper-cased.
///
/// Codes double as document ids, so anything outside ASCII alphanumerics is refused.
pub fn normalize_room_code(raw: &str) -> Result<String, ServiceError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.is_empty() || code.len() > MAX_CODE_LENGTH {
        return Err(ServiceError::InvalidInput(format!(
            "room code must be 1 to {MAX_CODE_LENGTH} characters"
        )));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ServiceError::InvalidInput(
            "room code may only contain letters and digits".into(),
        ));
    }
    Ok(code)
}

fn random_code(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}
