//! Document path layout shared by every backend.

/// Top-level collection holding one document per room.
pub const ROOMS_COLLECTION: &str = "rooms";
const PLAYERS_COLLECTION: &str = "players";

pub fn room_path(room_id: &str) -> String {
    format!("{ROOMS_COLLECTION}/{room_id}")
}

pub fn players_path(room_id: &str) -> String {
    format!("{ROOMS_COLLECTION}/{room_id}/{PLAYERS_COLLECTION}")
}

pub fn player_path(room_id: &str, user_id: &str) -> String {
    format!("{}/{user_id}", players_path(room_id))
}

/// Whether `path` is a direct child document of `collection`.
pub fn is_direct_child(collection: &str, path: &str) -> bool {
    path.strip_prefix(collection)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|leaf| !leaf.is_empty() && !leaf.contains('/'))
}

/// Last path segment, i.e. the document id.
pub fn leaf(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_documents_are_not_rooms() {
        let player = player_path("K7QX2M", "user-1");
        assert_eq!(player, "rooms/K7QX2M/players/user-1");
        assert!(is_direct_child(&players_path("K7QX2M"), &player));
        assert!(!is_direct_child(ROOMS_COLLECTION, &player));
        assert!(is_direct_child(ROOMS_COLLECTION, &room_path("K7QX2M")));
    }

    #[test]
    fn prefix_lookalikes_are_rejected() {
        assert!(!is_direct_child("rooms", "roomsX/ABC"));
        assert!(!is_direct_child("rooms", "rooms/"));
        assert_eq!(leaf("rooms/ABC/players/u1"), "u1");
    }
}
