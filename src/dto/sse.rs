use serde::Serialize;
use utoipa::ToSchema;

#[derive(Clone, Debug)]
/// Named payload pushed to an SSE client.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// First event of every room stream.
pub struct Handshake {
    pub room_id: String,
    /// Caller the stream was opened for.
    pub user_id: String,
    /// True when the caller is the host; its open stream then doubles as a heartbeat.
    pub host: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent when the room document disappears; the stream ends right after.
pub struct RoomClosedEvent {
    pub room_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent when a change feed gives up; clients should reconnect later.
pub struct FeedFailedEvent {
    pub feed: String,
    pub reason: String,
}
