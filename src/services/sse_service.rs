use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::Serialize;
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, Interval, MissedTickBehavior, interval_at},
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    dto::{
        player::LeaderboardEntryView,
        room::RoomView,
        sse::{FeedFailedEvent, Handshake, RoomClosedEvent, ServerEvent},
    },
    error::ServiceError,
    services::{
        auth::CallerIdentity,
        change_feed::FeedStatus,
        discovery_service::normalize_room_code,
        lifecycle_service, presence_service, session_service,
    },
    state::SharedState,
};

const EVENT_HANDSHAKE: &str = "handshake";
const EVENT_ROOM: &str = "room";
const EVENT_LEADERBOARD: &str = "leaderboard";
const EVENT_ROOM_CLOSED: &str = "room.closed";
const EVENT_FEED_FAILED: &str = "feed.failed";
const RESPONSE_BUFFER: usize = 8;

/// Latest room snapshot handed over to the forwarder task.
#[derive(Clone)]
enum Update {
    Event(ServerEvent),
    Closed,
}

/// Open the realtime stream of one room: room snapshots and leaderboards.
///
/// While the caller is the host, the open stream also keeps its heartbeat fresh.
pub async fn room_stream(
    state: SharedState,
    room_id: String,
    caller: CallerIdentity,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServiceError> {
    let room_id = normalize_room_code(&room_id)?;
    let room = lifecycle_service::get_room(&state, &room_id, Some(&caller)).await?;
    let is_host = room.host_id == caller.uid;

    // Only the latest snapshot of each feed matters; a slow client skips intermediate ones.
    let (room_tx, mut room_updates) = watch::channel(None::<Update>);
    let room_feed = lifecycle_service::listen_to_room(&state, &room_id, move |room| {
        let update = match room {
            Some(room) => match to_event(EVENT_ROOM, &RoomView::from(room)) {
                Some(event) => Update::Event(event),
                None => return,
            },
            None => Update::Closed,
        };
        room_tx.send_replace(Some(update));
    })
    .await?;

    let (board_tx, mut board_updates) = watch::channel(None::<ServerEvent>);
    let board_feed = session_service::listen_to_leaderboard(&state, &room_id, move |board| {
        let board: Vec<LeaderboardEntryView> = board.into_iter().map(Into::into).collect();
        if let Some(event) = to_event(EVENT_LEADERBOARD, &board) {
            board_tx.send_replace(Some(event));
        }
    })
    .await?;

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(RESPONSE_BUFFER);
    let handshake = Handshake {
        room_id: room_id.clone(),
        user_id: caller.uid.clone(),
        host: is_host,
    };
    if let Some(event) = to_event(EVENT_HANDSHAKE, &handshake) {
        let _ = tx.try_send(Ok(into_sse(event)));
    }

    info!(room_id = %room_id, user_id = %caller.uid, host = is_host, "room stream connected");

    tokio::spawn(async move {
        let mut room_status = room_feed.status_watcher();
        let mut board_status = board_feed.status_watcher();
        let mut heartbeat = is_host.then(|| {
            let period = state.config().heartbeat_interval().max(Duration::from_secs(1));
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            let outgoing = tokio::select! {
                _ = tx.closed() => break,
                changed = room_updates.changed() => {
                    let update = match changed {
                        Ok(()) => room_updates.borrow_and_update().clone(),
                        Err(_) => Some(Update::Closed),
                    };
                    match update {
                        Some(Update::Event(event)) => event,
                        None => continue,
                        Some(Update::Closed) => {
                            let closed = RoomClosedEvent { room_id: room_id.clone() };
                            if let Some(event) = to_event(EVENT_ROOM_CLOSED, &closed) {
                                let _ = tx.send(Ok(into_sse(event))).await;
                            }
                            break;
                        }
                    }
                }
                Ok(()) = board_updates.changed() => {
                    let board = board_updates.borrow_and_update().clone();
                    match board {
                        Some(event) => event,
                        None => continue,
                    }
                }
                Ok(()) = room_status.changed() => {
                    let status = room_status.borrow_and_update().clone();
                    match failure_event("room", &status) {
                        Some(event) => event,
                        None => continue,
                    }
                }
                Ok(()) = board_status.changed() => {
                    let status = board_status.borrow_and_update().clone();
                    match failure_event("leaderboard", &status) {
                        Some(event) => event,
                        None => continue,
                    }
                }
                _ = tick(&mut heartbeat) => {
                    match presence_service::heartbeat(&state, &room_id, &caller).await {
                        Ok(_) => debug!(room_id = %room_id, "stream heartbeat"),
                        Err(ServiceError::NotHost { .. }) => {
                            info!(room_id = %room_id, user_id = %caller.uid, "host changed; stream heartbeat stopped");
                            heartbeat = None;
                        }
                        Err(err) => warn!(room_id = %room_id, error = %err, "stream heartbeat failed"),
                    }
                    continue;
                }
            };

            if tx.send(Ok(into_sse(outgoing))).await.is_err() {
                break;
            }
        }

        room_feed.stop();
        board_feed.stop();
        info!(room_id = %room_id, user_id = %caller.uid, "room stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

/// Resolves on the next heartbeat tick, or never when the caller is not the host.
async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn failure_event(feed: &str, status: &FeedStatus) -> Option<ServerEvent> {
    let FeedStatus::Failed { reason } = status else {
        return None;
    };
    to_event(
        EVENT_FEED_FAILED,
        &FeedFailedEvent {
            feed: feed.to_string(),
            reason: reason.clone(),
        },
    )
}

fn to_event(name: &str, payload: &impl Serialize) -> Option<ServerEvent> {
    match ServerEvent::json(Some(name.to_string()), payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(event = name, error = %err, "failed to serialize SSE payload");
            None
        }
    }
}

fn into_sse(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_failed_feeds_produce_an_event() {
        assert!(failure_event("room", &FeedStatus::Subscribed).is_none());
        assert!(failure_event("room", &FeedStatus::Retrying { attempt: 2 }).is_none());

        let event = failure_event(
            "leaderboard",
            &FeedStatus::Failed {
                reason: "storage unavailable".into(),
            },
        )
        .unwrap();
        assert_eq!(event.event.as_deref(), Some(EVENT_FEED_FAILED));
        let data: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(data["feed"], "leaderboard");
    }

    #[tokio::test]
    async fn streams_require_an_existing_room() {
        use crate::{
            config::AppConfig, dao::document_store::MemoryDocumentStore,
            services::auth::TokenRegistry, state::AppState,
        };
        use std::sync::Arc;

        let state = AppState::with_store(
            AppConfig::default(),
            Arc::new(TokenRegistry::new()),
            Arc::new(MemoryDocumentStore::new()),
        )
        .await;
        let result = room_stream(state, "NOPE".into(), CallerIdentity::new("ada")).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn slow_clients_receive_the_latest_room_snapshot() {
        use axum::response::IntoResponse;
        use futures::StreamExt;
        use std::sync::Arc;

        use crate::{
            config::AppConfig,
            dao::document_store::MemoryDocumentStore,
            services::{auth::TokenRegistry, lifecycle_service::NewRoom},
            state::{
                AppState,
                room::{Question, QuestionKind},
            },
        };

        const ADVANCES: i64 = 24;

        let state = AppState::with_store(
            AppConfig::default(),
            Arc::new(TokenRegistry::new()),
            Arc::new(MemoryDocumentStore::new()),
        )
        .await;
        let host = CallerIdentity::new("host");
        let quiz = (0..=ADVANCES)
            .map(|index| Question {
                question: format!("Question {index}?"),
                options: vec!["a".into(), "b".into()],
                correct_index: 0,
                kind: QuestionKind::MultipleChoice,
            })
            .collect();
        lifecycle_service::create_room(
            &state,
            &host,
            NewRoom {
                room_id: "QUIZ42".into(),
                title: "Friday".into(),
                public: false,
                host_name: "Host".into(),
                quiz,
                question_duration: None,
            },
        )
        .await
        .unwrap();
        lifecycle_service::start_quiz(&state, "QUIZ42", &host).await.unwrap();

        let sse = room_stream(state.clone(), "QUIZ42".into(), host.clone())
            .await
            .unwrap();
        let mut body = sse.into_response().into_body().into_data_stream();

        // Nobody reads the stream while the room keeps moving.
        for _ in 0..ADVANCES {
            lifecycle_service::advance_question(&state, "QUIZ42", &host, None)
                .await
                .unwrap();
            for _ in 0..4 {
                tokio::task::yield_now().await;
            }
        }

        let mut raw = String::new();
        while let Ok(Some(Ok(chunk))) =
            tokio::time::timeout(Duration::from_millis(200), body.next()).await
        {
            raw.push_str(&String::from_utf8_lossy(&chunk));
        }

        let rooms: Vec<serde_json::Value> = raw
            .split("\n\n")
            .filter(|frame| frame.lines().any(|line| line == "event: room"))
            .filter_map(|frame| frame.lines().find_map(|line| line.strip_prefix("data: ")))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();
        assert!(!rooms.is_empty());
        assert!(rooms.len() < ADVANCES as usize);
        assert_eq!(rooms.last().unwrap()["current_question"], ADVANCES);
    }
}
