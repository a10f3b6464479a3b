mod common;

use std::time::Duration;

use arena_back::{
    error::ServiceError,
    services::{
        lifecycle_service,
        presence_service::{self, HostPresence, HostRecovery},
        session_service,
    },
};
use common::{Arena, ROOM, caller};

const LONG_SILENCE: Duration = Duration::from_secs(120);

#[tokio::test]
async fn silent_host_is_replaced_by_the_earliest_joiner() {
    let arena = Arena::new().await;
    arena.room_with(2).await;
    arena.join("ada").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    arena.join("bob").await;
    lifecycle_service::start_quiz(&arena.state, ROOM, &caller("host"))
        .await
        .unwrap();

    let fresh = presence_service::recover_if_host_absent(&arena.state, ROOM).await.unwrap();
    assert_eq!(
        fresh,
        HostRecovery::Present {
            host_id: "host".into()
        }
    );

    arena.silence_host(LONG_SILENCE).await;
    let check = presence_service::check_host_presence(&arena.state, ROOM).await.unwrap();
    assert_eq!(check.presence, HostPresence::Absent);
    assert!(check.silent_for >= LONG_SILENCE);

    let recovery = presence_service::recover_if_host_absent(&arena.state, ROOM).await.unwrap();
    assert_eq!(
        recovery,
        HostRecovery::Promoted {
            host_id: "ada".into(),
            previous_host_id: "host".into()
        }
    );

    let room = lifecycle_service::get_room(&arena.state, ROOM, None).await.unwrap();
    assert_eq!(room.host_id, "ada");
    assert_eq!(room.previous_host_id.as_deref(), Some("host"));
    assert!(room.host_transferred_at.is_some());

    // The new host drives the quiz; the old one lost its authority.
    assert!(matches!(
        lifecycle_service::advance_question(&arena.state, ROOM, &caller("host"), None).await,
        Err(ServiceError::NotHost { .. })
    ));
    let advanced = lifecycle_service::advance_question(&arena.state, ROOM, &caller("ada"), None)
        .await
        .unwrap();
    assert_eq!(advanced.current_question, 1);
}

#[tokio::test]
async fn concurrent_recoveries_agree_on_one_host() {
    let arena = Arena::racing().await;
    arena.room_with(1).await;
    arena.join("ada").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    arena.join("bob").await;
    arena.silence_host(LONG_SILENCE).await;

    let (a, b, c) = tokio::join!(
        presence_service::handle_host_abandonment(&arena.state, ROOM),
        presence_service::handle_host_abandonment(&arena.state, ROOM),
        presence_service::handle_host_abandonment(&arena.state, ROOM),
    );
    for winner in [a, b, c] {
        assert_eq!(winner.unwrap().as_deref(), Some("ada"));
    }
    assert!(arena.conflicts() > 0);

    let room = lifecycle_service::get_room(&arena.state, ROOM, None).await.unwrap();
    assert_eq!(room.host_id, "ada");
    assert_eq!(room.previous_host_id.as_deref(), Some("host"));
}

#[tokio::test]
async fn lone_host_leaves_the_room_unrecoverable() {
    let arena = Arena::new().await;
    arena.room_with(1).await;
    arena.silence_host(LONG_SILENCE).await;

    let recovery = presence_service::recover_if_host_absent(&arena.state, ROOM).await.unwrap();
    assert_eq!(recovery, HostRecovery::Abandoned);
}

#[tokio::test]
async fn host_reads_and_heartbeats_keep_it_present() {
    let arena = Arena::new().await;
    arena.room_with(1).await;
    arena.join("ada").await;

    arena.silence_host(LONG_SILENCE).await;
    lifecycle_service::get_room(&arena.state, ROOM, Some(&caller("host")))
        .await
        .unwrap();
    let check = presence_service::check_host_presence(&arena.state, ROOM).await.unwrap();
    assert_eq!(check.presence, HostPresence::Present);

    arena.silence_host(LONG_SILENCE).await;
    presence_service::heartbeat(&arena.state, ROOM, &caller("host"))
        .await
        .unwrap();
    let check = presence_service::check_host_presence(&arena.state, ROOM).await.unwrap();
    assert_eq!(check.presence, HostPresence::Present);

    assert!(matches!(
        presence_service::heartbeat(&arena.state, ROOM, &caller("ada")).await,
        Err(ServiceError::NotHost { .. })
    ));
}

#[tokio::test]
async fn finished_rooms_are_never_migrated() {
    let arena = Arena::new().await;
    arena.room_with(1).await;
    arena.join("ada").await;
    lifecycle_service::finish_quiz(&arena.state, ROOM, &caller("host"))
        .await
        .unwrap();
    arena.silence_host(LONG_SILENCE).await;

    let host = presence_service::handle_host_abandonment(&arena.state, ROOM).await.unwrap();
    assert_eq!(host.as_deref(), Some("host"));
    assert!(session_service::join_room(&arena.state, ROOM, &caller("bob"), "Bob").await.is_err());
}
