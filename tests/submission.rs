mod common;

use arena_back::{
    error::ServiceError,
    services::{
        lifecycle_service, session_service,
        submission_service::{self, AnswerSubmission, SubmissionStatus},
    },
};
use common::{Arena, ROOM, caller};
use futures::future::join_all;

fn answer(question_index: u32, answer_index: usize, submission_id: &str) -> AnswerSubmission {
    AnswerSubmission {
        room_id: ROOM.into(),
        question_index,
        answer_index,
        submission_id: submission_id.into(),
    }
}

async fn live_arena(questions: usize) -> Arena {
    start_live(Arena::new().await, questions).await
}

async fn start_live(arena: Arena, questions: usize) -> Arena {
    arena.room_with(questions).await;
    arena.join("ada").await;
    lifecycle_service::start_quiz(&arena.state, ROOM, &caller("host"))
        .await
        .unwrap();
    arena
}

async fn score_of(arena: &Arena, uid: &str) -> u32 {
    session_service::list_players(&arena.state, ROOM)
        .await
        .unwrap()
        .into_iter()
        .find(|player| player.user_id == uid)
        .map(|player| player.score)
        .unwrap()
}

#[tokio::test]
async fn resubmitting_scores_once_and_returns_the_original_result() {
    let arena = live_arena(2).await;

    let first = submission_service::submit_answer(&arena.state, "tok-ada", answer(0, 1, "s-1"))
        .await
        .unwrap();
    assert_eq!(first.status, SubmissionStatus::Accepted);
    assert!(first.correct);
    assert_eq!(first.points_awarded, 10);

    // Same key, then a different key with a different option.
    let retry = submission_service::submit_answer(&arena.state, "tok-ada", answer(0, 1, "s-1"))
        .await
        .unwrap();
    let other = submission_service::submit_answer(&arena.state, "tok-ada", answer(0, 0, "s-2"))
        .await
        .unwrap();
    for duplicate in [retry, other] {
        assert_eq!(duplicate.status, SubmissionStatus::AlreadySubmitted);
        assert!(duplicate.correct);
        assert_eq!(duplicate.points_awarded, 10);
        assert_eq!(duplicate.score, 10);
    }

    assert_eq!(score_of(&arena, "ada").await, 10);
}

#[tokio::test]
async fn concurrent_duplicates_score_exactly_once() {
    let arena = start_live(Arena::racing().await, 1).await;
    let ada = caller("ada");

    let attempts = (0..8).map(|n| {
        submission_service::submit_answer_as(&arena.state, &ada, answer(0, 1, &format!("s-{n}")))
    });
    let outcomes: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|outcome| outcome.unwrap())
        .collect();

    let accepted = outcomes
        .iter()
        .filter(|outcome| outcome.status == SubmissionStatus::Accepted)
        .count();
    assert_eq!(accepted, 1);
    assert!(outcomes.iter().all(|outcome| outcome.points_awarded == 10));
    assert!(arena.conflicts() > 0);
    assert_eq!(score_of(&arena, "ada").await, 10);
}

#[tokio::test]
async fn answers_for_other_questions_are_stale() {
    let arena = live_arena(3).await;
    let host = caller("host");
    lifecycle_service::advance_question(&arena.state, ROOM, &host, None)
        .await
        .unwrap();

    let late = submission_service::submit_answer(&arena.state, "tok-ada", answer(0, 1, "late"))
        .await;
    assert!(matches!(
        late,
        Err(ServiceError::StaleQuestion {
            submitted: 0,
            current: 1
        })
    ));
    let early = submission_service::submit_answer(&arena.state, "tok-ada", answer(2, 1, "early"))
        .await;
    assert!(matches!(early, Err(ServiceError::StaleQuestion { .. })));
    assert_eq!(score_of(&arena, "ada").await, 0);

    lifecycle_service::finish_quiz(&arena.state, ROOM, &host).await.unwrap();
    let after = submission_service::submit_answer(&arena.state, "tok-ada", answer(1, 1, "after"))
        .await;
    assert!(matches!(after, Err(ServiceError::StaleQuestion { .. })));
}

#[tokio::test]
async fn waiting_rooms_accept_no_answers() {
    let arena = Arena::new().await;
    arena.room_with(1).await;
    arena.join("ada").await;

    let result = submission_service::submit_answer(&arena.state, "tok-ada", answer(0, 1, "s")).await;
    assert!(matches!(result, Err(ServiceError::StaleQuestion { current: -1, .. })));
}

#[tokio::test]
async fn unknown_tokens_and_strangers_are_refused() {
    let arena = live_arena(1).await;

    assert!(matches!(
        submission_service::submit_answer(&arena.state, "tok-nobody", answer(0, 1, "s")).await,
        Err(ServiceError::NotAuthenticated(_))
    ));
    // `bob` holds a valid token but never joined.
    assert!(matches!(
        submission_service::submit_answer(&arena.state, "tok-bob", answer(0, 1, "s")).await,
        Err(ServiceError::NotFound(_))
    ));
    assert!(matches!(
        submission_service::submit_answer(&arena.state, "tok-ada", answer(0, 7, "s")).await,
        Err(ServiceError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn rejoining_keeps_score_and_answers() {
    let arena = live_arena(2).await;
    submission_service::submit_answer(&arena.state, "tok-ada", answer(0, 1, "s-1"))
        .await
        .unwrap();

    let renamed = session_service::join_room(&arena.state, ROOM, &caller("ada"), "Ada L.")
        .await
        .unwrap();
    assert_eq!(renamed.name, "Ada L.");
    assert_eq!(renamed.score, 10);
    assert!(renamed.has_answered(0));

    let again = submission_service::submit_answer(&arena.state, "tok-ada", answer(0, 1, "s-1"))
        .await
        .unwrap();
    assert_eq!(again.status, SubmissionStatus::AlreadySubmitted);
}
