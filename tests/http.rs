mod common;

use arena_back::{
    dto::{room::RoomView, submission::SubmissionResponse},
    routes,
};
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use common::{Arena, ROOM};
use serde_json::{Value, json};
use tower::ServiceExt;

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn create_payload() -> Value {
    json!({
        "room_id": ROOM,
        "title": "Friday quiz",
        "public": true,
        "host_name": "Host",
        "quiz": [
            {"question": "2 + 2?", "options": ["3", "4"], "correct_index": 1},
            {"question": "Capital of Peru?", "options": ["Lima", "Quito"], "correct_index": 0}
        ]
    })
}

#[tokio::test]
async fn room_flow_over_http() {
    let arena = Arena::new().await;
    let app = routes::router(arena.state.clone());

    let (status, body) = send(
        &app,
        Method::POST,
        "/rooms",
        Some("tok-host"),
        Some(create_payload()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let room: RoomView = serde_json::from_value(body).unwrap();
    assert_eq!(room.room_id, ROOM);
    assert_eq!(room.current_question, -1);

    let (status, _) = send(
        &app,
        Method::POST,
        "/rooms/QUIZ42/players",
        Some("tok-ada"),
        Some(json!({"name": "Ada"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        Method::POST,
        "/rooms/QUIZ42/start",
        Some("tok-ada"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "not_host");

    let (status, body) = send(
        &app,
        Method::POST,
        "/rooms/QUIZ42/start",
        Some("tok-host"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "live");
    assert!(body["active_question"].get("correct_index").is_none());

    let answer = json!({"question_index": 0, "answer_index": 1, "submission_id": "ada-0"});
    let (status, body) = send(
        &app,
        Method::POST,
        "/rooms/QUIZ42/answers",
        Some("tok-ada"),
        Some(answer.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let first: SubmissionResponse = serde_json::from_value(body).unwrap();
    assert!(first.correct);

    let (status, body) = send(
        &app,
        Method::POST,
        "/rooms/QUIZ42/answers",
        Some("tok-ada"),
        Some(answer),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let duplicate: SubmissionResponse = serde_json::from_value(body).unwrap();
    assert_eq!(duplicate.points_awarded, first.points_awarded);

    let (status, _) = send(
        &app,
        Method::POST,
        "/rooms/QUIZ42/advance?expected_question=0",
        Some("tok-host"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let miss = json!({"question_index": 1, "answer_index": 1, "submission_id": "ada-1"});
    let (status, body) = send(
        &app,
        Method::POST,
        "/rooms/QUIZ42/answers",
        Some("tok-ada"),
        Some(miss),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let miss: SubmissionResponse = serde_json::from_value(body).unwrap();
    assert!(!miss.correct);
    assert_eq!(miss.points_awarded, 0);
    assert_eq!(miss.correct_index, 0);
    assert_eq!(miss.score, 10);

    let stale = json!({"question_index": 0, "answer_index": 1, "submission_id": "late"});
    let (status, body) = send(
        &app,
        Method::POST,
        "/rooms/QUIZ42/answers",
        Some("tok-host"),
        Some(stale),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "stale_question");

    let (status, body) = send(&app, Method::GET, "/rooms/QUIZ42/leaderboard", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["user_id"], "ada");
    assert_eq!(body[0]["score"], 10);
}

#[tokio::test]
async fn authentication_and_validation_errors() {
    let arena = Arena::new().await;
    let app = routes::router(arena.state.clone());

    let (status, body) = send(&app, Method::POST, "/rooms", None, Some(create_payload())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "not_authenticated");

    let (status, _) = send(
        &app,
        Method::POST,
        "/rooms",
        Some("tok-forged"),
        Some(create_payload()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut empty_quiz = create_payload();
    empty_quiz["quiz"] = json!([]);
    let (status, _) = send(&app, Method::POST, "/rooms", Some("tok-host"), Some(empty_quiz)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, Method::GET, "/rooms/NOPE/joinable", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["joinable"], false);

    let (status, body) = send(&app, Method::GET, "/rooms/NOPE/presence", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn public_listing_and_generated_codes() {
    let arena = Arena::new().await;
    let app = routes::router(arena.state.clone());

    let mut payload = create_payload();
    payload.as_object_mut().unwrap().remove("room_id");
    let (status, body) = send(&app, Method::POST, "/rooms", Some("tok-host"), Some(payload)).await;
    assert_eq!(status, StatusCode::CREATED);
    let generated = body["room_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::GET, "/rooms", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["room_id"], generated.as_str());

    let (status, body) = send(&app, Method::POST, "/rooms/code", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["room_id"], generated.as_str());
}

#[tokio::test]
async fn healthcheck_reports_degraded_mode() {
    let arena = Arena::new().await;
    let app = routes::router(arena.state.clone());

    let (status, body) = send(&app, Method::GET, "/healthcheck", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    arena.state.clear_document_store().await;
    let (status, body) = send(&app, Method::GET, "/healthcheck", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");

    let (status, body) = send(&app, Method::GET, "/rooms", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "unavailable");
}
