/// Bearer token verification.
pub mod auth;
/// Resilient subscriptions over the document store's change streams.
pub mod change_feed;
/// Room codes, public listing and joinability.
pub mod discovery_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Room creation and the host-driven quiz lifecycle.
pub mod lifecycle_service;
/// Host heartbeat, absence detection and promotion.
pub mod presence_service;
/// Joining, leaving and the leaderboard.
pub mod session_service;
/// Server-Sent Events room streams.
pub mod sse_service;
/// Document store connection supervisor toggling degraded mode.
pub mod storage_supervisor;
/// Authoritative, exactly-once answer scoring.
pub mod submission_service;
