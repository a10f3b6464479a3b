/// Document store contract and its backends.
pub mod document_store;
/// Persisted document shapes.
pub mod models;
/// Typed repository over room and player documents.
pub mod rooms;
/// Storage error taxonomy shared by every backend.
pub mod storage;
