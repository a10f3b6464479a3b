//! Shared fixtures: an in-memory store, seeded tokens and small quizzes.

#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime},
};

use arena_back::{
    config::AppConfig,
    dao::{
        document_store::{
            ChangeStream, Document, DocumentStore, MemoryDocumentStore, Revision, paths,
        },
        rooms,
        storage::{StorageError, StorageResult},
    },
    services::{
        auth::{CallerIdentity, TokenRegistry},
        lifecycle_service::{self, NewRoom},
        session_service,
    },
    state::{
        AppState, SharedState,
        room::{Question, QuestionKind, Room},
    },
};
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use tokio::task::yield_now;

pub const ROOM: &str = "QUIZ42";

pub struct Arena {
    pub state: SharedState,
    pub store: MemoryDocumentStore,
    pub tokens: Arc<TokenRegistry>,
    /// Revision conflicts seen through a [`YieldingStore`]; stays at zero otherwise.
    pub conflicts: Arc<AtomicUsize>,
}

impl Arena {
    pub async fn new() -> Self {
        Self::with_config(AppConfig::default()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        Self::build(config, false).await
    }

    /// Arena whose store yields before every call, so concurrent callers interleave.
    pub async fn racing() -> Self {
        Self::build(AppConfig::default(), true).await
    }

    async fn build(config: AppConfig, yielding: bool) -> Self {
        let store = MemoryDocumentStore::new();
        let conflicts = Arc::new(AtomicUsize::new(0));
        let tokens = Arc::new(TokenRegistry::new());
        for uid in ["host", "ada", "bob", "cy"] {
            tokens.register(format!("tok-{uid}"), uid);
        }
        let backend: Arc<dyn DocumentStore> = if yielding {
            Arc::new(YieldingStore {
                inner: store.clone(),
                conflicts: conflicts.clone(),
            })
        } else {
            Arc::new(store.clone())
        };
        let state = AppState::with_store(config, tokens.clone(), backend).await;
        Self {
            state,
            store,
            tokens,
            conflicts,
        }
    }

    pub fn conflicts(&self) -> usize {
        self.conflicts.load(Ordering::SeqCst)
    }

    /// Waiting room `QUIZ42` hosted by `host`, with the given questions.
    pub async fn room_with(&self, questions: usize) -> Room {
        lifecycle_service::create_room(&self.state, &caller("host"), new_room(ROOM, questions))
            .await
            .expect("room created")
    }

    pub async fn join(&self, uid: &str) {
        session_service::join_room(&self.state, ROOM, &caller(uid), uid)
            .await
            .expect("player joined");
    }

    /// Pretend the current host has been silent for `silence`.
    pub async fn silence_host(&self, silence: Duration) {
        let last_seen = SystemTime::now() - silence;
        self.store
            .update_document(
                &paths::room_path(ROOM),
                rooms::patch(json!({ "host_last_seen": last_seen })),
                None,
            )
            .await
            .expect("host_last_seen back-dated");
    }
}

pub fn caller(uid: &str) -> CallerIdentity {
    CallerIdentity::new(uid)
}

/// Questions whose correct option is always index 1.
pub fn quiz(questions: usize) -> Vec<Question> {
    (0..questions)
        .map(|index| Question {
            question: format!("Question {index}?"),
            options: vec!["wrong".into(), "right".into(), "also wrong".into()],
            correct_index: 1,
            kind: QuestionKind::MultipleChoice,
        })
        .collect()
}

pub fn new_room(room_id: &str, questions: usize) -> NewRoom {
    NewRoom {
        room_id: room_id.into(),
        title: "Friday quiz".into(),
        public: true,
        host_name: "Host".into(),
        quiz: quiz(questions),
        question_duration: Some(Duration::from_secs(20)),
    }
}

/// Memory store that hands control back to the scheduler before each operation.
pub struct YieldingStore {
    inner: MemoryDocumentStore,
    conflicts: Arc<AtomicUsize>,
}

impl DocumentStore for YieldingStore {
    fn create_document(
        &self,
        path: &str,
        data: Value,
    ) -> BoxFuture<'static, StorageResult<Revision>> {
        let inner = self.inner.clone();
        let path = path.to_string();
        Box::pin(async move {
            yield_now().await;
            inner.create_document(&path, data).await
        })
    }

    fn get_document(&self, path: &str) -> BoxFuture<'static, StorageResult<Option<Document>>> {
        let inner = self.inner.clone();
        let path = path.to_string();
        Box::pin(async move {
            yield_now().await;
            inner.get_document(&path).await
        })
    }

    fn update_document(
        &self,
        path: &str,
        patch: Map<String, Value>,
        expected: Option<Revision>,
    ) -> BoxFuture<'static, StorageResult<Revision>> {
        let inner = self.inner.clone();
        let conflicts = self.conflicts.clone();
        let path = path.to_string();
        Box::pin(async move {
            yield_now().await;
            let result = inner.update_document(&path, patch, expected).await;
            if matches!(result, Err(StorageError::Conflict(_))) {
                conflicts.fetch_add(1, Ordering::SeqCst);
            }
            result
        })
    }

    fn delete_document(&self, path: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        let path = path.to_string();
        Box::pin(async move {
            yield_now().await;
            inner.delete_document(&path).await
        })
    }

    fn list_collection(&self, path: &str) -> BoxFuture<'static, StorageResult<Vec<Document>>> {
        let inner = self.inner.clone();
        let path = path.to_string();
        Box::pin(async move {
            yield_now().await;
            inner.list_collection(&path).await
        })
    }

    fn subscribe_document(&self, path: &str) -> BoxFuture<'static, StorageResult<ChangeStream>> {
        self.inner.subscribe_document(path)
    }

    fn subscribe_collection(
        &self,
        path: &str,
    ) -> BoxFuture<'static, StorageResult<ChangeStream>> {
        self.inner.subscribe_collection(path)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.try_reconnect()
    }
}
