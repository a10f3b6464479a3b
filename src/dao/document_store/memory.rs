//! In-process document store keyed by path, used as the default backend and in tests.

use std::{
    io,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::future::{self, BoxFuture};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tokio::sync::{
    broadcast::{self, error::RecvError},
    watch,
};

use super::{
    ChangeStream, Document, DocumentStore, FeedEvent, FeedTarget, Revision, merge_patch, paths,
};
use crate::dao::storage::{StorageError, StorageResult};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    documents: Mutex<IndexMap<String, StoredDocument>>,
    changes: broadcast::Sender<String>,
    offline: watch::Sender<bool>,
    revision_seq: AtomicU64,
}

struct StoredDocument {
    revision: u64,
    data: Value,
}

enum Step {
    Changed(Result<String, RecvError>),
    OfflineToggled(bool),
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (offline, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(MemoryInner {
                documents: Mutex::new(IndexMap::new()),
                changes,
                offline,
                revision_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Simulate a network partition: while offline every call fails with a retryable
    /// error and open subscriptions are torn down.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.send_replace(offline);
    }

    fn documents(&self) -> MutexGuard<'_, IndexMap<String, StoredDocument>> {
        // A poisoned lock only means another caller panicked mid-write; the map is still usable.
        self.inner
            .documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_online(&self) -> StorageResult<()> {
        if *self.inner.offline.borrow() {
            return Err(StorageError::unavailable(
                "memory store offline".into(),
                io::Error::new(io::ErrorKind::NotConnected, "offline"),
            ));
        }
        Ok(())
    }

    fn next_revision(&self) -> u64 {
        self.inner.revision_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, path: &str) {
        let _ = self.inner.changes.send(path.to_string());
    }

    fn create(&self, path: &str, data: Value) -> StorageResult<Revision> {
        self.ensure_online()?;
        let revision = {
            let mut documents = self.documents();
            if documents.contains_key(path) {
                return Err(StorageError::AlreadyExists(path.to_string()));
            }
            let revision = self.next_revision();
            documents.insert(path.to_string(), StoredDocument { revision, data });
            revision
        };
        self.notify(path);
        Ok(Revision(revision.to_string()))
    }

    fn get(&self, path: &str) -> StorageResult<Option<Document>> {
        self.ensure_online()?;
        Ok(self.documents().get(path).map(|stored| Document {
            path: path.to_string(),
            revision: Revision(stored.revision.to_string()),
            data: stored.data.clone(),
        }))
    }

    fn update(
        &self,
        path: &str,
        patch: Map<String, Value>,
        expected: Option<Revision>,
    ) -> StorageResult<Revision> {
        self.ensure_online()?;
        let revision = {
            let mut documents = self.documents();
            let Some(stored) = documents.get_mut(path) else {
                return Err(StorageError::NotFound(path.to_string()));
            };
            if let Some(expected) = expected
                && expected.0 != stored.revision.to_string()
            {
                return Err(StorageError::Conflict(path.to_string()));
            }
            merge_patch(&mut stored.data, patch);
            stored.revision = self.next_revision();
            stored.revision
        };
        self.notify(path);
        Ok(Revision(revision.to_string()))
    }

    fn delete(&self, path: &str) -> StorageResult<bool> {
        self.ensure_online()?;
        let existed = self.documents().shift_remove(path).is_some();
        if existed {
            self.notify(path);
        }
        Ok(existed)
    }

    fn list(&self, collection: &str) -> StorageResult<Vec<Document>> {
        self.ensure_online()?;
        Ok(self
            .documents()
            .iter()
            .filter(|(path, _)| paths::is_direct_child(collection, path))
            .map(|(path, stored)| Document {
                path: path.clone(),
                revision: Revision(stored.revision.to_string()),
                data: stored.data.clone(),
            })
            .collect())
    }

    fn snapshot(&self, target: &FeedTarget) -> StorageResult<FeedEvent> {
        match target {
            FeedTarget::Document(path) => Ok(FeedEvent::Document {
                path: path.clone(),
                document: self.get(path)?,
            }),
            FeedTarget::Collection(path) => Ok(FeedEvent::Collection {
                path: path.clone(),
                documents: self.list(path)?,
            }),
        }
    }

    fn subscribe(&self, target: FeedTarget) -> StorageResult<ChangeStream> {
        self.ensure_online()?;
        let store = self.clone();
        let mut changes = self.inner.changes.subscribe();
        let mut offline = self.inner.offline.subscribe();

        let stream = async_stream::stream! {
            yield store.snapshot(&target);
            loop {
                let step = tokio::select! {
                    changed = changes.recv() => Step::Changed(changed),
                    toggled = offline.changed() => Step::OfflineToggled(toggled.is_ok()),
                };

                match step {
                    Step::Changed(Ok(path)) => {
                        if target.matches(&path) {
                            yield store.snapshot(&target);
                        }
                    }
                    // Missed notifications are folded into one fresh snapshot.
                    Step::Changed(Err(RecvError::Lagged(_))) => {
                        yield store.snapshot(&target);
                    }
                    Step::Changed(Err(RecvError::Closed)) | Step::OfflineToggled(false) => {
                        yield Err(StorageError::SubscriptionClosed(target.path().to_string()));
                        break;
                    }
                    Step::OfflineToggled(true) => {
                        if let Err(err) = store.ensure_online() {
                            yield Err(err);
                            break;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn create_document(
        &self,
        path: &str,
        data: Value,
    ) -> BoxFuture<'static, StorageResult<Revision>> {
        Box::pin(future::ready(self.create(path, data)))
    }

    fn get_document(&self, path: &str) -> BoxFuture<'static, StorageResult<Option<Document>>> {
        Box::pin(future::ready(self.get(path)))
    }

    fn update_document(
        &self,
        path: &str,
        patch: Map<String, Value>,
        expected: Option<Revision>,
    ) -> BoxFuture<'static, StorageResult<Revision>> {
        Box::pin(future::ready(self.update(path, patch, expected)))
    }

    fn delete_document(&self, path: &str) -> BoxFuture<'static, StorageResult<bool>> {
        Box::pin(future::ready(self.delete(path)))
    }

    fn list_collection(&self, path: &str) -> BoxFuture<'static, StorageResult<Vec<Document>>> {
        Box::pin(future::ready(self.list(path)))
    }

    fn subscribe_document(&self, path: &str) -> BoxFuture<'static, StorageResult<ChangeStream>> {
        Box::pin(future::ready(
            self.subscribe(FeedTarget::Document(path.to_string())),
        ))
    }

    fn subscribe_collection(
        &self,
        path: &str,
    ) -> BoxFuture<'static, StorageResult<ChangeStream>> {
        Box::pin(future::ready(
            self.subscribe(FeedTarget::Collection(path.to_string())),
        ))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(future::ready(self.ensure_online()))
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(future::ready(self.ensure_online()))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;

    use super::*;

    fn patch(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_fails_when_path_taken() {
        let store = MemoryDocumentStore::new();
        store
            .create_document("rooms/ABC", json!({"host_id": "h"}))
            .await
            .unwrap();

        let err = store
            .create_document("rooms/ABC", json!({"host_id": "other"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));

        let doc = store.get_document("rooms/ABC").await.unwrap().unwrap();
        assert_eq!(doc.data["host_id"], "h");
    }

    #[tokio::test]
    async fn stale_revision_is_rejected() {
        let store = MemoryDocumentStore::new();
        let first = store
            .create_document("rooms/ABC", json!({"current_question": 0}))
            .await
            .unwrap();

        store
            .update_document(
                "rooms/ABC",
                patch(json!({"current_question": 1})),
                Some(first.clone()),
            )
            .await
            .unwrap();
        let err = store
            .update_document(
                "rooms/ABC",
                patch(json!({"current_question": 1})),
                Some(first),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Conflict(_)));
        let doc = store.get_document("rooms/ABC").await.unwrap().unwrap();
        assert_eq!(doc.data["current_question"], 1);
    }

    #[tokio::test]
    async fn collections_list_direct_children_in_insertion_order() {
        let store = MemoryDocumentStore::new();
        store.create_document("rooms/A", json!({})).await.unwrap();
        store
            .create_document("rooms/A/players/zed", json!({}))
            .await
            .unwrap();
        store
            .create_document("rooms/A/players/amy", json!({}))
            .await
            .unwrap();

        let players = store.list_collection("rooms/A/players").await.unwrap();
        let ids: Vec<_> = players.iter().map(|doc| paths::leaf(&doc.path)).collect();
        assert_eq!(ids, vec!["zed", "amy"]);

        let rooms = store.list_collection("rooms").await.unwrap();
        assert_eq!(rooms.len(), 1);
    }

    #[tokio::test]
    async fn document_subscription_starts_with_snapshot_and_follows_writes() {
        let store = MemoryDocumentStore::new();
        store
            .create_document("rooms/A", json!({"n": 1}))
            .await
            .unwrap();
        let mut feed = store.subscribe_document("rooms/A").await.unwrap();

        let first = feed.next().await.unwrap().unwrap();
        store
            .update_document("rooms/B", Map::new(), None)
            .await
            .unwrap_err();
        store
            .update_document("rooms/A", patch(json!({"n": 2})), None)
            .await
            .unwrap();
        let second = feed.next().await.unwrap().unwrap();

        let FeedEvent::Document {
            document: Some(first),
            ..
        } = first
        else {
            panic!("expected document snapshot");
        };
        let FeedEvent::Document {
            document: Some(second),
            ..
        } = second
        else {
            panic!("expected document snapshot");
        };
        assert_eq!(first.data["n"], 1);
        assert_eq!(second.data["n"], 2);
    }

    #[tokio::test]
    async fn going_offline_breaks_open_subscriptions() {
        let store = MemoryDocumentStore::new();
        let mut feed = store.subscribe_collection("rooms").await.unwrap();
        feed.next().await.unwrap().unwrap();

        store.set_offline(true);

        let err = feed.next().await.unwrap().unwrap_err();
        assert!(err.is_retryable());
        assert!(feed.next().await.is_none());
        assert!(store.subscribe_collection("rooms").await.is_err());
    }
}
