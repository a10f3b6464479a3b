#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
pub mod paths;

use futures::{future::BoxFuture, stream::BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dao::storage::StorageResult;

pub use self::memory::MemoryDocumentStore;

/// Opaque revision token used for compare-and-set updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision(pub String);

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored document together with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: String,
    pub revision: Revision,
    pub data: Value,
}

/// Snapshot pushed by a realtime subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Current state of a single document (`None` once deleted).
    Document {
        path: String,
        document: Option<Document>,
    },
    /// Current direct children of a collection, in store listing order.
    Collection {
        path: String,
        documents: Vec<Document>,
    },
}

/// What a subscription watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedTarget {
    Document(String),
    Collection(String),
}

impl FeedTarget {
    pub fn path(&self) -> &str {
        match self {
            FeedTarget::Document(path) | FeedTarget::Collection(path) => path,
        }
    }

    /// Whether a write to `changed` affects this target.
    pub fn matches(&self, changed: &str) -> bool {
        match self {
            FeedTarget::Document(path) => path == changed,
            FeedTarget::Collection(path) => paths::is_direct_child(path, changed),
        }
    }
}

/// Stream of snapshots; the first item always reflects the state at subscription time.
pub type ChangeStream = BoxStream<'static, StorageResult<FeedEvent>>;

/// Narrow contract over the external document store and its change feed.
///
/// Updates are atomic per document. `update_document` with an expected revision is a
/// compare-and-set: it fails with [`StorageError::Conflict`](crate::dao::storage::StorageError)
/// when the document moved on since that revision was read.
pub trait DocumentStore: Send + Sync {
    /// Create a document, failing with `AlreadyExists` if the path is taken.
    fn create_document(&self, path: &str, data: Value)
    -> BoxFuture<'static, StorageResult<Revision>>;
    fn get_document(&self, path: &str) -> BoxFuture<'static, StorageResult<Option<Document>>>;
    /// Shallow-merge `patch` into the top-level fields of an existing document.
    fn update_document(
        &self,
        path: &str,
        patch: Map<String, Value>,
        expected: Option<Revision>,
    ) -> BoxFuture<'static, StorageResult<Revision>>;
    /// Delete a document, returning whether it existed.
    fn delete_document(&self, path: &str) -> BoxFuture<'static, StorageResult<bool>>;
    /// List the direct children of a collection path.
    fn list_collection(&self, path: &str) -> BoxFuture<'static, StorageResult<Vec<Document>>>;
    fn subscribe_document(&self, path: &str) -> BoxFuture<'static, StorageResult<ChangeStream>>;
    fn subscribe_collection(&self, path: &str)
    -> BoxFuture<'static, StorageResult<ChangeStream>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Merge top-level `patch` fields into `target`, turning non-objects into objects.
pub(crate) fn merge_patch(target: &mut Value, patch: Map<String, Value>) {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(fields) = target {
        fields.extend(patch);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn merge_patch_overwrites_only_named_fields() {
        let mut doc = json!({"name": "Ada", "score": 20, "answers": {"0": {"correct": true}}});
        let patch = json!({"name": "Ada L."});
        let Value::Object(patch) = patch else {
            unreachable!()
        };

        merge_patch(&mut doc, patch);

        assert_eq!(doc["name"], "Ada L.");
        assert_eq!(doc["score"], 20);
        assert_eq!(doc["answers"]["0"]["correct"], true);
    }
}
