use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tracing::warn;

use crate::dao::{
    document_store::{Document, DocumentStore, Revision, merge_patch, paths},
    models::{PlayerEntity, RoomEntity},
    storage::{StorageError, StorageResult},
};

/// A decoded entity together with the revision it was read at.
#[derive(Debug, Clone)]
pub struct Stored<T> {
    pub revision: Revision,
    pub value: T,
}

/// Typed access to room and player documents.
#[derive(Clone)]
pub struct RoomRepository {
    store: Arc<dyn DocumentStore>,
}

impl RoomRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Conditional create: fails with `AlreadyExists` when the code is taken.
    pub async fn create_room(&self, room: &RoomEntity) -> StorageResult<Revision> {
        let path = paths::room_path(&room.room_id);
        let data = encode(&path, room)?;
        self.store.create_document(&path, data).await
    }

    pub async fn find_room(&self, room_id: &str) -> StorageResult<Option<Stored<RoomEntity>>> {
        let path = paths::room_path(room_id);
        self.store
            .get_document(&path)
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn update_room(
        &self,
        room_id: &str,
        patch: Map<String, Value>,
        expected: Option<Revision>,
    ) -> StorageResult<Revision> {
        self.store
            .update_document(&paths::room_path(room_id), patch, expected)
            .await
    }

    /// All rooms; documents that fail to decode are skipped.
    pub async fn list_rooms(&self) -> StorageResult<Vec<RoomEntity>> {
        let documents = self.store.list_collection(paths::ROOMS_COLLECTION).await?;
        Ok(decode_all(documents))
    }

    pub async fn create_player(
        &self,
        room_id: &str,
        player: &PlayerEntity,
    ) -> StorageResult<Revision> {
        let path = paths::player_path(room_id, &player.user_id);
        let data = encode(&path, player)?;
        self.store.create_document(&path, data).await
    }

    pub async fn find_player(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> StorageResult<Option<Stored<PlayerEntity>>> {
        let path = paths::player_path(room_id, user_id);
        self.store
            .get_document(&path)
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn update_player(
        &self,
        room_id: &str,
        user_id: &str,
        patch: Map<String, Value>,
        expected: Option<Revision>,
    ) -> StorageResult<Revision> {
        self.store
            .update_document(&paths::player_path(room_id, user_id), patch, expected)
            .await
    }

    pub async fn delete_player(&self, room_id: &str, user_id: &str) -> StorageResult<bool> {
        self.store
            .delete_document(&paths::player_path(room_id, user_id))
            .await
    }

    /// Roster in store listing order.
    pub async fn list_players(&self, room_id: &str) -> StorageResult<Vec<PlayerEntity>> {
        let documents = self
            .store
            .list_collection(&paths::players_path(room_id))
            .await?;
        Ok(decode_all(documents))
    }
}

/// Decode a raw document into a typed entity.
pub fn decode<T>(document: Document) -> StorageResult<Stored<T>>
where
    T: DeserializeOwned,
{
    let Document {
        path,
        revision,
        data,
    } = document;
    let value = serde_json::from_value(data).map_err(|source| StorageError::Malformed {
        path: path.clone(),
        source,
    })?;
    Ok(Stored { revision, value })
}

/// Decode a collection snapshot, dropping (and logging) malformed entries.
pub fn decode_all<T>(documents: Vec<Document>) -> Vec<T>
where
    T: DeserializeOwned,
{
    documents
        .into_iter()
        .filter_map(|document| match decode::<T>(document) {
            Ok(stored) => Some(stored.value),
            Err(err) => {
                warn!(error = %err, "skipping malformed document");
                None
            }
        })
        .collect()
}

fn encode<T>(path: &str, value: &T) -> StorageResult<Value>
where
    T: Serialize,
{
    serde_json::to_value(value).map_err(|source| StorageError::Malformed {
        path: path.to_string(),
        source,
    })
}

/// Apply an update patch to an in-memory entity the same way the store merges it.
pub fn patched<T>(path: &str, value: &T, patch: &Map<String, Value>) -> StorageResult<T>
where
    T: Serialize + DeserializeOwned,
{
    let mut data = encode(path, value)?;
    merge_patch(&mut data, patch.clone());
    serde_json::from_value(data).map_err(|source| StorageError::Malformed {
        path: path.to_string(),
        source,
    })
}

/// Turn a `json!({...})` literal into an update patch.
pub fn patch(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(fields) => fields,
        _ => Map::new(),
    }
}
