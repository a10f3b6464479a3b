use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::dao::{
    document_store::{
        ChangeStream, Document, DocumentStore, FeedEvent, FeedTarget, Revision, merge_patch, paths,
    },
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, ChangesResponse, END_SUFFIX, WriteResponse, encode_doc_id, into_body,
        into_document, seq_to_string,
    },
};

/// Unconditional updates retry this many times when another writer races them.
const UNCONDITIONAL_UPDATE_ATTEMPTS: usize = 5;
const ALL_DOCS: &str = "_all_docs";
const CHANGES: &str = "_changes";

#[derive(Clone)]
pub struct CouchDocumentStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    longpoll_timeout: Duration,
}

impl CouchDocumentStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
            longpoll_timeout: config.longpoll_timeout,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    /// Request against a raw endpoint of the database (`_all_docs`, `_changes`, ...).
    fn endpoint(&self, method: Method, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.database_url(), endpoint);
        self.with_auth(self.client.request(method, url))
    }

    /// Request against the document stored at `path`.
    fn document(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.endpoint(method, &encode_doc_id(path))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .with_auth(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseQuery {
                        database: database.clone(),
                        source,
                    })?;
                // 412 means another instance created it first.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn decode<T>(response: reqwest::Response, path: &str) -> CouchResult<T>
    where
        T: DeserializeOwned,
    {
        response
            .json::<T>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: path.to_string(),
                source,
            })
    }

    async fn fetch(&self, path: &str) -> CouchResult<Option<Document>> {
        let response = self
            .document(Method::GET, path)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: path.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let raw = Self::decode::<Value>(response, path).await?;
                Ok(into_document(path, raw))
            }
            other => Err(CouchDaoError::RequestStatus {
                path: path.to_string(),
                status: other,
            }),
        }
    }

    async fn put(&self, path: &str, body: &Value) -> CouchResult<Revision> {
        let response = self
            .document(Method::PUT, path)
            .json(body)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: path.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Err(CouchDaoError::Conflict {
                path: path.to_string(),
            }),
            status if status.is_success() => {
                let written = Self::decode::<WriteResponse>(response, path).await?;
                Ok(Revision(written.rev))
            }
            other => Err(CouchDaoError::RequestStatus {
                path: path.to_string(),
                status: other,
            }),
        }
    }

    async fn create(&self, path: &str, data: Value) -> CouchResult<Revision> {
        match self.put(path, &into_body(path, data, None)).await {
            Err(CouchDaoError::Conflict { path }) => Err(CouchDaoError::AlreadyExists { path }),
            other => other,
        }
    }

    async fn update(
        &self,
        path: &str,
        patch: Map<String, Value>,
        expected: Option<Revision>,
    ) -> CouchResult<Revision> {
        let attempts = if expected.is_some() {
            1
        } else {
            UNCONDITIONAL_UPDATE_ATTEMPTS
        };

        let mut last_conflict = None;
        for _ in 0..attempts {
            let current = self
                .fetch(path)
                .await?
                .ok_or_else(|| CouchDaoError::NotFound {
                    path: path.to_string(),
                })?;

            if let Some(expected) = &expected
                && *expected != current.revision
            {
                return Err(CouchDaoError::Conflict {
                    path: path.to_string(),
                });
            }

            let mut data = current.data;
            merge_patch(&mut data, patch.clone());
            match self
                .put(path, &into_body(path, data, Some(&current.revision)))
                .await
            {
                Err(conflict @ CouchDaoError::Conflict { .. }) => last_conflict = Some(conflict),
                other => return other,
            }
        }

        Err(last_conflict.unwrap_or(CouchDaoError::Conflict {
            path: path.to_string(),
        }))
    }

    async fn delete(&self, path: &str) -> CouchResult<bool> {
        let Some(current) = self.fetch(path).await? else {
            return Ok(false);
        };

        let response = self
            .document(Method::DELETE, path)
            .query(&[("rev", current.revision.0.as_str())])
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: path.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            StatusCode::CONFLICT => Err(CouchDaoError::Conflict {
                path: path.to_string(),
            }),
            status if status.is_success() => Ok(true),
            other => Err(CouchDaoError::RequestStatus {
                path: path.to_string(),
                status: other,
            }),
        }
    }

    async fn list(&self, collection: &str) -> CouchResult<Vec<Document>> {
        let prefix = format!("{collection}/");
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", Value::String(prefix.clone()).to_string()),
            (
                "endkey",
                Value::String(format!("{prefix}{END_SUFFIX}")).to_string(),
            ),
        ];

        let response = self
            .endpoint(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = Self::decode::<AllDocsResponse>(response, ALL_DOCS).await?;
        Ok(payload
            .rows
            .into_iter()
            .filter(|row| paths::is_direct_child(collection, &row.id))
            .filter_map(|row| into_document(&row.id, row.doc?))
            .collect())
    }

    async fn changes(&self, since: &str, longpoll: bool) -> CouchResult<ChangesResponse> {
        let mut query = vec![("since", since.to_string())];
        if longpoll {
            query.push(("feed", "longpoll".to_string()));
            query.push((
                "timeout",
                self.longpoll_timeout.as_millis().to_string(),
            ));
        }

        let response = self
            .endpoint(Method::GET, CHANGES)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: CHANGES.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: CHANGES.to_string(),
                status: response.status(),
            });
        }

        Self::decode::<ChangesResponse>(response, CHANGES).await
    }

    async fn snapshot(&self, target: &FeedTarget) -> CouchResult<FeedEvent> {
        match target {
            FeedTarget::Document(path) => Ok(FeedEvent::Document {
                path: path.clone(),
                document: self.fetch(path).await?,
            }),
            FeedTarget::Collection(path) => Ok(FeedEvent::Collection {
                path: path.clone(),
                documents: self.list(path).await?,
            }),
        }
    }

    /// Follow `_changes` with long-polling, re-reading the target whenever a matching id moves.
    fn change_stream(&self, target: FeedTarget) -> ChangeStream {
        let store = self.clone();
        let stream = async_stream::stream! {
            // Pin the sequence before the first snapshot so nothing written in between is lost.
            match store.changes("now", false).await {
                Err(err) => {
                    yield Err(err.into());
                }
                Ok(head) => {
                    let mut since = seq_to_string(&head.last_seq);
                    let first = store.snapshot(&target).await;
                    let failed = first.is_err();
                    yield first.map_err(Into::into);

                    while !failed {
                        match store.changes(&since, true).await {
                            Ok(batch) => {
                                since = seq_to_string(&batch.last_seq);
                                if batch.results.iter().any(|row| target.matches(&row.id)) {
                                    let next = store.snapshot(&target).await;
                                    let broken = next.is_err();
                                    yield next.map_err(Into::into);
                                    if broken {
                                        break;
                                    }
                                }
                            }
                            Err(err) => {
                                yield Err(err.into());
                                break;
                            }
                        }
                    }
                }
            }
        };
        Box::pin(stream)
    }
}

impl DocumentStore for CouchDocumentStore {
    fn create_document(
        &self,
        path: &str,
        data: Value,
    ) -> BoxFuture<'static, StorageResult<Revision>> {
        let store = self.clone();
        let path = path.to_string();
        Box::pin(async move { store.create(&path, data).await.map_err(Into::into) })
    }

    fn get_document(&self, path: &str) -> BoxFuture<'static, StorageResult<Option<Document>>> {
        let store = self.clone();
        let path = path.to_string();
        Box::pin(async move { store.fetch(&path).await.map_err(Into::into) })
    }

    fn update_document(
        &self,
        path: &str,
        patch: Map<String, Value>,
        expected: Option<Revision>,
    ) -> BoxFuture<'static, StorageResult<Revision>> {
        let store = self.clone();
        let path = path.to_string();
        Box::pin(async move {
            store
                .update(&path, patch, expected)
                .await
                .map_err(Into::into)
        })
    }

    fn delete_document(&self, path: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let path = path.to_string();
        Box::pin(async move { store.delete(&path).await.map_err(Into::into) })
    }

    fn list_collection(&self, path: &str) -> BoxFuture<'static, StorageResult<Vec<Document>>> {
        let store = self.clone();
        let path = path.to_string();
        Box::pin(async move { store.list(&path).await.map_err(Into::into) })
    }

    fn subscribe_document(&self, path: &str) -> BoxFuture<'static, StorageResult<ChangeStream>> {
        let stream = self.change_stream(FeedTarget::Document(path.to_string()));
        Box::pin(async move { Ok(stream) })
    }

    fn subscribe_collection(
        &self,
        path: &str,
    ) -> BoxFuture<'static, StorageResult<ChangeStream>> {
        let stream = self.change_stream(FeedTarget::Collection(path.to_string()));
        Box::pin(async move { Ok(stream) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .with_auth(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
