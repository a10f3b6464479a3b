//! Error types for the CouchDB document store.

use reqwest::StatusCode;
use thiserror::Error;

use crate::dao::storage::StorageError;

/// Convenient result alias returning [`CouchDaoError`] failures.
pub type CouchResult<T> = Result<T, CouchDaoError>;

/// Failures that can occur while interacting with CouchDB.
#[derive(Debug, Error)]
pub enum CouchDaoError {
    /// Required environment variable is missing.
    #[error("missing CouchDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build CouchDB client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// CouchDB could not be reached for a database-level request.
    #[error("failed to reach CouchDB database `{database}`")]
    DatabaseQuery {
        database: String,
        #[source]
        source: reqwest::Error,
    },
    /// CouchDB returned an unexpected status code for a database operation.
    #[error("unexpected CouchDB database response status {status} for `{database}`")]
    DatabaseStatus {
        database: String,
        status: StatusCode,
    },
    /// A request to a document endpoint could not be sent.
    #[error("failed to send CouchDB request to `{path}`")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// CouchDB returned an unexpected status code for a document endpoint.
    #[error("unexpected CouchDB response status {status} for `{path}`")]
    RequestStatus { path: String, status: StatusCode },
    /// Response payload could not be parsed into JSON.
    #[error("failed to decode CouchDB response for `{path}`")]
    DecodeResponse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// The document already exists (409 on create).
    #[error("document `{path}` already exists")]
    AlreadyExists { path: String },
    /// The revision we wrote against is no longer current (409 on update).
    #[error("revision conflict on `{path}`")]
    Conflict { path: String },
    /// The target document is missing.
    #[error("document `{path}` not found")]
    NotFound { path: String },
}

impl From<CouchDaoError> for StorageError {
    fn from(err: CouchDaoError) -> Self {
        match err {
            CouchDaoError::AlreadyExists { path } => StorageError::AlreadyExists(path),
            CouchDaoError::Conflict { path } => StorageError::Conflict(path),
            CouchDaoError::NotFound { path } => StorageError::NotFound(path),
            CouchDaoError::RequestSend { ref source, ref path }
            | CouchDaoError::DecodeResponse { ref source, ref path }
                if source.is_timeout() =>
            {
                StorageError::Timeout(path.clone())
            }
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
