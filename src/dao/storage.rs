use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("storage request timed out: {0}")]
    Timeout(String),
    #[error("document `{0}` already exists")]
    AlreadyExists(String),
    #[error("document `{0}` not found")]
    NotFound(String),
    #[error("revision conflict on `{0}`")]
    Conflict(String),
    #[error("malformed document `{path}`")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("subscription to `{0}` closed")]
    SubscriptionClosed(String),
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Whether retrying the same call later can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Unavailable { .. }
                | StorageError::Timeout(_)
                | StorageError::SubscriptionClosed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_class_errors_are_retryable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(StorageError::unavailable("down".into(), io).is_retryable());
        assert!(StorageError::Timeout("rooms/ABC".into()).is_retryable());
        assert!(StorageError::SubscriptionClosed("rooms/ABC".into()).is_retryable());
    }

    #[test]
    fn logical_errors_are_fatal() {
        assert!(!StorageError::NotFound("rooms/ABC".into()).is_retryable());
        assert!(!StorageError::Conflict("rooms/ABC".into()).is_retryable());
        assert!(!StorageError::AlreadyExists("rooms/ABC".into()).is_retryable());
    }
}
