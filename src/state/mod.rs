pub mod room;
pub mod state_machine;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::{document_store::DocumentStore, rooms::RoomRepository},
    error::ServiceError,
    services::auth::IdentityVerifier,
};

pub type SharedState = Arc<AppState>;

/// Central application state: the installed document store, configuration and verifier.
///
/// Room data itself never lives here; every operation reads the store afresh.
pub struct AppState {
    document_store: RwLock<Option<Arc<dyn DocumentStore>>>,
    degraded: watch::Sender<bool>,
    config: AppConfig,
    verifier: Arc<dyn IdentityVerifier>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig, verifier: Arc<dyn IdentityVerifier>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            document_store: RwLock::new(None),
            degraded: degraded_tx,
            config,
            verifier,
        })
    }

    /// Shortcut used by tests and the in-memory backend: build and install in one go.
    pub async fn with_store(
        config: AppConfig,
        verifier: Arc<dyn IdentityVerifier>,
        store: Arc<dyn DocumentStore>,
    ) -> SharedState {
        let state = Self::new(config, verifier);
        state.set_document_store(store).await;
        state
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn verifier(&self) -> &Arc<dyn IdentityVerifier> {
        &self.verifier
    }

    /// Obtain a handle to the current document store, if one is installed.
    pub async fn document_store(&self) -> Option<Arc<dyn DocumentStore>> {
        let guard = self.document_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store or [`ServiceError::Degraded`].
    pub async fn require_document_store(&self) -> Result<Arc<dyn DocumentStore>, ServiceError> {
        self.document_store().await.ok_or(ServiceError::Degraded)
    }

    /// Typed repository over the current store.
    pub async fn rooms(&self) -> Result<RoomRepository, ServiceError> {
        Ok(RoomRepository::new(self.require_document_store().await?))
    }

    /// Install a new document store implementation and leave degraded mode.
    pub async fn set_document_store(&self, store: Arc<dyn DocumentStore>) {
        {
            let mut guard = self.document_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_document_store(&self) {
        {
            let mut guard = self.document_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }
}
