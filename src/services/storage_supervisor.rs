use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{document_store::DocumentStore, storage::StorageError},
    state::SharedState,
};

/// Timing of the supervision loop.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub health_poll_interval: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(10),
            health_poll_interval: Duration::from_secs(5),
            max_reconnect_attempts: 3,
        }
    }
}

/// Connect the document store, keep polling its health and flip degraded mode when it
/// becomes unreachable. Never returns.
pub async fn run<F, Fut>(
    state: SharedState,
    backend: &'static str,
    policy: SupervisorPolicy,
    mut connect: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn DocumentStore>, StorageError>> + Send,
{
    let mut delay = policy.initial_delay;

    loop {
        let store = match connect().await {
            Ok(store) => store,
            Err(err) => {
                warn!(backend, error = %err, "document store connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
                continue;
            }
        };

        state.set_document_store(store.clone()).await;
        info!(backend, "document store connected; leaving degraded mode");
        delay = policy.initial_delay;

        loop {
            match store.health_check().await {
                Ok(()) => {
                    if state.is_degraded().await {
                        info!(backend, "document store healthy again; leaving degraded mode");
                        state.update_degraded(false).await;
                    }
                    sleep(policy.health_poll_interval).await;
                }
                Err(err) => {
                    warn!(backend, error = %err, "document store health check failed");
                    if reconnect(&state, store.as_ref(), backend, &policy).await {
                        state.update_degraded(false).await;
                        sleep(policy.health_poll_interval).await;
                    } else {
                        warn!(backend, "exhausted reconnect attempts; dropping the store");
                        state.clear_document_store().await;
                        break;
                    }
                }
            }
        }

        sleep(delay).await;
        delay = (delay * 2).min(policy.max_delay);
    }
}

/// Bounded reconnect loop; enters degraded mode on the first failure.
async fn reconnect(
    state: &SharedState,
    store: &dyn DocumentStore,
    backend: &'static str,
    policy: &SupervisorPolicy,
) -> bool {
    let mut delay = policy.initial_delay;

    for attempt in 0..policy.max_reconnect_attempts {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(backend, attempt, "document store reconnected");
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(backend, attempt, error = %err, "reconnect failed; entering degraded mode");
                    state.update_degraded(true).await;
                } else {
                    warn!(backend, attempt, error = %err, "reconnect attempt failed");
                }
                sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::document_store::MemoryDocumentStore,
        services::auth::TokenRegistry,
        state::AppState,
    };

    #[tokio::test(start_paused = true)]
    async fn outage_toggles_degraded_mode() {
        let state = AppState::new(AppConfig::default(), Arc::new(TokenRegistry::new()));
        let memory = MemoryDocumentStore::new();
        let connected = memory.clone();
        let mut degraded = state.degraded_watcher();

        tokio::spawn(run(
            state.clone(),
            "memory",
            SupervisorPolicy::default(),
            move || {
                let store: Arc<dyn DocumentStore> = Arc::new(connected.clone());
                async move { Ok::<_, StorageError>(store) }
            },
        ));

        degraded.wait_for(|flag| !*flag).await.unwrap();
        assert!(state.document_store().await.is_some());

        memory.set_offline(true);
        degraded.wait_for(|flag| *flag).await.unwrap();

        memory.set_offline(false);
        degraded.wait_for(|flag| !*flag).await.unwrap();
        assert!(!state.is_degraded().await);
    }
}
