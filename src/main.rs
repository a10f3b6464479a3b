//! Arena Back binary entrypoint wiring the REST and SSE surfaces to the document store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arena_back::{
    config::AppConfig,
    dao::{
        document_store::{DocumentStore, MemoryDocumentStore},
        storage::StorageError,
    },
    routes,
    services::{
        auth::TokenRegistry,
        storage_supervisor::{self, SupervisorPolicy},
    },
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let verifier = Arc::new(TokenRegistry::from_config(&config.tokens));
    let app_state = AppState::new(config, verifier);

    spawn_storage_supervisor(app_state.clone())?;
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Pick the document store backend from `ARENA_STORE` and supervise its connection.
fn spawn_storage_supervisor(state: SharedState) -> anyhow::Result<()> {
    let backend = env::var("ARENA_STORE").unwrap_or_else(|_| "memory".into());
    let policy = SupervisorPolicy::default();

    match backend.as_str() {
        "memory" => {
            let store = MemoryDocumentStore::new();
            tokio::spawn(storage_supervisor::run(state, "memory", policy, move || {
                let store: Arc<dyn DocumentStore> = Arc::new(store.clone());
                async move { Ok::<_, StorageError>(store) }
            }));
        }
        #[cfg(feature = "couch-store")]
        "couch" => {
            use arena_back::dao::document_store::couchdb::{CouchConfig, CouchDocumentStore};

            let couch = CouchConfig::from_env().context("reading CouchDB settings")?;
            tokio::spawn(storage_supervisor::run(state, "couchdb", policy, move || {
                let couch = couch.clone();
                async move {
                    let store = CouchDocumentStore::connect(couch).await?;
                    Ok::<Arc<dyn DocumentStore>, StorageError>(Arc::new(store))
                }
            }));
        }
        other => anyhow::bail!("unknown ARENA_STORE backend `{other}`"),
    }

    info!(backend = %backend, "document store supervisor started");
    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let Ok(mut term) = signal(SignalKind::terminate()) else {
            let _ = tokio::signal::ctrl_c().await;
            return;
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
