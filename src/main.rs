//! Party quiz device entrypoint wiring the session store, sync loops, REST and SSE layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use party_quiz::{
    config::AppConfig,
    dao::{identity::FileIdentityStore, session_store::memory::MemoryStore},
    routes,
    services::{quiz_service, sse_events},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let bank = config.question_bank();
    let identity = Arc::new(FileIdentityStore::new(config.identity_path.clone()));
    let app_state = AppState::new(config, bank, identity);

    install_session_store(&app_state).await;
    sse_events::spawn_status_forwarder(app_state.clone());
    tokio::spawn(resume_when_ready(app_state.clone()));

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

/// Pick the session store from `QUIZ_STORE` (`memory` or `mongo`).
async fn install_session_store(state: &SharedState) {
    let default_backend = if cfg!(feature = "mongo-store") {
        "mongo"
    } else {
        "memory"
    };
    let backend = env::var("QUIZ_STORE").unwrap_or_else(|_| default_backend.into());

    match backend.as_str() {
        #[cfg(feature = "mongo-store")]
        "mongo" => {
            use party_quiz::dao::{
                session_store::{
                    SessionStore,
                    mongodb::{MongoConfig, MongoSessionStore},
                },
                storage::StorageError,
            };
            use party_quiz::services::storage_supervisor;

            tokio::spawn(storage_supervisor::run(state.clone(), || async {
                let config = MongoConfig::from_env().await?;
                let store = MongoSessionStore::connect(config).await?;
                Ok::<_, StorageError>(Arc::new(store) as Arc<dyn SessionStore>)
            }));
            info!("session store: mongodb (connecting in the background)");
        }
        other => {
            if other != "memory" {
                warn!(backend = other, "unknown QUIZ_STORE value; using the in-memory store");
            }
            state.set_session_store(Arc::new(MemoryStore::new())).await;
            info!("session store: in-memory (single process only)");
        }
    }
}

/// Re-enter the persisted session as soon as the store is reachable.
async fn resume_when_ready(state: SharedState) {
    let mut degraded = state.degraded_watcher();
    if degraded.wait_for(|degraded| !*degraded).await.is_err() {
        return;
    }
    match quiz_service::resume(&state).await {
        Ok(Some(_)) => info!("device identity restored"),
        Ok(None) => info!("no session to resume; waiting for create or join"),
        Err(err) => warn!(error = %err, "failed to resume session"),
    }
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

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
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
