//! Composition root: build every actor, wire the queues, own shutdown.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use tickbridge_config::loader;
use tickbridge_core::{
    ArchiveReader, ArchiveWatcher, DeltaEngine, HealthState, SnapshotExtractor, SubscriptionHub,
    SymbolRegistry, spawn_pipeline,
};

use crate::routes;
use crate::state::AppState;

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_BIND: u8 = 3;
pub const EXIT_ARCHIVE: u8 = 4;

/// Capacity of the watcher -> pipeline update channel. Updates are already
/// debounced, so this only needs to absorb a rollover burst.
const UPDATE_CHANNEL_DEPTH: usize = 256;

/// Run the bridge until a shutdown signal arrives.
pub async fn start(config_path: Option<&Path>, listen_override: Option<&str>) -> u8 {
    let loaded = match loader::load(config_path) {
        Ok(loaded) => loaded,
        Err(err) => {
            error!("cannot start: {err}");
            return EXIT_CONFIG;
        }
    };
    let mut config = loaded.config;
    if let Some(listen) = listen_override {
        config.server.listen = listen.to_string();
    }
    let addr: SocketAddr = match config.server.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!("bad listen address {:?}: {err}", config.server.listen);
            return EXIT_CONFIG;
        }
    };

    let registry = match SymbolRegistry::new(config.symbols.clone()) {
        Ok(registry) => Arc::new(registry),
        Err(err) => {
            error!("cannot start: {err}");
            return EXIT_CONFIG;
        }
    };
    let archive = match ArchiveReader::open(&config.archive.root, config.archive.max_read_bytes) {
        Ok(reader) => Arc::new(reader),
        Err(err) => {
            error!(
                "archive root unreachable at {}: {err}",
                config.archive.root.display()
            );
            return EXIT_ARCHIVE;
        }
    };

    let engine = Arc::new(DeltaEngine::new());
    let hub = Arc::new(SubscriptionHub::new(Arc::clone(&engine), config.hub.clone()));
    let health = Arc::new(HealthState::new());

    let (update_tx, update_rx) = mpsc::channel(UPDATE_CHANNEL_DEPTH);
    let watcher = match ArchiveWatcher::spawn(
        archive.root().to_path_buf(),
        Arc::clone(&registry),
        config.watcher.clone(),
        Arc::clone(&health),
        update_tx,
    ) {
        Ok(watcher) => watcher,
        Err(err) => {
            error!("cannot establish archive watch: {err}");
            return EXIT_ARCHIVE;
        }
    };
    let pipeline = spawn_pipeline(
        update_rx,
        SnapshotExtractor::new(Arc::clone(&archive)),
        Arc::clone(&engine),
        Arc::clone(&hub),
        Arc::clone(&registry),
        Arc::clone(&health),
    );

    let state = AppState {
        registry,
        archive,
        engine,
        hub: Arc::clone(&hub),
        health,
        config_path: loaded.path,
    };
    let app = routes::router(state);

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("cannot bind {addr}: {err}");
            return EXIT_BIND;
        }
    };
    info!(%addr, "bridge listening");

    // One signal task flips the watch flag after putting every subscription
    // into draining; the server then gets a bounded window to flush.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received, draining subscriptions");
            hub.drain_all();
            let _ = shutdown_tx.send(true);
        });
    }

    let graceful = {
        let mut rx = shutdown_rx.clone();
        async move {
            let _ = rx.wait_for(|fired| *fired).await;
        }
    };
    let serve = std::future::IntoFuture::into_future(
        axum::serve(listener, app).with_graceful_shutdown(graceful),
    );
    tokio::pin!(serve);

    let grace = config.hub.shutdown_grace();
    let deadline = {
        let mut rx = shutdown_rx.clone();
        async move {
            let _ = rx.wait_for(|fired| *fired).await;
            tokio::time::sleep(grace).await;
        }
    };

    let code = tokio::select! {
        result = &mut serve => match result {
            Ok(()) => EXIT_OK,
            Err(err) => {
                error!("server failed: {err}");
                EXIT_FAILURE
            }
        },
        _ = deadline => {
            warn!("shutdown deadline exceeded, abandoning remaining connections");
            EXIT_OK
        }
    };

    watcher.shutdown();
    pipeline.abort();
    info!("bridge stopped");
    code
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
