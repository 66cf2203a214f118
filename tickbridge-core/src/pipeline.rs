//! The per-symbol processing pipeline: debounced file updates in, published
//! stream messages out.
//!
//! A dispatcher task lazily spawns one worker per active symbol and routes
//! updates to it, which gives the delta engine its per-identifier
//! serialization for free while separate symbols proceed in parallel. A
//! worker's inbox is small and lossy on purpose: every update means
//! "re-read the tail", so when the inbox is full the queued update already
//! covers the newest file state and the overflowing one can be shed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tickbridge_model::Symbol;

use crate::delta::DeltaEngine;
use crate::extract::{ExtractError, SnapshotExtractor};
use crate::health::HealthState;
use crate::hub::SubscriptionHub;
use crate::registry::SymbolRegistry;
use crate::watch::FileUpdate;

const WORKER_INBOX: usize = 8;

/// Spawn the dispatcher. It runs until the update channel closes (watcher
/// shutdown).
pub fn spawn_pipeline(
    mut updates: mpsc::Receiver<FileUpdate>,
    extractor: SnapshotExtractor,
    engine: Arc<DeltaEngine>,
    hub: Arc<SubscriptionHub>,
    registry: Arc<SymbolRegistry>,
    health: Arc<HealthState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut workers: HashMap<Symbol, mpsc::Sender<FileUpdate>> = HashMap::new();
        let mut epoch = registry.epoch();

        while let Some(update) = updates.recv().await {
            if registry.epoch() != epoch {
                epoch = registry.epoch();
                retire_inactive(&registry, &engine, &mut workers);
            }

            // The watcher filters against the active set too, but a reload
            // can land between its check and ours.
            if !registry.is_active(&update.symbol) {
                debug!(symbol = %update.symbol, "dropping update for retired symbol");
                continue;
            }

            let sender = workers.entry(update.symbol.clone()).or_insert_with(|| {
                spawn_symbol_worker(
                    update.symbol.clone(),
                    extractor.clone(),
                    Arc::clone(&engine),
                    Arc::clone(&hub),
                    Arc::clone(&registry),
                    Arc::clone(&health),
                )
            });

            if let Err(err) = sender.try_send(update) {
                match err {
                    mpsc::error::TrySendError::Full(update) => {
                        // The worker is behind on I/O; the updates already
                        // queued will re-read the same, newer tail.
                        debug!(symbol = %update.symbol, "worker inbox full, shedding update");
                    }
                    mpsc::error::TrySendError::Closed(update) => {
                        warn!(symbol = %update.symbol, "worker gone, respawning");
                        workers.remove(&update.symbol);
                    }
                }
            }
        }
        // Dropping the senders ends every worker.
    })
}

fn retire_inactive(
    registry: &SymbolRegistry,
    engine: &DeltaEngine,
    workers: &mut HashMap<Symbol, mpsc::Sender<FileUpdate>>,
) {
    workers.retain(|symbol, _| registry.is_active(symbol));
    for (symbol, _) in engine.last_seq_by_symbol() {
        let symbol = Symbol::from(symbol);
        if !registry.is_active(&symbol) {
            debug!(%symbol, "forgetting retired symbol");
            engine.forget(&symbol);
        }
    }
}

fn spawn_symbol_worker(
    symbol: Symbol,
    extractor: SnapshotExtractor,
    engine: Arc<DeltaEngine>,
    hub: Arc<SubscriptionHub>,
    registry: Arc<SymbolRegistry>,
    health: Arc<HealthState>,
) -> mpsc::Sender<FileUpdate> {
    let (tx, mut rx) = mpsc::channel::<FileUpdate>(WORKER_INBOX);
    tokio::spawn(async move {
        debug!(%symbol, "symbol worker started");
        while let Some(update) = rx.recv().await {
            match extractor.extract(&update.symbol, &update.path).await {
                Ok(snapshot) => {
                    // Work for a symbol retired mid-flight completes, but
                    // its output is dropped here rather than fanned out.
                    if !registry.is_active(&update.symbol) {
                        debug!(symbol = %update.symbol, "discarding output for retired symbol");
                        continue;
                    }
                    if let Some(message) = engine.apply(snapshot) {
                        hub.publish(&message);
                    }
                }
                Err(ExtractError::NoData(path)) => {
                    debug!(symbol = %update.symbol, path = %path.display(), "no complete record yet");
                }
                Err(err @ (ExtractError::Parse { .. } | ExtractError::UnknownKind(_))) => {
                    health.record_parse_error();
                    warn!(symbol = %update.symbol, "parse-error: {err}");
                }
                Err(ExtractError::Archive(err)) => {
                    warn!(symbol = %update.symbol, "archive read failed: {err}");
                }
            }
        }
        debug!(%symbol, "symbol worker stopped");
    });
    tx
}
