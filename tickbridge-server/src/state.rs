use std::path::PathBuf;
use std::sync::Arc;

use tickbridge_core::{ArchiveReader, DeltaEngine, HealthState, SubscriptionHub, SymbolRegistry};

/// Shared handler state, assembled once by the composition root.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SymbolRegistry>,
    pub archive: Arc<ArchiveReader>,
    pub engine: Arc<DeltaEngine>,
    pub hub: Arc<SubscriptionHub>,
    pub health: Arc<HealthState>,
    /// The config file `POST /config/reload` re-reads.
    pub config_path: PathBuf,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("archive_root", &self.archive.root())
            .field("config_path", &self.config_path)
            .field("subscriptions", &self.hub.subscription_count())
            .finish()
    }
}
