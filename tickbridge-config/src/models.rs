use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tickbridge_model::SymbolRecord;

/// Top-level bridge configuration, as read from the TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub archive: ArchiveConfig,
    pub watcher: WatcherConfig,
    pub hub: HubConfig,
    pub symbols: Vec<SymbolRecord>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            archive: ArchiveConfig::default(),
            watcher: WatcherConfig::default(),
            hub: HubConfig::default(),
            symbols: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address for the HTTP/WebSocket surface.
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8172".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveConfig {
    /// Root of the charting application's data directory. Every read stays
    /// inside this tree.
    pub root: PathBuf,
    /// Per-request byte cap for `read_range`.
    pub max_read_bytes: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            max_read_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatcherConfig {
    /// Quiet window before a burst of filesystem events for one symbol
    /// collapses into a single update.
    pub debounce_ms: u64,
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.max(1))
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self { debounce_ms: 150 }
    }
}

/// What to do when a subscriber's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackpressureMode {
    /// Discard the oldest queued delta (never a snapshot) and schedule a
    /// fresh snapshot so the client re-syncs.
    DropOldest,
    /// Drain and close the connection; the client is expected to reconnect.
    Evict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubConfig {
    /// Outbound queue depth per subscriber.
    pub queue_depth: usize,
    pub backpressure: BackpressureMode,
    pub keepalive_secs: u64,
    /// A subscriber silent for this long (no ack, ping, or pong) is evicted.
    pub liveness_timeout_secs: u64,
    /// Deadline for one socket write before the subscriber counts as dead.
    pub write_timeout_secs: u64,
    /// How long draining subscriptions get to flush on shutdown.
    pub shutdown_grace_secs: u64,
}

impl HubConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs.max(1))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_depth: 128,
            backpressure: BackpressureMode::DropOldest,
            keepalive_secs: 25,
            liveness_timeout_secs: 75,
            write_timeout_secs: 10,
            shutdown_grace_secs: 5,
        }
    }
}
