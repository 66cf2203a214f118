//! Shared configuration library for Tickbridge.
//!
//! This crate centralizes config loading and validation for the bridge
//! binary: the TOML file with the symbol table and tuning knobs, `.env`
//! support, and the `BRIDGE_LISTEN` / `ARCHIVE_ROOT` / `CONFIG_PATH`
//! environment overrides. The server re-reads the same file on `reload`, so
//! there is a single source of truth for defaults and validation rules.

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigLoad, load, resolve_config_path};
pub use models::{
    ArchiveConfig, BackpressureMode, BridgeConfig, HubConfig, ServerConfig,
    WatcherConfig,
};
pub use validation::{ConfigError, validate};
