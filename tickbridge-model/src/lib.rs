//! Core data model definitions shared across Tickbridge crates.
#![allow(missing_docs)]

pub mod archive;
pub mod error;
pub mod health;
pub mod snapshot;
pub mod symbols;
pub mod timestamp;
pub mod wire;

// Intentionally curated re-exports for downstream consumers.
pub use archive::{ArchiveEntry, ArchiveStat, ReadMode};
pub use error::{ModelError, Result as ModelResult};
pub use health::{HealthReport, HealthStatus};
pub use snapshot::{SnapshotFields, SnapshotOrigin, StoredSnapshot, TickSnapshot};
pub use symbols::{Role, RolloverAlert, Symbol, SymbolRecord, Timeframe};
pub use wire::{ClientMessage, StreamMessage};
