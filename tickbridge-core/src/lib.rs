//! # Tickbridge Core
//!
//! The bridge engine between a charting application's on-disk tick archive
//! and streaming consumers:
//!
//! - **Symbol registry**: which contract is bound to each logical role right
//!   now, with scheduled rollover and hot reload.
//! - **Archive reader**: path-restricted, read-only random access to the
//!   archive tree.
//! - **File watcher**: debounced per-symbol update events from raw
//!   filesystem notifications.
//! - **Snapshot extractor**: tail reads of intraday/daily files into typed
//!   tick snapshots.
//! - **Delta engine**: field-level diffs with per-symbol monotonic
//!   sequencing.
//! - **Subscription hub**: bounded fan-out to stream subscribers with
//!   backpressure and liveness eviction.

pub mod archive;
pub mod delta;
pub mod extract;
pub mod health;
pub mod hub;
pub mod pipeline;
pub mod registry;
pub mod watch;

pub use archive::{ArchiveError, ArchiveReader};
pub use delta::DeltaEngine;
pub use extract::{ExtractError, FileKind, SnapshotExtractor};
pub use health::HealthState;
pub use hub::{SubscriberHandle, SubscriptionHub};
pub use pipeline::spawn_pipeline;
pub use registry::{RegistryError, SymbolRegistry};
pub use watch::{ArchiveWatcher, FileUpdate};
