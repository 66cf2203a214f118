//! Shared process health state, assembled into the wire report on demand.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use tickbridge_model::{HealthReport, HealthStatus};

use crate::archive::ArchiveReader;
use crate::delta::DeltaEngine;
use crate::hub::SubscriptionHub;

/// Flags and counters mutated by the watcher and pipeline, read by the
/// health endpoint.
#[derive(Debug)]
pub struct HealthState {
    watcher_ok: AtomicBool,
    parse_errors: AtomicU64,
    started_at: Instant,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            watcher_ok: AtomicBool::new(true),
            parse_errors: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn set_watcher_ok(&self, ok: bool) {
        self.watcher_ok.store(ok, Ordering::Release);
    }

    pub fn watcher_ok(&self) -> bool {
        self.watcher_ok.load(Ordering::Acquire)
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    /// Assemble the full report from the live components.
    pub fn report(
        &self,
        archive: &ArchiveReader,
        engine: &DeltaEngine,
        hub: &SubscriptionHub,
    ) -> HealthReport {
        let watcher_ok = self.watcher_ok();
        let archive_ok = archive.root_ok();
        HealthReport {
            status: if watcher_ok && archive_ok {
                HealthStatus::Ok
            } else {
                HealthStatus::Degraded
            },
            watcher_ok,
            archive_ok,
            subscriptions: hub.subscription_count(),
            last_seq_by_symbol: engine.last_seq_by_symbol(),
            parse_errors: self.parse_errors(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}
