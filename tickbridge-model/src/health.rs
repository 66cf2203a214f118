use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Overall service condition as reported by `GET /api/v1/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

/// Structured liveness/readiness report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub watcher_ok: bool,
    pub archive_ok: bool,
    /// Number of live stream subscriptions.
    pub subscriptions: usize,
    /// Last emitted sequence per identifier.
    pub last_seq_by_symbol: BTreeMap<String, u64>,
    /// Extractor records that failed to decode since startup.
    pub parse_errors: u64,
    pub uptime_secs: u64,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthStatus::Ok)
    }
}
