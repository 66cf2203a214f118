use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::symbols::Symbol;

/// The optional field set carried by snapshots and deltas.
///
/// Absence is distinct from zero: a field that is `None` was not present in
/// the source record (or, in a delta, did not change). Unknown keys on the
/// wire are a protocol error, not something to silently accept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotFields {
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last: Option<Decimal>,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub bid: Option<Decimal>,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ask: Option<Decimal>,
    /// Size of the last trade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
    /// Cumulative session volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_volume: Option<u64>,
}

impl SnapshotFields {
    pub fn is_empty(&self) -> bool {
        self.last.is_none()
            && self.bid.is_none()
            && self.ask.is_none()
            && self.volume.is_none()
            && self.total_volume.is_none()
    }

    /// Fields of `newer` that differ from `self`. Used by the delta engine;
    /// an empty result means nothing changed.
    pub fn diff(&self, newer: &SnapshotFields) -> SnapshotFields {
        fn changed<T: Clone + PartialEq>(old: &Option<T>, new: &Option<T>) -> Option<T> {
            if new != old { new.clone() } else { None }
        }

        SnapshotFields {
            last: changed(&self.last, &newer.last),
            bid: changed(&self.bid, &newer.bid),
            ask: changed(&self.ask, &newer.ask),
            volume: changed(&self.volume, &newer.volume),
            total_volume: changed(&self.total_volume, &newer.total_volume),
        }
    }

    /// Overlay the populated fields of `changes` onto `self`.
    pub fn merge(&mut self, changes: &SnapshotFields) {
        if let Some(last) = changes.last {
            self.last = Some(last);
        }
        if let Some(bid) = changes.bid {
            self.bid = Some(bid);
        }
        if let Some(ask) = changes.ask {
            self.ask = Some(ask);
        }
        if let Some(volume) = changes.volume {
            self.volume = Some(volume);
        }
        if let Some(total_volume) = changes.total_volume {
            self.total_volume = Some(total_volume);
        }
    }
}

/// Which archive file kind a snapshot was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotOrigin {
    TickRecords,
    DailyBars,
}

/// The newest logical record for one symbol, as read from the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSnapshot {
    pub symbol: Symbol,
    #[serde(with = "crate::timestamp::micros")]
    pub ts: DateTime<Utc>,
    pub fields: SnapshotFields,
    pub origin: SnapshotOrigin,
}

/// A bridge-stored snapshot with its sequence number: the body of
/// `GET /latest`, shared by the server handler and the polling fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub symbol: Symbol,
    pub seq: u64,
    #[serde(with = "crate::timestamp::micros")]
    pub ts: DateTime<Utc>,
    pub fields: SnapshotFields,
    pub origin: SnapshotOrigin,
}

impl StoredSnapshot {
    pub fn from_parts(snapshot: TickSnapshot, seq: u64) -> Self {
        Self {
            symbol: snapshot.symbol,
            seq,
            ts: snapshot.ts,
            fields: snapshot.fields,
            origin: snapshot.origin,
        }
    }
}
