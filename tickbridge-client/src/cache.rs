//! The per-symbol snapshot cache: stream messages in, non-blocking reads
//! out.
//!
//! Continuity is tracked by sequence number. Deltas apply only on
//! `last + 1`; anything further ahead is a gap, which discards the entry so
//! reads refuse to serve until the next snapshot restores a known-good
//! state. Polled snapshots (degraded mode) are readable but deliberately
//! unsynced: deltas never apply on top of them.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use tickbridge_model::{SnapshotFields, StoredSnapshot, StreamMessage, Symbol};

/// What a read sees for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerRead {
    /// Within TTL, or the stream is healthy and simply quiet.
    Fresh(TickView),
    /// TTL elapsed while the stream was unhealthy; data may lag.
    Stale(TickView),
    /// Nothing cached, or the entry was invalidated by a gap.
    Unknown,
}

/// The cached state for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickView {
    pub symbol: Symbol,
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub fields: SnapshotFields,
}

/// Result of feeding one stream message to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Snapshot installed or delta merged; `ack` this sequence.
    Applied(u64),
    /// Duplicate, pre-snapshot delta, or keepalive; nothing changed.
    Ignored,
    /// Sequence gap: the entry was invalidated, a snapshot must follow.
    Gap { expected: u64, got: u64 },
}

#[derive(Debug)]
struct CacheEntry {
    seq: u64,
    ts: DateTime<Utc>,
    fields: SnapshotFields,
    updated_at: Instant,
    /// Entries installed from the stream accept deltas; polled entries do
    /// not.
    synced: bool,
}

/// Thread-safe snapshot cache shared by the consumer tasks and readers.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    entries: DashMap<Symbol, CacheEntry>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one stream message.
    pub fn apply_stream(&self, message: &StreamMessage) -> ApplyOutcome {
        match message {
            StreamMessage::Snapshot { symbol, seq, ts, fields } => {
                self.entries.insert(
                    symbol.clone(),
                    CacheEntry {
                        seq: *seq,
                        ts: *ts,
                        fields: fields.clone(),
                        updated_at: Instant::now(),
                        synced: true,
                    },
                );
                debug!(%symbol, seq, "cache resynced from snapshot");
                ApplyOutcome::Applied(*seq)
            }
            StreamMessage::Delta { symbol, seq, ts, fields } => {
                let Some(mut entry) = self.entries.get_mut(symbol) else {
                    // No anchor yet; await the snapshot.
                    return ApplyOutcome::Ignored;
                };
                if !entry.synced {
                    return ApplyOutcome::Ignored;
                }
                if *seq <= entry.seq {
                    debug!(%symbol, seq, have = entry.seq, "duplicate delta ignored");
                    return ApplyOutcome::Ignored;
                }
                if *seq != entry.seq + 1 {
                    let expected = entry.seq + 1;
                    drop(entry);
                    self.entries.remove(symbol);
                    warn!(%symbol, expected, got = seq, "sequence gap, cache invalidated");
                    return ApplyOutcome::Gap {
                        expected,
                        got: *seq,
                    };
                }
                entry.fields.merge(fields);
                entry.seq = *seq;
                entry.ts = *ts;
                entry.updated_at = Instant::now();
                ApplyOutcome::Applied(*seq)
            }
            StreamMessage::Keepalive { .. } => ApplyOutcome::Ignored,
        }
    }

    /// Install a polled snapshot (degraded mode). Never downgrades a synced
    /// entry that is already at or past the polled sequence.
    pub fn apply_polled(&self, polled: &StoredSnapshot) {
        match self.entries.get_mut(&polled.symbol) {
            Some(mut entry) => {
                if entry.synced && entry.seq >= polled.seq {
                    return;
                }
                entry.seq = polled.seq;
                entry.ts = polled.ts;
                entry.fields = polled.fields.clone();
                entry.updated_at = Instant::now();
                entry.synced = false;
            }
            None => {
                self.entries.insert(
                    polled.symbol.clone(),
                    CacheEntry {
                        seq: polled.seq,
                        ts: polled.ts,
                        fields: polled.fields.clone(),
                        updated_at: Instant::now(),
                        synced: false,
                    },
                );
            }
        }
    }

    /// Drop one symbol's entry (explicit resync request).
    pub fn invalidate(&self, symbol: &Symbol) {
        self.entries.remove(symbol);
    }

    /// Non-blocking read. `link_healthy` reflects the stream connection for
    /// this symbol; a healthy, quiet stream never goes stale.
    pub fn read(&self, symbol: &Symbol, ttl: Duration, link_healthy: bool) -> ConsumerRead {
        let Some(entry) = self.entries.get(symbol) else {
            return ConsumerRead::Unknown;
        };
        let view = TickView {
            symbol: symbol.clone(),
            seq: entry.seq,
            ts: entry.ts,
            fields: entry.fields.clone(),
        };
        if entry.updated_at.elapsed() > ttl && !link_healthy {
            ConsumerRead::Stale(view)
        } else {
            ConsumerRead::Fresh(view)
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
