//! The delta engine: tick snapshots in, sequenced field-level deltas out.
//!
//! Per symbol the engine keeps the last published state and a sequence
//! counter. The stored state is ground truth for diffing and is never rolled
//! back; sequence numbers are driven by publication, not event time, so a
//! timestamp regression in the archive still diffs and still advances the
//! sequence if fields changed.

use std::collections::BTreeMap;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::trace;

use tickbridge_model::{StreamMessage, Symbol, TickSnapshot};

#[derive(Debug)]
struct Published {
    snapshot: TickSnapshot,
    seq: u64,
}

/// Shared, per-symbol last-published state with monotonic sequencing.
///
/// Callers must serialize [`DeltaEngine::apply`] per symbol (the pipeline
/// runs one worker per identifier); reads may come from anywhere.
#[derive(Debug, Default)]
pub struct DeltaEngine {
    published: DashMap<Symbol, Published>,
}

impl DeltaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `incoming` against the stored state and produce the next message
    /// for the symbol, if anything changed.
    ///
    /// The first snapshot for a symbol is published whole, tagged
    /// `snapshot`, at sequence 1. Later snapshots publish only the changed
    /// fields; an empty diff produces nothing and leaves the stored state
    /// untouched.
    pub fn apply(&self, incoming: TickSnapshot) -> Option<StreamMessage> {
        match self.published.entry(incoming.symbol.clone()) {
            Entry::Vacant(vacant) => {
                let message = StreamMessage::Snapshot {
                    symbol: incoming.symbol.clone(),
                    seq: 1,
                    ts: incoming.ts,
                    fields: incoming.fields.clone(),
                };
                vacant.insert(Published {
                    snapshot: incoming,
                    seq: 1,
                });
                Some(message)
            }
            Entry::Occupied(mut occupied) => {
                let published = occupied.get_mut();
                let changes = published.snapshot.fields.diff(&incoming.fields);
                if changes.is_empty() {
                    trace!(symbol = %incoming.symbol, "snapshot unchanged, nothing to publish");
                    return None;
                }

                published.seq += 1;
                published.snapshot.fields.merge(&changes);
                published.snapshot.ts = incoming.ts;
                published.snapshot.origin = incoming.origin;

                Some(StreamMessage::Delta {
                    symbol: incoming.symbol,
                    seq: published.seq,
                    ts: published.snapshot.ts,
                    fields: changes,
                })
            }
        }
    }

    /// The stored snapshot and its sequence, for `latest` probes and the
    /// polling fallback.
    pub fn latest(&self, symbol: &Symbol) -> Option<(TickSnapshot, u64)> {
        self.published
            .get(symbol)
            .map(|entry| (entry.snapshot.clone(), entry.seq))
    }

    /// The stored state as a ready-to-send `snapshot` message. Used for new
    /// subscriptions and backpressure resyncs.
    pub fn snapshot_message(&self, symbol: &Symbol) -> Option<StreamMessage> {
        self.published.get(symbol).map(|entry| StreamMessage::Snapshot {
            symbol: symbol.clone(),
            seq: entry.seq,
            ts: entry.snapshot.ts,
            fields: entry.snapshot.fields.clone(),
        })
    }

    /// Last emitted sequence per symbol, for the health report.
    pub fn last_seq_by_symbol(&self) -> BTreeMap<String, u64> {
        self.published
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().seq))
            .collect()
    }

    /// Drop the state for a retired symbol. Output for identifiers no longer
    /// in the active set is discarded upstream; this frees their slot.
    pub fn forget(&self, symbol: &Symbol) {
        self.published.remove(symbol);
    }
}
