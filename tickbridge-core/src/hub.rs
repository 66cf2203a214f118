//! Subscription fan-out with per-subscriber backpressure.
//!
//! Each stream connection registers one subscriber per symbol. A subscriber
//! owns a bounded outbound queue; the publishing side never blocks on it.
//! When a queue overflows the configured policy either discards the oldest
//! queued delta and schedules a fresh snapshot (so the client re-syncs via
//! its own gap detection), or drains and closes the connection. Snapshots
//! are never discarded ahead of deltas.
//!
//! The hub only moves messages; socket I/O, keepalive timing, and liveness
//! eviction live with the connection task in the server crate, which drives
//! a [`SubscriberHandle`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use tickbridge_config::{BackpressureMode, HubConfig};
use tickbridge_model::{StreamMessage, Symbol};

use crate::delta::DeltaEngine;

/// Lifecycle of one (client, symbol) subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Connecting,
    Active,
    /// Flush what is queued, then close.
    Draining,
    Closed,
}

#[derive(Debug)]
struct Outbound {
    messages: VecDeque<StreamMessage>,
    state: SubscriptionState,
    /// The initial `snapshot` has been enqueued; deltas may flow.
    snapshot_sent: bool,
    /// Deltas discarded by the drop-oldest policy.
    dropped: u64,
}

#[derive(Debug)]
struct SubscriberShared {
    id: Uuid,
    symbol: Symbol,
    queue: Mutex<Outbound>,
    notify: Notify,
    last_sent_seq: AtomicU64,
    last_activity: Mutex<Instant>,
}

enum Enqueued {
    Ok,
    /// A delta was discarded; the subscriber needs a resync snapshot.
    OverflowDropped,
    /// Evict policy fired; the subscriber is now draining.
    OverflowEvicted,
    /// Queue is gone; nothing was enqueued.
    Gone,
}

impl SubscriberShared {
    /// Non-blocking enqueue. `force` bypasses the depth check and is only
    /// used for resync snapshots, which must never be dropped.
    fn enqueue(&self, message: StreamMessage, config: &HubConfig, force: bool) -> Enqueued {
        let mut queue = self.queue.lock();
        match queue.state {
            SubscriptionState::Draining | SubscriptionState::Closed => return Enqueued::Gone,
            SubscriptionState::Connecting | SubscriptionState::Active => {}
        }

        if message.is_snapshot() {
            queue.snapshot_sent = true;
        }

        if force || queue.messages.len() < config.queue_depth {
            queue.messages.push_back(message);
            drop(queue);
            self.notify.notify_one();
            return Enqueued::Ok;
        }

        match config.backpressure {
            BackpressureMode::DropOldest => {
                // Discard the oldest queued delta; snapshots stay.
                if let Some(pos) = queue.messages.iter().position(StreamMessage::is_delta) {
                    queue.messages.remove(pos);
                    queue.dropped += 1;
                }
                queue.messages.push_back(message);
                drop(queue);
                self.notify.notify_one();
                Enqueued::OverflowDropped
            }
            BackpressureMode::Evict => {
                queue.state = SubscriptionState::Draining;
                drop(queue);
                self.notify.notify_one();
                Enqueued::OverflowEvicted
            }
        }
    }
}

/// Routes delta-engine output to matching subscribers and tracks their
/// lifecycles.
#[derive(Debug)]
pub struct SubscriptionHub {
    subscribers: Arc<DashMap<Uuid, Arc<SubscriberShared>>>,
    engine: Arc<DeltaEngine>,
    config: HubConfig,
}

impl SubscriptionHub {
    pub fn new(engine: Arc<DeltaEngine>, config: HubConfig) -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            engine,
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a subscription and enqueue the current stored snapshot, if
    /// the engine has one. When it does not, the guard in [`Self::publish`]
    /// still guarantees the first delivered message is a `snapshot`.
    pub fn subscribe(&self, symbol: Symbol) -> SubscriberHandle {
        let shared = Arc::new(SubscriberShared {
            id: Uuid::new_v4(),
            symbol: symbol.clone(),
            queue: Mutex::new(Outbound {
                messages: VecDeque::new(),
                state: SubscriptionState::Connecting,
                snapshot_sent: false,
                dropped: 0,
            }),
            notify: Notify::new(),
            last_sent_seq: AtomicU64::new(0),
            last_activity: Mutex::new(Instant::now()),
        });

        // Visible to publishers before the handshake snapshot, so nothing
        // published in between is lost.
        self.subscribers.insert(shared.id, Arc::clone(&shared));

        if let Some(snapshot) = self.engine.snapshot_message(&symbol) {
            shared.enqueue(snapshot, &self.config, true);
        }
        {
            let mut queue = shared.queue.lock();
            if queue.state == SubscriptionState::Connecting {
                queue.state = SubscriptionState::Active;
            }
        }
        debug!(id = %shared.id, %symbol, "subscriber registered");

        SubscriberHandle {
            shared,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Fan a published message out to every matching subscriber without
    /// blocking. Slow subscribers get the configured overflow treatment.
    pub fn publish(&self, message: &StreamMessage) {
        for entry in self.subscribers.iter() {
            let shared = entry.value();
            if shared.symbol != *message.symbol() {
                continue;
            }

            let needs_snapshot_first =
                { !shared.queue.lock().snapshot_sent } && !message.is_snapshot();
            let outcome = if needs_snapshot_first {
                // The subscription has not seen its snapshot yet; send the
                // full current state (which already includes this delta)
                // instead of a delta the client cannot anchor.
                match self.engine.snapshot_message(message.symbol()) {
                    Some(snapshot) => shared.enqueue(snapshot, &self.config, true),
                    None => continue,
                }
            } else {
                shared.enqueue(message.clone(), &self.config, false)
            };

            match outcome {
                Enqueued::Ok | Enqueued::Gone => {}
                Enqueued::OverflowDropped => {
                    warn!(
                        id = %shared.id,
                        symbol = %shared.symbol,
                        "subscriber-slow: dropped oldest delta, scheduling resync"
                    );
                    if let Some(snapshot) = self.engine.snapshot_message(&shared.symbol) {
                        shared.enqueue(snapshot, &self.config, true);
                    }
                }
                Enqueued::OverflowEvicted => {
                    warn!(
                        id = %shared.id,
                        symbol = %shared.symbol,
                        "subscriber-slow: evicting subscriber"
                    );
                }
            }
        }
    }

    /// Live subscriptions (anything not yet closed).
    pub fn subscription_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Subscribers per symbol, for the status surface.
    pub fn counts_by_symbol(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.subscribers.iter() {
            *counts.entry(entry.value().symbol.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Transition every subscription to draining. Connection tasks flush
    /// their queues and close; the caller bounds the wait.
    pub fn drain_all(&self) {
        for entry in self.subscribers.iter() {
            let shared = entry.value();
            let mut queue = shared.queue.lock();
            if queue.state != SubscriptionState::Closed {
                queue.state = SubscriptionState::Draining;
            }
            drop(queue);
            shared.notify.notify_one();
        }
    }
}

/// One subscription, as seen by its connection task.
///
/// Dropping the handle deregisters the subscription and frees its queue.
#[derive(Debug)]
pub struct SubscriberHandle {
    shared: Arc<SubscriberShared>,
    subscribers: Arc<DashMap<Uuid, Arc<SubscriberShared>>>,
}

impl SubscriberHandle {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn symbol(&self) -> &Symbol {
        &self.shared.symbol
    }

    /// Next queued message. Returns `None` once the subscription has drained
    /// or closed; waits otherwise.
    pub async fn next_message(&self) -> Option<StreamMessage> {
        loop {
            {
                let mut queue = self.shared.queue.lock();
                if let Some(message) = queue.messages.pop_front() {
                    self.shared
                        .last_sent_seq
                        .store(message.seq(), Ordering::Relaxed);
                    return Some(message);
                }
                match queue.state {
                    SubscriptionState::Draining => {
                        queue.state = SubscriptionState::Closed;
                        return None;
                    }
                    SubscriptionState::Closed => return None,
                    SubscriptionState::Connecting | SubscriptionState::Active => {}
                }
            }
            self.shared.notify.notified().await;
        }
    }

    /// The keepalive frame for this subscription, carrying the last sequence
    /// written to the socket.
    pub fn keepalive_message(&self) -> StreamMessage {
        StreamMessage::Keepalive {
            symbol: self.shared.symbol.clone(),
            seq: self.shared.last_sent_seq.load(Ordering::Relaxed),
            ts: chrono::Utc::now(),
        }
    }

    /// Record liveness (ack, ping, or pong received).
    pub fn record_activity(&self) {
        *self.shared.last_activity.lock() = Instant::now();
    }

    pub fn since_last_activity(&self) -> Duration {
        self.shared.last_activity.lock().elapsed()
    }

    /// Client-initiated close: flush the queue, then end the stream.
    pub fn begin_drain(&self) {
        let mut queue = self.shared.queue.lock();
        if queue.state != SubscriptionState::Closed {
            queue.state = SubscriptionState::Draining;
        }
        drop(queue);
        self.shared.notify.notify_one();
    }

    /// Hard close after a write error or liveness timeout. Frees the queue.
    pub fn close(&self) {
        let mut queue = self.shared.queue.lock();
        queue.state = SubscriptionState::Closed;
        queue.messages.clear();
        drop(queue);
        self.shared.notify.notify_one();
    }

    pub fn state(&self) -> SubscriptionState {
        self.shared.queue.lock().state
    }

    /// Deltas this subscription lost to backpressure.
    pub fn dropped(&self) -> u64 {
        self.shared.queue.lock().dropped
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.close();
        self.subscribers.remove(&self.shared.id);
        debug!(id = %self.shared.id, symbol = %self.shared.symbol, "subscriber deregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use tickbridge_model::{SnapshotFields, SnapshotOrigin, TickSnapshot};

    fn tick(symbol: &str, last: &str, volume: u64, second: u32) -> TickSnapshot {
        TickSnapshot {
            symbol: Symbol::from(symbol),
            ts: Utc.with_ymd_and_hms(2025, 9, 10, 14, 0, second).unwrap(),
            fields: SnapshotFields {
                last: Some(Decimal::from_str(last).unwrap()),
                volume: Some(volume),
                ..Default::default()
            },
            origin: SnapshotOrigin::TickRecords,
        }
    }

    fn hub_with(config: HubConfig) -> (Arc<DeltaEngine>, SubscriptionHub) {
        let engine = Arc::new(DeltaEngine::new());
        let hub = SubscriptionHub::new(Arc::clone(&engine), config);
        (engine, hub)
    }

    fn small_queue(mode: BackpressureMode) -> HubConfig {
        HubConfig {
            queue_depth: 4,
            backpressure: mode,
            ..HubConfig::default()
        }
    }

    fn pump(engine: &DeltaEngine, hub: &SubscriptionHub, snapshot: TickSnapshot) {
        if let Some(message) = engine.apply(snapshot) {
            hub.publish(&message);
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_current_snapshot_first() {
        let (engine, hub) = hub_with(HubConfig::default());
        pump(&engine, &hub, tick("NQZ25", "23500.25", 1, 0));
        pump(&engine, &hub, tick("NQZ25", "23500.50", 2, 1));

        let handle = hub.subscribe(Symbol::from("NQZ25"));
        let first = handle.next_message().await.unwrap();
        assert!(first.is_snapshot());
        assert_eq!(first.seq(), 2);
    }

    #[tokio::test]
    async fn early_subscriber_first_message_is_still_a_snapshot() {
        let (engine, hub) = hub_with(HubConfig::default());
        let handle = hub.subscribe(Symbol::from("NQZ25"));

        pump(&engine, &hub, tick("NQZ25", "23500.25", 1, 0));
        let first = handle.next_message().await.unwrap();
        assert!(first.is_snapshot());
        assert_eq!(first.seq(), 1);

        pump(&engine, &hub, tick("NQZ25", "23500.50", 2, 1));
        let second = handle.next_message().await.unwrap();
        assert!(second.is_delta());
        assert_eq!(second.seq(), 2);
    }

    #[tokio::test]
    async fn publishes_only_to_matching_symbol() {
        let (engine, hub) = hub_with(HubConfig::default());
        let nq = hub.subscribe(Symbol::from("NQZ25"));
        let es = hub.subscribe(Symbol::from("ESZ25"));

        pump(&engine, &hub, tick("NQZ25", "23500.25", 1, 0));

        let msg = nq.next_message().await.unwrap();
        assert_eq!(msg.symbol(), &Symbol::from("NQZ25"));
        assert!(es.shared.queue.lock().messages.is_empty());
    }

    #[tokio::test]
    async fn drop_oldest_discards_deltas_and_schedules_resync() {
        let (engine, hub) = hub_with(small_queue(BackpressureMode::DropOldest));
        let handle = hub.subscribe(Symbol::from("NQZ25"));

        // snapshot + 3 deltas fill the queue of 4, then more deltas overflow.
        for (i, price) in ["23500.25", "23500.50", "23500.75", "23501.00", "23501.25", "23501.50"]
            .iter()
            .enumerate()
        {
            pump(&engine, &hub, tick("NQZ25", price, i as u64 + 1, i as u32));
        }

        assert!(handle.dropped() > 0);
        let mut received = Vec::new();
        // Drain what is queued without waiting for more.
        while let Some(message) = {
            let mut queue = handle.shared.queue.lock();
            queue.messages.pop_front()
        } {
            received.push(message);
        }

        // The initial snapshot survived at the front.
        assert!(received.first().unwrap().is_snapshot());
        // A resync snapshot carrying the final state was enqueued.
        let last = received.last().unwrap();
        assert!(last.is_snapshot());
        assert_eq!(last.seq(), 6);
    }

    #[tokio::test]
    async fn evict_policy_drains_the_subscriber() {
        let (engine, hub) = hub_with(small_queue(BackpressureMode::Evict));
        let handle = hub.subscribe(Symbol::from("NQZ25"));

        for (i, price) in ["23500.25", "23500.50", "23500.75", "23501.00", "23501.25", "23501.50"]
            .iter()
            .enumerate()
        {
            pump(&engine, &hub, tick("NQZ25", price, i as u64 + 1, i as u32));
        }

        assert_eq!(handle.state(), SubscriptionState::Draining);
        // Queued messages flush, then the stream ends.
        let mut count = 0;
        while handle.next_message().await.is_some() {
            count += 1;
        }
        assert!(count > 0);
        assert_eq!(handle.state(), SubscriptionState::Closed);
    }

    #[tokio::test]
    async fn drain_all_flushes_then_ends() {
        let (engine, hub) = hub_with(HubConfig::default());
        let handle = hub.subscribe(Symbol::from("NQZ25"));
        pump(&engine, &hub, tick("NQZ25", "23500.25", 1, 0));

        hub.drain_all();
        assert!(handle.next_message().await.is_some());
        assert!(handle.next_message().await.is_none());
    }

    #[tokio::test]
    async fn dropped_handle_deregisters() {
        let (_engine, hub) = hub_with(HubConfig::default());
        let handle = hub.subscribe(Symbol::from("NQZ25"));
        assert_eq!(hub.subscription_count(), 1);
        drop(handle);
        assert_eq!(hub.subscription_count(), 0);
    }

    #[tokio::test]
    async fn close_frees_the_queue() {
        let (engine, hub) = hub_with(HubConfig::default());
        let handle = hub.subscribe(Symbol::from("NQZ25"));
        pump(&engine, &hub, tick("NQZ25", "23500.25", 1, 0));
        handle.close();
        assert!(handle.next_message().await.is_none());
        // Publishing after close is a no-op for this subscriber.
        pump(&engine, &hub, tick("NQZ25", "23500.50", 2, 1));
        assert!(handle.next_message().await.is_none());
    }

    #[tokio::test]
    async fn keepalive_carries_last_sent_seq() {
        let (engine, hub) = hub_with(HubConfig::default());
        let handle = hub.subscribe(Symbol::from("NQZ25"));
        pump(&engine, &hub, tick("NQZ25", "23500.25", 1, 0));
        let _ = handle.next_message().await.unwrap();
        match handle.keepalive_message() {
            StreamMessage::Keepalive { seq, .. } => assert_eq!(seq, 1),
            other => panic!("expected keepalive, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn counts_by_symbol_reflect_subscriptions() {
        let (_engine, hub) = hub_with(HubConfig::default());
        let _a = hub.subscribe(Symbol::from("NQZ25"));
        let _b = hub.subscribe(Symbol::from("NQZ25"));
        let _c = hub.subscribe(Symbol::from("ESZ25"));
        let counts = hub.counts_by_symbol();
        assert_eq!(counts.get("NQZ25"), Some(&2));
        assert_eq!(counts.get("ESZ25"), Some(&1));
    }
}
