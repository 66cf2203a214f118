//! The streaming consumer: one reader task per subscribed symbol, a
//! reconnect loop with exponential backoff, and a polling fallback that only
//! runs while a stream has been down beyond a grace period.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use tickbridge_model::{ClientMessage, StreamMessage, Symbol};

use crate::api_client::BridgeApiClient;
use crate::cache::{ApplyOutcome, ConsumerRead, SnapshotCache};

/// Consumer tuning. Defaults follow the bridge's conservative side: streams
/// are primary, polling is a degraded-mode backstop.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Bridge base URL, e.g. `http://10.0.0.5:8172`.
    pub base_url: String,
    pub symbols: Vec<Symbol>,
    /// How long a cached entry stays fresh without updates while the stream
    /// is down.
    pub ttl: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// Poll cadence in degraded mode.
    pub poll_interval: Duration,
    /// How long a stream must be down before polling starts.
    pub poll_grace: Duration,
}

impl ConsumerConfig {
    pub fn new(base_url: impl Into<String>, symbols: Vec<Symbol>) -> Self {
        Self {
            base_url: base_url.into(),
            symbols,
            ttl: Duration::from_secs(5),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
            poll_interval: Duration::from_secs(3),
            poll_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
struct LinkState {
    connected: AtomicBool,
    down_since: Mutex<Option<Instant>>,
}

impl LinkState {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            down_since: Mutex::new(Some(Instant::now())),
        }
    }

    fn set_connected(&self) {
        self.connected.store(true, Ordering::Release);
        *self.down_since.lock() = None;
    }

    fn set_down(&self) {
        self.connected.store(false, Ordering::Release);
        let mut down_since = self.down_since.lock();
        if down_since.is_none() {
            *down_since = Some(Instant::now());
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn down_longer_than(&self, grace: Duration) -> bool {
        if self.is_connected() {
            return false;
        }
        self.down_since
            .lock()
            .map(|since| since.elapsed() > grace)
            .unwrap_or(false)
    }
}

/// Owns the consumer tasks and exposes the non-blocking read interface.
#[derive(Debug)]
pub struct StreamingConsumer {
    cache: Arc<SnapshotCache>,
    links: Arc<DashMap<Symbol, Arc<LinkState>>>,
    ttl: Duration,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl StreamingConsumer {
    /// Spawn the reader and fallback tasks and return immediately; the cache
    /// fills as connections come up.
    pub fn start(config: ConsumerConfig) -> Self {
        let cache = Arc::new(SnapshotCache::new());
        let links: Arc<DashMap<Symbol, Arc<LinkState>>> = Arc::new(DashMap::new());
        let api = BridgeApiClient::new(config.base_url.clone());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        for symbol in &config.symbols {
            let link = Arc::new(LinkState::new());
            links.insert(symbol.clone(), Arc::clone(&link));
            tasks.push(tokio::spawn(connection_task(
                symbol.clone(),
                api.stream_url(symbol),
                Arc::clone(&cache),
                link,
                config.clone(),
                shutdown_rx.clone(),
            )));
        }
        tasks.push(tokio::spawn(poll_task(
            api,
            config.clone(),
            Arc::clone(&links),
            Arc::clone(&cache),
            shutdown_rx,
        )));

        Self {
            cache,
            links,
            ttl: config.ttl,
            shutdown,
            tasks,
        }
    }

    /// Non-blocking read of the local view for `symbol`.
    pub fn get(&self, symbol: &Symbol) -> ConsumerRead {
        let healthy = self
            .links
            .get(symbol)
            .map(|link| link.is_connected())
            .unwrap_or(false);
        self.cache.read(symbol, self.ttl, healthy)
    }

    /// Whether the stream for `symbol` is currently up.
    pub fn is_streaming(&self, symbol: &Symbol) -> bool {
        self.links
            .get(symbol)
            .map(|link| link.is_connected())
            .unwrap_or(false)
    }

    /// Stop all tasks, closing streams politely where possible.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
                // Task did not wind down in time; it dies with the runtime.
            }
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connection_task(
    symbol: Symbol,
    url: String,
    cache: Arc<SnapshotCache>,
    link: Arc<LinkState>,
    config: ConsumerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = config.reconnect_initial;
    loop {
        if *shutdown.borrow() {
            return;
        }
        match connect_async(&url).await {
            Ok((stream, _response)) => {
                info!(%symbol, "stream connected");
                link.set_connected();
                backoff = config.reconnect_initial;
                run_stream(stream, &symbol, &cache, &mut shutdown).await;
                link.set_down();
                if *shutdown.borrow() {
                    return;
                }
                warn!(%symbol, "stream disconnected");
            }
            Err(err) => {
                link.set_down();
                debug!(%symbol, "connect failed: {err}");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.changed() => return,
        }
        backoff = (backoff * 2).min(config.reconnect_max);
    }
}

async fn run_stream(
    stream: WsStream,
    symbol: &Symbol,
    cache: &SnapshotCache,
    shutdown: &mut watch::Receiver<bool>,
) {
    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = send_client(&mut sink, &ClientMessage::Close).await;
                let _ = sink.close().await;
                return;
            }
            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let message: StreamMessage = match serde_json::from_str(&text) {
                            Ok(message) => message,
                            Err(err) => {
                                debug!(%symbol, "undecodable frame: {err}");
                                continue;
                            }
                        };
                        let is_keepalive = matches!(message, StreamMessage::Keepalive { .. });
                        match cache.apply_stream(&message) {
                            ApplyOutcome::Applied(seq) => {
                                let _ = send_client(&mut sink, &ClientMessage::Ack { seq }).await;
                            }
                            ApplyOutcome::Gap { expected, got } => {
                                // The entry is invalidated; the bridge always
                                // follows dropped deltas with a snapshot, so
                                // await it rather than reconnecting.
                                warn!(%symbol, expected, got, "gap detected, awaiting resync");
                            }
                            ApplyOutcome::Ignored => {
                                if is_keepalive {
                                    let _ = send_client(&mut sink, &ClientMessage::Ping).await;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(%symbol, "stream read error: {err}");
                        return;
                    }
                }
            }
        }
    }
}

async fn send_client<S>(sink: &mut S, message: &ClientMessage) -> crate::error::Result<()>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(message)?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}

async fn poll_task(
    api: BridgeApiClient,
    config: ConsumerConfig,
    links: Arc<DashMap<Symbol, Arc<LinkState>>>,
    cache: Arc<SnapshotCache>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                for symbol in &config.symbols {
                    let down = links
                        .get(symbol)
                        .map(|link| link.down_longer_than(config.poll_grace))
                        .unwrap_or(false);
                    if !down {
                        continue;
                    }
                    match api.latest(symbol).await {
                        Ok(snapshot) => {
                            debug!(%symbol, seq = snapshot.seq, "fallback poll applied");
                            cache.apply_polled(&snapshot);
                        }
                        Err(err) => debug!(%symbol, "fallback poll failed: {err}"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_state_tracks_grace_window() {
        let link = LinkState::new();
        assert!(!link.is_connected());
        assert!(link.down_longer_than(Duration::ZERO));
        assert!(!link.down_longer_than(Duration::from_secs(3600)));

        link.set_connected();
        assert!(link.is_connected());
        assert!(!link.down_longer_than(Duration::ZERO));

        link.set_down();
        assert!(!link.is_connected());
    }

    #[test]
    fn backoff_growth_is_capped() {
        let config = ConsumerConfig::new("http://localhost:1", vec![Symbol::from("NQZ25")]);
        let mut backoff = config.reconnect_initial;
        for _ in 0..10 {
            backoff = (backoff * 2).min(config.reconnect_max);
        }
        assert_eq!(backoff, config.reconnect_max);
    }
}
