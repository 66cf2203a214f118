//! Filesystem watch pipeline for the archive root.
//!
//! A thin wrapper around `notify` that debounces raw filesystem
//! notifications into at most one logical update per (symbol, quiet window).
//! The pattern table mapping file names to symbols is derived from the
//! registry's active records and refreshed whenever the registry epoch
//! moves, so a rollover or reload changes what is watched without a restart.
//! Losing the native watch handle is recovered by re-establishing it and
//! emitting a synthetic resync update per active symbol.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use tickbridge_config::WatcherConfig;
use tickbridge_model::{Symbol, Timeframe};

use crate::health::HealthState;
use crate::registry::SymbolRegistry;

/// One debounced "this symbol's file changed" event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpdate {
    pub symbol: Symbol,
    /// Path relative to the archive root, ready for the extractor.
    pub path: PathBuf,
    /// Set on synthetic updates after a watch handle was re-established.
    pub resync: bool,
}

enum WatchMessage {
    Event(Event),
    Error(String),
}

impl fmt::Debug for WatchMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchMessage::Event(event) => f
                .debug_struct("WatchMessage::Event")
                .field("kind", &event.kind)
                .field("path_count", &event.paths.len())
                .finish(),
            WatchMessage::Error(message) => f
                .debug_struct("WatchMessage::Error")
                .field("message", message)
                .finish(),
        }
    }
}

/// (upper-cased stem, lower-cased extension) -> symbol, for the currently
/// active records.
#[derive(Debug, Default)]
struct PatternTable {
    by_name: HashMap<(String, String), Symbol>,
}

impl PatternTable {
    fn build(registry: &SymbolRegistry) -> Self {
        let mut by_name = HashMap::new();
        for record in registry.active_records() {
            let stem = record.identifier.as_str().to_ascii_uppercase();
            let intraday = [Timeframe::Tick, Timeframe::OneMinute, Timeframe::ThirtyMinute]
                .iter()
                .any(|tf| record.wants(*tf));
            if intraday {
                by_name.insert((stem.clone(), "scid".to_string()), record.identifier.clone());
            }
            if record.wants(Timeframe::Daily) {
                by_name.insert((stem.clone(), "dly".to_string()), record.identifier.clone());
            }
        }
        Self { by_name }
    }

    fn match_path(&self, path: &Path) -> Option<&Symbol> {
        let stem = path.file_stem()?.to_str()?.to_ascii_uppercase();
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.by_name.get(&(stem, ext))
    }

    /// Expected file names per active symbol, used to synthesize resync
    /// updates when no prior event recorded a real path.
    fn candidate_names(&self) -> Vec<(Symbol, PathBuf)> {
        self.by_name
            .iter()
            .map(|((stem, ext), symbol)| (symbol.clone(), PathBuf::from(format!("{stem}.{ext}"))))
            .collect()
    }
}

#[derive(Debug)]
struct Pending {
    path: PathBuf,
    deadline: Instant,
    resync: bool,
}

/// Owns the notify handle and the debounce task.
pub struct ArchiveWatcher {
    task: JoinHandle<()>,
}

impl fmt::Debug for ArchiveWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveWatcher")
            .field("task_finished", &self.task.is_finished())
            .finish()
    }
}

impl ArchiveWatcher {
    /// Start watching `root` recursively. Debounced updates for active
    /// symbols flow into `out`.
    pub fn spawn(
        root: PathBuf,
        registry: Arc<SymbolRegistry>,
        config: WatcherConfig,
        health: Arc<HealthState>,
        out: mpsc::Sender<FileUpdate>,
    ) -> notify::Result<Self> {
        let (raw_tx, raw_rx) = mpsc::channel::<WatchMessage>(1024);
        let watcher = init_watcher(&root, raw_tx.clone())?;
        health.set_watcher_ok(true);
        info!(root = %root.display(), "archive watcher started");

        let task = tokio::spawn(watch_loop(
            root,
            registry,
            config.debounce(),
            health,
            watcher,
            raw_tx,
            raw_rx,
            out,
        ));
        Ok(Self { task })
    }

    /// Stop watching. Pending debounces are discarded.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

fn init_watcher(root: &Path, tx: mpsc::Sender<WatchMessage>) -> notify::Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| {
            let message = match result {
                Ok(event) => WatchMessage::Event(event),
                Err(err) => WatchMessage::Error(err.to_string()),
            };
            // notify runs this on its own thread; never block it. A full
            // channel only sheds raw events, which the debounce collapses
            // anyway.
            if let Err(err) = tx.try_send(message) {
                warn!("raw watch channel full, shedding event: {err}");
            }
        },
        notify::Config::default(),
    )?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

#[allow(clippy::too_many_arguments)]
async fn watch_loop(
    root: PathBuf,
    registry: Arc<SymbolRegistry>,
    debounce: Duration,
    health: Arc<HealthState>,
    mut watcher: RecommendedWatcher,
    raw_tx: mpsc::Sender<WatchMessage>,
    mut raw_rx: mpsc::Receiver<WatchMessage>,
    out: mpsc::Sender<FileUpdate>,
) {
    let mut patterns = PatternTable::build(&registry);
    // Rollover is date-driven, so the pattern table can change without a
    // reload; track both the registry generation and the build date.
    let mut built_for = (registry.epoch(), chrono::Utc::now().date_naive());
    let mut pending: HashMap<Symbol, Pending> = HashMap::new();
    // Last real path seen per symbol; resyncs prefer these over guesses.
    let mut last_paths: HashMap<Symbol, PathBuf> = HashMap::new();
    let mut epoch_check = tokio::time::interval(Duration::from_secs(1));

    loop {
        let next_deadline = pending.values().map(|p| p.deadline).min();

        tokio::select! {
            message = raw_rx.recv() => {
                let Some(message) = message else { break };
                match message {
                    WatchMessage::Event(event) => {
                        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                            continue;
                        }
                        for path in &event.paths {
                            if is_scratch_file(path) {
                                continue;
                            }
                            let Some(symbol) = patterns.match_path(path) else {
                                continue;
                            };
                            let Ok(relative) = path.strip_prefix(&root) else {
                                continue;
                            };
                            let symbol = symbol.clone();
                            let relative = relative.to_path_buf();
                            debug!(%symbol, path = %relative.display(), "arming debounce");
                            last_paths.insert(symbol.clone(), relative.clone());
                            pending.insert(symbol, Pending {
                                path: relative,
                                deadline: Instant::now() + debounce,
                                resync: false,
                            });
                        }
                    }
                    WatchMessage::Error(message) => {
                        error!("watch-lost: {message}");
                        health.set_watcher_ok(false);
                        match init_watcher(&root, raw_tx.clone()) {
                            Ok(rebuilt) => {
                                watcher = rebuilt;
                                health.set_watcher_ok(true);
                                info!("watch handle re-established, scheduling resync");
                                arm_resyncs(&patterns, &last_paths, &mut pending, debounce);
                            }
                            Err(err) => {
                                // Health stays degraded; the next error or
                                // epoch tick retries.
                                error!("failed to re-establish watch handle: {err}");
                            }
                        }
                    }
                }
            }
            _ = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)), if next_deadline.is_some() => {
                let now = Instant::now();
                let due: Vec<Symbol> = pending
                    .iter()
                    .filter(|(_, p)| p.deadline <= now)
                    .map(|(symbol, _)| symbol.clone())
                    .collect();
                for symbol in due {
                    let Some(entry) = pending.remove(&symbol) else { continue };
                    // A reload may have retired the symbol mid-debounce.
                    if !registry.is_active(&symbol) {
                        debug!(%symbol, "dropping debounce for retired symbol");
                        continue;
                    }
                    let update = FileUpdate {
                        symbol: symbol.clone(),
                        path: entry.path,
                        resync: entry.resync,
                    };
                    if out.send(update).await.is_err() {
                        return;
                    }
                }
            }
            _ = epoch_check.tick() => {
                let current = (registry.epoch(), chrono::Utc::now().date_naive());
                if current != built_for {
                    built_for = current;
                    patterns = PatternTable::build(&registry);
                    pending.retain(|symbol, _| registry.is_active(symbol));
                    last_paths.retain(|symbol, _| registry.is_active(symbol));
                    info!("watcher pattern table refreshed");
                }
                if !health.watcher_ok() {
                    if let Ok(rebuilt) = init_watcher(&root, raw_tx.clone()) {
                        watcher = rebuilt;
                        health.set_watcher_ok(true);
                        info!("watch handle re-established, scheduling resync");
                        arm_resyncs(&patterns, &last_paths, &mut pending, debounce);
                    }
                }
            }
        }
    }
    drop(watcher);
}

/// Arm a resync debounce for every active symbol so the extractor re-reads
/// each tail after a watch gap.
fn arm_resyncs(
    patterns: &PatternTable,
    last_paths: &HashMap<Symbol, PathBuf>,
    pending: &mut HashMap<Symbol, Pending>,
    debounce: Duration,
) {
    let deadline = Instant::now() + debounce;
    for (symbol, candidate) in patterns.candidate_names() {
        let path = last_paths.get(&symbol).cloned().unwrap_or(candidate);
        pending.insert(
            symbol,
            Pending {
                path,
                deadline,
                resync: true,
            },
        );
    }
}

/// Editor droppings and writer scratch files never map to a symbol.
fn is_scratch_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("tmp" | "swp" | "bak" | "part")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;
    use tickbridge_model::{Role, SymbolRecord};

    fn record(id: &str, timeframes: BTreeSet<Timeframe>) -> SymbolRecord {
        SymbolRecord {
            identifier: Symbol::from(id),
            role: Role::Primary,
            asset_class: "index-future".into(),
            expiration: NaiveDate::from_ymd_opt(2026, 12, 19).unwrap(),
            rollover: NaiveDate::from_ymd_opt(2026, 12, 15).unwrap(),
            priority: 1,
            timeframes,
            is_primary: true,
        }
    }

    fn registry() -> Arc<SymbolRegistry> {
        Arc::new(
            SymbolRegistry::new(vec![record(
                "NQZ25",
                BTreeSet::from([Timeframe::Tick, Timeframe::Daily]),
            )])
            .unwrap(),
        )
    }

    #[test]
    fn pattern_table_matches_watched_names() {
        let patterns = PatternTable::build(&registry());
        assert_eq!(
            patterns.match_path(Path::new("/data/NQZ25.scid")),
            Some(&Symbol::from("NQZ25"))
        );
        assert_eq!(
            patterns.match_path(Path::new("/data/depth/nqz25.dly")),
            Some(&Symbol::from("NQZ25"))
        );
        assert_eq!(patterns.match_path(Path::new("/data/ESZ25.scid")), None);
        assert_eq!(patterns.match_path(Path::new("/data/NQZ25.txt")), None);
    }

    #[test]
    fn intraday_only_records_skip_daily_files() {
        let registry = Arc::new(
            SymbolRegistry::new(vec![record("NQZ25", BTreeSet::from([Timeframe::Tick]))]).unwrap(),
        );
        let patterns = PatternTable::build(&registry);
        assert!(patterns.match_path(Path::new("NQZ25.scid")).is_some());
        assert!(patterns.match_path(Path::new("NQZ25.dly")).is_none());
    }

    #[test]
    fn scratch_files_are_ignored() {
        assert!(is_scratch_file(Path::new("NQZ25.scid.tmp")));
        assert!(is_scratch_file(Path::new("NQZ25.part")));
        assert!(!is_scratch_file(Path::new("NQZ25.scid")));
    }

    #[tokio::test]
    async fn debounce_collapses_a_write_burst() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        let health = Arc::new(HealthState::new());
        let (tx, mut rx) = mpsc::channel(16);
        let watcher = ArchiveWatcher::spawn(
            dir.path().to_path_buf(),
            registry,
            WatcherConfig { debounce_ms: 100 },
            health,
            tx,
        )
        .unwrap();

        let file = dir.path().join("NQZ25.scid");
        for _ in 0..5 {
            std::fs::write(&file, b"burst").unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watcher produced no update")
            .expect("channel closed");
        assert_eq!(update.symbol, Symbol::from("NQZ25"));
        assert_eq!(update.path, PathBuf::from("NQZ25.scid"));
        assert!(!update.resync);

        // The burst collapsed: nothing else is pending after a quiet period.
        let extra = tokio::time::timeout(Duration::from_millis(400), rx.recv()).await;
        assert!(extra.is_err(), "burst produced a second update: {extra:?}");

        watcher.shutdown();
    }

    #[tokio::test]
    async fn unwatched_files_produce_no_updates() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        let health = Arc::new(HealthState::new());
        let (tx, mut rx) = mpsc::channel(16);
        let watcher = ArchiveWatcher::spawn(
            dir.path().to_path_buf(),
            registry,
            WatcherConfig { debounce_ms: 50 },
            health,
            tx,
        )
        .unwrap();

        std::fs::write(dir.path().join("ESZ25.scid"), b"not watched").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not a symbol").unwrap();

        let update = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(update.is_err(), "unexpected update: {update:?}");

        watcher.shutdown();
    }
}
