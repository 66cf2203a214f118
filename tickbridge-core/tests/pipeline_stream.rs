//! End-to-end pipeline test: archive file writes through the watcher,
//! extractor, and delta engine, out to a hub subscriber.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio::time::timeout;

use tickbridge_config::{HubConfig, WatcherConfig};
use tickbridge_core::archive::ArchiveReader;
use tickbridge_core::delta::DeltaEngine;
use tickbridge_core::extract::{INTRADAY_HEADER_LEN, SnapshotExtractor};
use tickbridge_core::health::HealthState;
use tickbridge_core::hub::SubscriptionHub;
use tickbridge_core::pipeline::spawn_pipeline;
use tickbridge_core::registry::SymbolRegistry;
use tickbridge_core::watch::ArchiveWatcher;
use tickbridge_model::{Role, StreamMessage, Symbol, SymbolRecord, Timeframe};

fn intraday_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1899, 12, 30, 0, 0, 0).unwrap()
}

fn encode_record(ts: DateTime<Utc>, bid: f32, ask: f32, last: f32, volume: u32) -> [u8; 40] {
    let micros = (ts - intraday_epoch()).num_microseconds().unwrap();
    let mut raw = [0u8; 40];
    raw[0..8].copy_from_slice(&micros.to_le_bytes());
    raw[12..16].copy_from_slice(&ask.to_le_bytes());
    raw[16..20].copy_from_slice(&bid.to_le_bytes());
    raw[20..24].copy_from_slice(&last.to_le_bytes());
    raw[24..28].copy_from_slice(&1u32.to_le_bytes());
    raw[28..32].copy_from_slice(&volume.to_le_bytes());
    raw
}

fn append(path: &Path, bytes: &[u8]) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
}

fn record(id: &str, role: Role) -> SymbolRecord {
    SymbolRecord {
        identifier: Symbol::from(id),
        role,
        asset_class: "index-future".into(),
        expiration: NaiveDate::from_ymd_opt(2026, 12, 19).unwrap(),
        rollover: NaiveDate::from_ymd_opt(2026, 12, 15).unwrap(),
        priority: 1,
        timeframes: BTreeSet::from([Timeframe::Tick]),
        is_primary: role == Role::Primary,
    }
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

#[tokio::test]
async fn file_appends_stream_as_snapshot_then_delta() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(SymbolRegistry::new(vec![record("NQZ25", Role::Primary)]).unwrap());
    let reader = Arc::new(ArchiveReader::open(dir.path(), 4 * 1024 * 1024).unwrap());
    let engine = Arc::new(DeltaEngine::new());
    let hub = Arc::new(SubscriptionHub::new(
        Arc::clone(&engine),
        HubConfig::default(),
    ));
    let health = Arc::new(HealthState::new());

    let (update_tx, update_rx) = mpsc::channel(64);
    let watcher = ArchiveWatcher::spawn(
        dir.path().to_path_buf(),
        Arc::clone(&registry),
        WatcherConfig { debounce_ms: 50 },
        Arc::clone(&health),
        update_tx,
    )
    .unwrap();
    let pipeline = spawn_pipeline(
        update_rx,
        SnapshotExtractor::new(Arc::clone(&reader)),
        Arc::clone(&engine),
        Arc::clone(&hub),
        Arc::clone(&registry),
        Arc::clone(&health),
    );

    let subscriber = hub.subscribe(Symbol::from("NQZ25"));
    let file = dir.path().join("NQZ25.scid");

    // First record: published whole as snapshot seq 1.
    let ts1 = Utc.with_ymd_and_hms(2025, 9, 10, 14, 0, 0).unwrap();
    append(&file, &[0u8; INTRADAY_HEADER_LEN as usize]);
    append(&file, &encode_record(ts1, 23500.00, 23500.50, 23500.25, 1));

    let first = timeout(Duration::from_secs(5), subscriber.next_message())
        .await
        .expect("no snapshot within deadline")
        .unwrap();
    match first {
        StreamMessage::Snapshot { ref symbol, seq, ts, ref fields } => {
            assert_eq!(symbol, &Symbol::from("NQZ25"));
            assert_eq!(seq, 1);
            assert_eq!(ts, ts1);
            assert_eq!(fields.last, Some(dec("23500.25")));
            assert_eq!(fields.bid, Some(dec("23500")));
            assert_eq!(fields.ask, Some(dec("23500.5")));
            assert_eq!(fields.volume, Some(1));
        }
        other => panic!("expected snapshot, got {other:?}"),
    }

    // Second record: only the changed fields, seq 2.
    let ts2 = Utc.with_ymd_and_hms(2025, 9, 10, 14, 0, 1).unwrap();
    append(&file, &encode_record(ts2, 23500.25, 23500.75, 23500.50, 2));

    let second = timeout(Duration::from_secs(5), subscriber.next_message())
        .await
        .expect("no delta within deadline")
        .unwrap();
    match second {
        StreamMessage::Delta { seq, ts, ref fields, .. } => {
            assert_eq!(seq, 2);
            assert_eq!(ts, ts2);
            assert_eq!(fields.last, Some(dec("23500.5")));
            assert_eq!(fields.bid, Some(dec("23500.25")));
            assert_eq!(fields.ask, Some(dec("23500.75")));
            assert_eq!(fields.volume, Some(2));
        }
        other => panic!("expected delta, got {other:?}"),
    }

    // An identical record changes nothing and publishes nothing.
    append(&file, &encode_record(ts2, 23500.25, 23500.75, 23500.50, 2));
    let silent = timeout(Duration::from_millis(800), subscriber.next_message()).await;
    assert!(silent.is_err(), "identical record produced {silent:?}");

    let report = health.report(&reader, &engine, &hub);
    assert!(report.watcher_ok);
    assert!(report.archive_ok);
    assert_eq!(report.subscriptions, 1);
    assert_eq!(report.last_seq_by_symbol.get("NQZ25"), Some(&2));

    drop(subscriber);
    watcher.shutdown();
    pipeline.abort();
}

#[tokio::test]
async fn retired_symbols_stop_publishing_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(SymbolRegistry::new(vec![record("NQZ25", Role::Primary)]).unwrap());
    let reader = Arc::new(ArchiveReader::open(dir.path(), 4 * 1024 * 1024).unwrap());
    let engine = Arc::new(DeltaEngine::new());
    let hub = Arc::new(SubscriptionHub::new(
        Arc::clone(&engine),
        HubConfig::default(),
    ));
    let health = Arc::new(HealthState::new());

    let (update_tx, update_rx) = mpsc::channel(64);
    let watcher = ArchiveWatcher::spawn(
        dir.path().to_path_buf(),
        Arc::clone(&registry),
        WatcherConfig { debounce_ms: 50 },
        Arc::clone(&health),
        update_tx,
    )
    .unwrap();
    let pipeline = spawn_pipeline(
        update_rx,
        SnapshotExtractor::new(Arc::clone(&reader)),
        Arc::clone(&engine),
        Arc::clone(&hub),
        Arc::clone(&registry),
        Arc::clone(&health),
    );

    let subscriber = hub.subscribe(Symbol::from("NQZ25"));

    // Rebind the role to the successor contract; NQZ25 leaves the active set.
    registry.reload(vec![record("NQH26", Role::Primary)]).unwrap();
    // Give the watcher's epoch poll a beat to refresh its pattern table.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let file = dir.path().join("NQZ25.scid");
    let ts = Utc.with_ymd_and_hms(2025, 9, 10, 14, 0, 0).unwrap();
    append(&file, &[0u8; INTRADAY_HEADER_LEN as usize]);
    append(&file, &encode_record(ts, 23500.00, 23500.50, 23500.25, 1));

    let silent = timeout(Duration::from_millis(800), subscriber.next_message()).await;
    assert!(silent.is_err(), "retired symbol still published: {silent:?}");

    drop(subscriber);
    watcher.shutdown();
    pipeline.abort();
}
