//! Snapshot extraction: turn "this file changed" into the newest logical
//! record the file contains.
//!
//! Only the tail of a file is ever read. Intraday files carry fixed-size
//! binary records after a fixed header, so the last complete record's offset
//! is computed directly; daily files are text, so a bounded tail window is
//! scanned for the last newline-terminated line and grown if the window
//! holds no complete line. Partial trailing records (a writer mid-append)
//! are truncated to the last known-good boundary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use thiserror::Error;
use tracing::debug;

use tickbridge_model::{SnapshotFields, SnapshotOrigin, Symbol, TickSnapshot};

use crate::archive::{ArchiveError, ArchiveReader};

/// Intraday file header length in bytes.
pub const INTRADAY_HEADER_LEN: u64 = 56;
/// Intraday record length in bytes.
pub const INTRADAY_RECORD_LEN: u64 = 40;

/// Default tail window for text files.
const INITIAL_TAIL_WINDOW: u64 = 64 * 1024;
/// Ceiling for adaptive window growth.
const MAX_TAIL_WINDOW: u64 = 1024 * 1024;

/// Logical kind of an archive file, decided by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Fixed-size binary intraday records (`.scid`).
    TickRecords,
    /// Text daily bars (`.dly`).
    DailyBars,
    Other,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("scid") => FileKind::TickRecords,
            Some("dly") => FileKind::DailyBars,
            _ => FileKind::Other,
        }
    }
}

/// Extraction failures. `Parse` drops the event and leaves the last
/// published snapshot untouched.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The file holds no complete record yet.
    #[error("no complete record in {}", .0.display())]
    NoData(PathBuf),

    #[error("undecodable record in {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("unwatched file kind: {}", .0.display())]
    UnknownKind(PathBuf),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl ExtractError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::NoData(_) => "no-data",
            ExtractError::Parse { .. } => "parse-error",
            ExtractError::UnknownKind(_) => "parse-error",
            ExtractError::Archive(err) => err.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;

/// Reads file tails through the [`ArchiveReader`] and decodes the newest
/// record into a [`TickSnapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotExtractor {
    reader: Arc<ArchiveReader>,
    initial_window: u64,
    max_window: u64,
}

impl SnapshotExtractor {
    pub fn new(reader: Arc<ArchiveReader>) -> Self {
        Self {
            reader,
            initial_window: INITIAL_TAIL_WINDOW,
            max_window: MAX_TAIL_WINDOW,
        }
    }

    /// Override the tail window bounds. Test hook; production uses defaults.
    pub fn with_windows(mut self, initial: u64, max: u64) -> Self {
        self.initial_window = initial.max(1);
        self.max_window = max.max(self.initial_window);
        self
    }

    /// Extract the newest logical record of `relative` as a snapshot for
    /// `symbol`.
    pub async fn extract(&self, symbol: &Symbol, relative: &Path) -> Result<TickSnapshot> {
        match FileKind::from_path(relative) {
            FileKind::TickRecords => self.extract_intraday(symbol, relative).await,
            FileKind::DailyBars => self.extract_daily(symbol, relative).await,
            FileKind::Other => Err(ExtractError::UnknownKind(relative.to_path_buf())),
        }
    }

    async fn extract_intraday(&self, symbol: &Symbol, relative: &Path) -> Result<TickSnapshot> {
        let stat = self.reader.stat(relative).await?;
        if stat.size < INTRADAY_HEADER_LEN + INTRADAY_RECORD_LEN {
            return Err(ExtractError::NoData(relative.to_path_buf()));
        }

        // Whole records only; a partial trailing record is a writer
        // mid-append and is skipped by the floor division.
        let complete = (stat.size - INTRADAY_HEADER_LEN) / INTRADAY_RECORD_LEN;
        let last_offset = INTRADAY_HEADER_LEN + (complete - 1) * INTRADAY_RECORD_LEN;
        let raw = self
            .reader
            .read_range(
                relative,
                last_offset,
                INTRADAY_RECORD_LEN,
                tickbridge_model::ReadMode::Binary,
            )
            .await?;
        if raw.len() as u64 != INTRADAY_RECORD_LEN {
            // The file shrank between stat and read.
            return Err(ExtractError::NoData(relative.to_path_buf()));
        }

        let record = IntradayRecord::decode(&raw).map_err(|reason| ExtractError::Parse {
            path: relative.to_path_buf(),
            reason,
        })?;
        debug!(%symbol, path = %relative.display(), ts = %record.ts, "extracted intraday record");

        Ok(TickSnapshot {
            symbol: symbol.clone(),
            ts: record.ts,
            fields: SnapshotFields {
                last: record.last,
                bid: record.bid,
                ask: record.ask,
                volume: record.volume,
                total_volume: None,
            },
            origin: SnapshotOrigin::TickRecords,
        })
    }

    async fn extract_daily(&self, symbol: &Symbol, relative: &Path) -> Result<TickSnapshot> {
        let stat = self.reader.stat(relative).await?;
        let mut window = self.initial_window.min(self.reader.max_read_bytes());

        loop {
            let raw = self.reader.tail(relative, window).await?;
            let covers_file = raw.len() as u64 >= stat.size;
            let text = String::from_utf8_lossy(&raw);
            if let Some(line) = last_complete_line(&text, covers_file) {
                let bar = DailyBar::parse(line).map_err(|reason| ExtractError::Parse {
                    path: relative.to_path_buf(),
                    reason,
                })?;
                debug!(%symbol, path = %relative.display(), date = %bar.date, "extracted daily bar");
                return Ok(TickSnapshot {
                    symbol: symbol.clone(),
                    ts: bar.ts(),
                    fields: SnapshotFields {
                        last: Some(bar.close),
                        bid: None,
                        ask: None,
                        volume: None,
                        total_volume: bar.volume,
                    },
                    origin: SnapshotOrigin::DailyBars,
                });
            }

            if window >= stat.size || window >= self.max_window {
                return Err(ExtractError::NoData(relative.to_path_buf()));
            }
            window = (window * 2).min(self.max_window);
        }
    }
}

/// The last complete, non-empty line of `text`.
///
/// A line is only known-good when a `\n` terminates it *and* its start is
/// proven: either a preceding `\n` inside the window, or the window reaching
/// back to the start of the file. A tail window that begins mid-line must
/// not surface the fragment as data.
fn last_complete_line(text: &str, covers_file: bool) -> Option<&str> {
    let end = text.rfind('\n')?;
    let mut body = &text[..end];
    loop {
        match body.rfind('\n') {
            Some(prev) => {
                let line = &body[prev + 1..];
                if !line.trim().is_empty() {
                    return Some(line);
                }
                body = &body[..prev];
            }
            None => {
                return (covers_file && !body.trim().is_empty()).then_some(body);
            }
        }
    }
}

/// One decoded fixed-size intraday record.
///
/// Layout (little-endian): i64 microseconds since 1899-12-30 UTC, then
/// f32 open/high/low/close, then u32 trades/volume/bid-volume/ask-volume.
/// Tick files store the ask in the high slot and the bid in the low slot;
/// close is the trade price.
struct IntradayRecord {
    ts: DateTime<Utc>,
    last: Option<Decimal>,
    bid: Option<Decimal>,
    ask: Option<Decimal>,
    volume: Option<u64>,
}

impl IntradayRecord {
    fn decode(raw: &[u8]) -> std::result::Result<Self, String> {
        if raw.len() != INTRADAY_RECORD_LEN as usize {
            return Err(format!("record is {} bytes, want {INTRADAY_RECORD_LEN}", raw.len()));
        }

        let micros = i64::from_le_bytes(raw[0..8].try_into().expect("slice length checked"));
        if micros < 0 {
            return Err(format!("negative timestamp: {micros}"));
        }
        let ts = intraday_epoch() + Duration::microseconds(micros);

        let high = f32::from_le_bytes(raw[12..16].try_into().expect("slice length checked"));
        let low = f32::from_le_bytes(raw[16..20].try_into().expect("slice length checked"));
        let close = f32::from_le_bytes(raw[20..24].try_into().expect("slice length checked"));
        let total_volume = u32::from_le_bytes(raw[28..32].try_into().expect("slice length checked"));

        Ok(Self {
            ts,
            last: price_field(close, "close")?,
            bid: price_field(low, "low")?,
            ask: price_field(high, "high")?,
            volume: (total_volume > 0).then_some(u64::from(total_volume)),
        })
    }
}

/// Convert a record float to a decimal price. Zero means unset in tick
/// files; NaN and infinities are corruption.
fn price_field(value: f32, name: &str) -> std::result::Result<Option<Decimal>, String> {
    if !value.is_finite() {
        return Err(format!("non-finite {name} price: {value}"));
    }
    if value == 0.0 {
        return Ok(None);
    }
    Decimal::from_f32(value)
        .map(|d| Some(d.normalize()))
        .ok_or_else(|| format!("unrepresentable {name} price: {value}"))
}

/// The intraday record epoch: 1899-12-30 00:00:00 UTC.
fn intraday_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1899, 12, 30, 0, 0, 0)
        .single()
        .expect("fixed epoch is valid")
}

/// One parsed text daily bar: `date, open, high, low, close, volume[, oi]`.
struct DailyBar {
    date: NaiveDate,
    close: Decimal,
    volume: Option<u64>,
}

impl DailyBar {
    fn parse(line: &str) -> std::result::Result<Self, String> {
        let cells: Vec<&str> = line.split(',').map(str::trim).collect();
        if cells.len() < 5 {
            return Err(format!("expected at least 5 columns, got {}", cells.len()));
        }
        let date = cells[0]
            .parse::<NaiveDate>()
            .map_err(|err| format!("bad date {:?}: {err}", cells[0]))?;
        let close = cells[4]
            .parse::<Decimal>()
            .map_err(|err| format!("bad close {:?}: {err}", cells[4]))?;
        let volume = match cells.get(5) {
            Some(cell) if !cell.is_empty() => Some(
                cell.parse::<u64>()
                    .map_err(|err| format!("bad volume {cell:?}: {err}"))?,
            ),
            _ => None,
        };
        Ok(Self { date, close, volume })
    }

    fn ts(&self) -> DateTime<Utc> {
        self.date
            .and_hms_opt(0, 0, 0)
            .expect("midnight is valid")
            .and_utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    /// Serialize one intraday record the way the charting app writes them.
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

    fn write_intraday(path: &Path, records: &[[u8; 40]], trailing_garbage: usize) {
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(&[0u8; INTRADAY_HEADER_LEN as usize]).unwrap();
        for record in records {
            file.write_all(record).unwrap();
        }
        file.write_all(&vec![0xAB; trailing_garbage]).unwrap();
    }

    fn fixture() -> (tempfile::TempDir, SnapshotExtractor) {
        let dir = tempfile::tempdir().unwrap();
        let reader = ArchiveReader::open(dir.path(), 4 * 1024 * 1024).unwrap();
        (dir, SnapshotExtractor::new(Arc::new(reader)))
    }

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 10, h, m, s).unwrap()
    }

    #[tokio::test]
    async fn extracts_last_intraday_record() {
        let (dir, extractor) = fixture();
        let records = vec![
            encode_record(ts(14, 0, 0), 23500.00, 23500.50, 23500.25, 1),
            encode_record(ts(14, 0, 1), 23500.25, 23500.75, 23500.50, 2),
        ];
        write_intraday(&dir.path().join("NQZ25.scid"), &records, 0);

        let snapshot = extractor
            .extract(&Symbol::from("NQZ25"), Path::new("NQZ25.scid"))
            .await
            .unwrap();
        assert_eq!(snapshot.ts, ts(14, 0, 1));
        assert_eq!(snapshot.fields.last, Some(dec("23500.5")));
        assert_eq!(snapshot.fields.bid, Some(dec("23500.25")));
        assert_eq!(snapshot.fields.ask, Some(dec("23500.75")));
        assert_eq!(snapshot.fields.volume, Some(2));
        assert_eq!(snapshot.origin, SnapshotOrigin::TickRecords);
    }

    #[tokio::test]
    async fn ignores_partial_trailing_record() {
        let (dir, extractor) = fixture();
        let records = vec![encode_record(ts(14, 0, 0), 23500.00, 23500.50, 23500.25, 1)];
        // 13 stray bytes: a record the writer has not finished.
        write_intraday(&dir.path().join("NQZ25.scid"), &records, 13);

        let snapshot = extractor
            .extract(&Symbol::from("NQZ25"), Path::new("NQZ25.scid"))
            .await
            .unwrap();
        assert_eq!(snapshot.ts, ts(14, 0, 0));
        assert_eq!(snapshot.fields.volume, Some(1));
    }

    #[tokio::test]
    async fn header_only_file_is_no_data() {
        let (dir, extractor) = fixture();
        write_intraday(&dir.path().join("NQZ25.scid"), &[], 0);
        let err = extractor
            .extract(&Symbol::from("NQZ25"), Path::new("NQZ25.scid"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "no-data");
    }

    #[tokio::test]
    async fn zero_prices_are_absent_fields() {
        let (dir, extractor) = fixture();
        let records = vec![encode_record(ts(14, 0, 0), 0.0, 0.0, 23500.25, 0)];
        write_intraday(&dir.path().join("NQZ25.scid"), &records, 0);

        let snapshot = extractor
            .extract(&Symbol::from("NQZ25"), Path::new("NQZ25.scid"))
            .await
            .unwrap();
        assert_eq!(snapshot.fields.bid, None);
        assert_eq!(snapshot.fields.ask, None);
        assert_eq!(snapshot.fields.volume, None);
        assert_eq!(snapshot.fields.last, Some(dec("23500.25")));
    }

    #[tokio::test]
    async fn extracts_last_daily_bar() {
        let (dir, extractor) = fixture();
        std::fs::write(
            dir.path().join("NQZ25.dly"),
            "2025-09-08, 23100.00, 23300.00, 23050.00, 23250.50, 410221\n\
             2025-09-09, 23250.50, 23550.00, 23200.00, 23500.25, 512344\n",
        )
        .unwrap();

        let snapshot = extractor
            .extract(&Symbol::from("NQZ25"), Path::new("NQZ25.dly"))
            .await
            .unwrap();
        assert_eq!(snapshot.fields.last, Some(dec("23500.25")));
        assert_eq!(snapshot.fields.total_volume, Some(512344));
        assert_eq!(snapshot.origin, SnapshotOrigin::DailyBars);
        assert_eq!(
            snapshot.ts,
            Utc.with_ymd_and_hms(2025, 9, 9, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn unterminated_daily_line_uses_previous_bar() {
        let (dir, extractor) = fixture();
        std::fs::write(
            dir.path().join("NQZ25.dly"),
            "2025-09-08, 23100.00, 23300.00, 23050.00, 23250.50, 410221\n2025-09-09, 2325",
        )
        .unwrap();

        let snapshot = extractor
            .extract(&Symbol::from("NQZ25"), Path::new("NQZ25.dly"))
            .await
            .unwrap();
        assert_eq!(snapshot.fields.last, Some(dec("23250.50")));
    }

    #[tokio::test]
    async fn daily_window_grows_until_a_line_fits() {
        let (dir, extractor) = fixture();
        let extractor = extractor.with_windows(8, 4096);
        std::fs::write(
            dir.path().join("NQZ25.dly"),
            "2025-09-09, 23250.50, 23550.00, 23200.00, 23500.25, 512344\n",
        )
        .unwrap();

        let snapshot = extractor
            .extract(&Symbol::from("NQZ25"), Path::new("NQZ25.dly"))
            .await
            .unwrap();
        assert_eq!(snapshot.fields.last, Some(dec("23500.25")));
    }

    #[tokio::test]
    async fn garbage_daily_line_is_parse_error() {
        let (dir, extractor) = fixture();
        std::fs::write(dir.path().join("NQZ25.dly"), "not,a,bar,at,all\n").unwrap();
        let err = extractor
            .extract(&Symbol::from("NQZ25"), Path::new("NQZ25.dly"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "parse-error");
    }

    #[tokio::test]
    async fn unknown_extension_is_skipped() {
        let (dir, extractor) = fixture();
        std::fs::write(dir.path().join("NQZ25.tmp"), "junk").unwrap();
        let err = extractor
            .extract(&Symbol::from("NQZ25"), Path::new("NQZ25.tmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::UnknownKind(_)));
    }
}
