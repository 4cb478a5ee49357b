use crate::DataError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use investta_core::{PricePoint, PriceSeries, Timeframe};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Load a candle series from a CSV file. The instrument is the file stem.
///
/// See [`load_series_from_reader`] for the accepted layout.
pub fn load_series_from_csv(path: &Path, timeframe: Timeframe) -> Result<PriceSeries, DataError> {
    let instrument = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let file = File::open(path)?;
    let series = load_series_from_reader(file, instrument, timeframe)?;
    debug!(path = %path.display(), points = series.len(), "Loaded CSV series");
    Ok(series)
}

/// Load a candle series from any CSV source.
///
/// Expected columns (case-insensitive, flexible ordering):
/// `timestamp` (or `date`, `datetime`, `time`), `open`, `high`, `low`, `close`
/// and an optional `volume`.
///
/// Rows are sorted by timestamp and then appended through
/// [`PriceSeries::append`], so duplicate timestamps and invalid candles are
/// rejected rather than silently kept.
pub fn load_series_from_reader<R: Read>(
    source: R,
    instrument: impl Into<String>,
    timeframe: Timeframe,
) -> Result<PriceSeries, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers = reader
        .headers()
        .map_err(|e| DataError::ParseError(format!("Failed to read headers: {}", e)))?
        .clone();

    let col_map = resolve_columns(&headers)?;

    let mut points = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result.map_err(|e| DataError::ParseError(format!("CSV record error: {}", e)))?;
        // header is line 1
        let line = row + 2;

        let timestamp = parse_timestamp(field(&record, col_map.timestamp, "timestamp", line)?)?;
        let open = parse_decimal(field(&record, col_map.open, "open", line)?, "open")?;
        let high = parse_decimal(field(&record, col_map.high, "high", line)?, "high")?;
        let low = parse_decimal(field(&record, col_map.low, "low", line)?, "low")?;
        let close = parse_decimal(field(&record, col_map.close, "close", line)?, "close")?;
        let volume = match col_map.volume.and_then(|idx| record.get(idx)) {
            Some(v) if !v.is_empty() => parse_decimal(v, "volume")?,
            _ => Decimal::ZERO,
        };

        points.push(PricePoint {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    // Sort by timestamp
    points.sort_by_key(|p| p.timestamp);

    let mut series = PriceSeries::with_capacity(instrument, timeframe, points.len());
    series.try_extend(points)?;
    Ok(series)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

struct ColumnMap {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

fn resolve_columns(headers: &csv::StringRecord) -> Result<ColumnMap, DataError> {
    let ts = find_column(headers, &["timestamp", "date", "datetime", "time"])
        .ok_or_else(|| DataError::ParseError("No timestamp column found".into()))?;
    let open = find_column(headers, &["open", "o"])
        .ok_or_else(|| DataError::ParseError("No open column found".into()))?;
    let high = find_column(headers, &["high", "h"])
        .ok_or_else(|| DataError::ParseError("No high column found".into()))?;
    let low = find_column(headers, &["low", "l"])
        .ok_or_else(|| DataError::ParseError("No low column found".into()))?;
    let close = find_column(headers, &["close", "c", "adj close"])
        .ok_or_else(|| DataError::ParseError("No close column found".into()))?;
    let volume = find_column(headers, &["volume", "vol", "v"]);

    Ok(ColumnMap {
        timestamp: ts,
        open,
        high,
        low,
        close,
        volume,
    })
}

/// First header matching any alias, in alias order.
fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    names.iter().find_map(|name| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    })
}

fn field<'r>(
    record: &'r csv::StringRecord,
    index: usize,
    name: &str,
    line: usize,
) -> Result<&'r str, DataError> {
    record
        .get(index)
        .ok_or_else(|| DataError::ParseError(format!("Line {}: missing {} value", line, name)))
}

fn parse_decimal(s: &str, field: &str) -> Result<Decimal, DataError> {
    let s = s.trim();
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .map_err(|e| DataError::ParseError(format!("Failed to parse {} '{}': {}", field, s, e)))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DataError> {
    let s = s.trim();

    // RFC 3339 / ISO 8601 with offset
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Without offset, assume UTC
    let formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
        "%Y%m%d %H:%M:%S",
        "%d.%m.%Y %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        }
    }

    for fmt in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            let naive = date.and_time(NaiveTime::default());
            return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        }
    }

    // Unix seconds
    if let Ok(ts) = s.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp(ts, 0) {
            return Ok(dt);
        }
    }

    Err(DataError::ParseError(format!(
        "Unable to parse timestamp: '{}'",
        s
    )))
}
