use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::source::DataSource;

/// Get current timestamp in milliseconds since epoch
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Get current timestamp in unix seconds (fractional)
pub fn current_unix_secs() -> f64 {
    current_timestamp_ms() as f64 / 1000.0
}

static SOURCE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Derive a source id for one observation. The sequence suffix keeps ids
/// unique even when two observations for the same ticker share a
/// millisecond.
pub fn make_source_id(source: DataSource, ticker: &str, timestamp_secs: f64) -> String {
    let seq = SOURCE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!(
        "{}:{}:{}:{}",
        source.as_str(),
        ticker,
        (timestamp_secs * 1000.0) as u64,
        seq
    )
}
