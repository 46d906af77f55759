use serde::{Deserialize, Serialize};

use crate::types::source::DataSource;

/// Inbound market-data observation. The original fed duck-typed payloads
/// through a single entry point; here each shape is a tagged variant and
/// source inference is a pattern match.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Observation {
    Tick(TickData),
    Ohlcv(OhlcvData),
    Fmv(FmvData),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TickData {
    pub ticker: String,
    pub timestamp: f64, // unix seconds
    pub price: f64,
    pub volume: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OhlcvData {
    pub ticker: String,
    pub timestamp: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub avg_volume: Option<u64>,
    pub percent_change: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FmvData {
    pub ticker: String,
    pub timestamp: f64,
    pub fmv: f64,
    pub market_price: f64,
    pub confidence: f64,
    pub deviation_percent: f64,
}

impl Observation {
    pub fn ticker(&self) -> &str {
        match self {
            Observation::Tick(t) => &t.ticker,
            Observation::Ohlcv(o) => &o.ticker,
            Observation::Fmv(f) => &f.ticker,
        }
    }

    /// Observation timestamp in unix seconds.
    pub fn timestamp(&self) -> f64 {
        match self {
            Observation::Tick(t) => t.timestamp,
            Observation::Ohlcv(o) => o.timestamp,
            Observation::Fmv(f) => f.timestamp,
        }
    }

    /// Infer provenance from the payload shape. A tick-shaped payload
    /// arriving over a websocket feed is distinguished by the caller's
    /// source hint, not by the shape.
    pub fn infer_source(&self) -> DataSource {
        match self {
            Observation::Tick(_) => DataSource::Tick,
            Observation::Ohlcv(_) => DataSource::Ohlcv,
            Observation::Fmv(_) => DataSource::Fmv,
        }
    }
}
