use serde::{Deserialize, Serialize};
use std::fmt;

/// Provenance tag for an inbound observation. Used for rule lookup,
/// conflict priority ordering, and deduplication.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Tick,
    Ohlcv,
    Fmv,
    WebSocket,
    Channel,
}

impl DataSource {
    /// Default conflict priority. Lower wins under SourcePriority resolution.
    pub fn default_priority(&self) -> u8 {
        match self {
            DataSource::Tick => 1,
            DataSource::WebSocket => 2,
            DataSource::Ohlcv => 3,
            DataSource::Fmv => 4,
            DataSource::Channel => 5,
        }
    }

    /// Parse the transport's source label ("tick", "ohlcv", ...).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "tick" | "ticks" => Some(DataSource::Tick),
            "ohlcv" | "bar" | "bars" => Some(DataSource::Ohlcv),
            "fmv" | "fair_value" => Some(DataSource::Fmv),
            "websocket" | "ws" => Some(DataSource::WebSocket),
            "channel" => Some(DataSource::Channel),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Tick => "tick",
            DataSource::Ohlcv => "ohlcv",
            DataSource::Fmv => "fmv",
            DataSource::WebSocket => "websocket",
            DataSource::Channel => "channel",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_tick_first() {
        assert!(DataSource::Tick.default_priority() < DataSource::WebSocket.default_priority());
        assert!(DataSource::WebSocket.default_priority() < DataSource::Ohlcv.default_priority());
        assert!(DataSource::Ohlcv.default_priority() < DataSource::Fmv.default_priority());
        assert!(DataSource::Fmv.default_priority() < DataSource::Channel.default_priority());
    }

    #[test]
    fn label_parsing() {
        assert_eq!(DataSource::from_label("TICK"), Some(DataSource::Tick));
        assert_eq!(DataSource::from_label("ws"), Some(DataSource::WebSocket));
        assert_eq!(DataSource::from_label("bars"), Some(DataSource::Ohlcv));
        assert_eq!(DataSource::from_label("bogus"), None);
    }
}
