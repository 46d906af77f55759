use serde::{Deserialize, Serialize};

use crate::types::source::DataSource;

/// Candidate event produced by a detector/router. Opaque to the
/// coordination core beyond these fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarketEvent {
    pub ticker: String,
    pub event_type: String,
    /// Event time in unix seconds.
    pub time: f64,
    pub price: Option<f64>,
    pub confidence: Option<f64>,
    /// Explicit priority override. Critical events bypass the
    /// coordination window; most events derive priority from their type.
    pub priority: Option<EventPriority>,
    pub source_metadata: Option<SourceMetadata>,
}

impl MarketEvent {
    pub fn new(ticker: impl Into<String>, event_type: impl Into<String>, time: f64) -> Self {
        MarketEvent {
            ticker: ticker.into(),
            event_type: event_type.into(),
            time,
            price: None,
            confidence: None,
            priority: None,
            source_metadata: None,
        }
    }

    /// Effective emission priority: explicit override first, otherwise
    /// derived from the event type.
    pub fn effective_priority(&self) -> EventPriority {
        self.priority
            .unwrap_or_else(|| EventPriority::for_event_type(&self.event_type))
    }
}

/// Provenance block attached before events leave the core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub source_type: DataSource,
    pub source_id: String,
    pub confidence: f64,
    pub processing_duration_ms: u64,
}

/// Emission-queue ordering. Lower number = more urgent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Critical = 1,
    High = 2,
    Normal = 3,
    Low = 4,
    Background = 5,
}

impl EventPriority {
    pub fn for_event_type(event_type: &str) -> Self {
        match event_type {
            "surge" => EventPriority::High,
            "high" | "low" => EventPriority::Normal,
            "trend" => EventPriority::Low,
            _ => EventPriority::Normal,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}
