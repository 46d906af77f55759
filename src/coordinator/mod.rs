pub mod emission;
pub mod multi_source;
pub mod resolution;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::types::event::{EventPriority, MarketEvent};
use crate::types::source::DataSource;
use crate::utils::helper::current_timestamp_ms;

/// Deterministic policy for picking one winner when multiple sources
/// report the same (ticker, event type) inside a window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    SourcePriority,
    TimestampLatest,
    ConfidenceHighest,
    EventTypeSpecific,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::SourcePriority => "source_priority",
            ConflictStrategy::TimestampLatest => "timestamp_latest",
            ConflictStrategy::ConfidenceHighest => "confidence_highest",
            ConflictStrategy::EventTypeSpecific => "event_type_specific",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Open: accepting events. Ready: a readiness condition fired. Resolved:
/// winner picked and queued. Records never re-open; resolved records are
/// dropped from the active map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinationState {
    Open,
    Ready,
    Resolved,
}

/// One grouping window for a (ticker, event type) pair.
#[derive(Debug)]
pub struct EventCoordination {
    pub ticker: String,
    pub event_type: String,
    pub window_ms: u64,
    pub strategy: ConflictStrategy,
    /// At most one event per source; last write wins within the window.
    pub events: HashMap<DataSource, MarketEvent>,
    pub conflict_detected: bool,
    pub first_event_at_ms: u64,
    /// Fixed at first-event arrival, never extended.
    pub deadline_ms: u64,
    pub state: CoordinationState,
    pub selected_source: Option<DataSource>,
    pub rejected: Vec<RejectedEvent>,
}

#[derive(Debug)]
pub struct RejectedEvent {
    pub source: DataSource,
    pub event: MarketEvent,
    pub reason: String,
}

impl EventCoordination {
    pub fn new(
        ticker: impl Into<String>,
        event_type: impl Into<String>,
        window_ms: u64,
        strategy: ConflictStrategy,
    ) -> Self {
        let now = current_timestamp_ms();
        EventCoordination {
            ticker: ticker.into(),
            event_type: event_type.into(),
            window_ms,
            strategy,
            events: HashMap::new(),
            conflict_detected: false,
            first_event_at_ms: now,
            deadline_ms: now + window_ms,
            state: CoordinationState::Open,
            selected_source: None,
            rejected: Vec::new(),
        }
    }

    /// Add one source's event; a later event from the same source
    /// replaces the earlier one. Returns true when this arrival turned
    /// the record conflicting.
    pub fn add_event(&mut self, source: DataSource, event: MarketEvent) -> bool {
        self.events.insert(source, event);
        let newly_conflicting = !self.conflict_detected && self.events.len() >= 2;
        if newly_conflicting {
            self.conflict_detected = true;
        }
        newly_conflicting
    }

    pub fn deadline_passed(&self, now_ms: u64) -> bool {
        now_ms >= self.deadline_ms
    }

    pub fn has_critical_event(&self) -> bool {
        self.events
            .values()
            .any(|e| e.effective_priority() == EventPriority::Critical)
    }

    /// True when every expected source for this event type has arrived.
    /// An empty expected set never satisfies this condition.
    pub fn expected_sources_satisfied(&self, expected: &[DataSource]) -> bool {
        !expected.is_empty() && expected.iter().all(|s| self.events.contains_key(s))
    }

    pub fn summary(&self) -> CoordinationSummary {
        // Resolution drains the event map, so contributing sources are
        // reconstructed from losers and the winner as well.
        let mut sources: Vec<DataSource> = self.events.keys().copied().collect();
        sources.extend(self.rejected.iter().map(|r| r.source));
        sources.extend(self.selected_source);
        sources.sort();
        sources.dedup();
        CoordinationSummary {
            ticker: self.ticker.clone(),
            event_type: self.event_type.clone(),
            strategy: self.strategy,
            window_ms: self.window_ms,
            conflict_detected: self.conflict_detected,
            sources,
            selected_source: self.selected_source,
            rejected_count: self.rejected.len(),
        }
    }
}

/// Snapshot handed downstream alongside each emitted event.
#[derive(Clone, Debug, Serialize)]
pub struct CoordinationSummary {
    pub ticker: String,
    pub event_type: String,
    pub strategy: ConflictStrategy,
    pub window_ms: u64,
    pub conflict_detected: bool,
    pub sources: Vec<DataSource>,
    pub selected_source: Option<DataSource>,
    pub rejected_count: usize,
}
