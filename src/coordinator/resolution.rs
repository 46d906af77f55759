use std::cmp::Ordering;

use crate::config::CoordinationConfig;
use crate::coordinator::{ConflictStrategy, CoordinationState, EventCoordination, RejectedEvent};
use crate::error::{Error, Result};
use crate::types::event::MarketEvent;
use crate::types::source::DataSource;

/// Pick the winning event for a ready coordination and record the losers.
/// A single contributing source wins trivially; otherwise the configured
/// strategy decides. Ties fall back to source priority so resolution is
/// deterministic regardless of map iteration order.
pub fn resolve(
    coordination: &mut EventCoordination,
    config: &CoordinationConfig,
) -> Result<(DataSource, MarketEvent)> {
    coordination.state = CoordinationState::Ready;

    let mut candidates: Vec<(DataSource, MarketEvent)> =
        coordination.events.drain().collect();
    if candidates.is_empty() {
        return Err(Error::NoEventSelected {
            ticker: coordination.ticker.clone(),
            event_type: coordination.event_type.clone(),
        });
    }
    candidates.sort_by_key(|(source, _)| config.source_priority(*source));

    let winner_idx = if candidates.len() == 1 {
        0
    } else {
        select(&coordination.event_type, coordination.strategy, &candidates, config)
    };

    let (winner_source, winner_event) = candidates.swap_remove(winner_idx);
    let reason = format!("conflict_resolved_by_{}", coordination.strategy);
    for (source, event) in candidates {
        coordination.rejected.push(RejectedEvent {
            source,
            event,
            reason: reason.clone(),
        });
    }

    coordination.selected_source = Some(winner_source);
    coordination.state = CoordinationState::Resolved;
    Ok((winner_source, winner_event))
}

fn select(
    event_type: &str,
    strategy: ConflictStrategy,
    candidates: &[(DataSource, MarketEvent)],
    config: &CoordinationConfig,
) -> usize {
    match strategy {
        // Candidates are pre-sorted by source priority.
        ConflictStrategy::SourcePriority => 0,
        ConflictStrategy::TimestampLatest => max_index_by(candidates, |e| e.time),
        ConflictStrategy::ConfidenceHighest => {
            max_index_by(candidates, |e| e.confidence.unwrap_or(1.0))
        }
        ConflictStrategy::EventTypeSpecific => match event_type {
            "high" | "low" => candidates
                .iter()
                .position(|(s, _)| matches!(s, DataSource::Tick | DataSource::WebSocket))
                .unwrap_or(0),
            "trend" => max_index_by(candidates, |e| e.confidence.unwrap_or(1.0)),
            _ => 0,
        },
    }
    .min(candidates.len() - 1)
}

fn max_index_by(candidates: &[(DataSource, MarketEvent)], key: impl Fn(&MarketEvent) -> f64) -> usize {
    let mut best = 0;
    for (i, (_, event)) in candidates.iter().enumerate().skip(1) {
        if key(event)
            .partial_cmp(&key(&candidates[best].1))
            .unwrap_or(Ordering::Equal)
            == Ordering::Greater
        {
            best = i;
        }
    }
    best
}
