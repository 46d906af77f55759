use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::coordinator::CoordinationSummary;
use crate::types::event::{EventPriority, MarketEvent};

/// Priority-ordered buffer of resolved events awaiting downstream
/// publication. Strict priority order first, FIFO within a priority
/// level: the heap is keyed on (priority, insertion sequence).
pub struct EmissionQueue {
    heap: BinaryHeap<QueuedEvent>,
    next_seq: u64,
}

impl EmissionQueue {
    pub fn new() -> Self {
        EmissionQueue {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, event: MarketEvent, summary: CoordinationSummary) {
        let priority = event.effective_priority();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedEvent {
            priority,
            seq,
            event,
            summary,
        });
    }

    pub fn pop(&mut self) -> Option<(MarketEvent, CoordinationSummary)> {
        self.heap.pop().map(|q| (q.event, q.summary))
    }

    pub fn pop_batch(&mut self, max_events: usize) -> Vec<(MarketEvent, CoordinationSummary)> {
        let mut batch = Vec::with_capacity(max_events.min(self.heap.len()));
        while batch.len() < max_events {
            match self.heap.pop() {
                Some(q) => batch.push((q.event, q.summary)),
                None => break,
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Default for EmissionQueue {
    fn default() -> Self {
        Self::new()
    }
}

struct QueuedEvent {
    priority: EventPriority,
    seq: u64,
    event: MarketEvent,
    summary: CoordinationSummary,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the most urgent priority
        // and the lowest sequence surface first.
        other
            .priority
            .as_u8()
            .cmp(&self.priority.as_u8())
            .then(other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::ConflictStrategy;
    use proptest::prelude::*;

    fn summary(ticker: &str, event_type: &str) -> CoordinationSummary {
        CoordinationSummary {
            ticker: ticker.to_string(),
            event_type: event_type.to_string(),
            strategy: ConflictStrategy::SourcePriority,
            window_ms: 500,
            conflict_detected: false,
            sources: Vec::new(),
            selected_source: None,
            rejected_count: 0,
        }
    }

    fn event_with_priority(ticker: &str, priority: EventPriority) -> MarketEvent {
        let mut e = MarketEvent::new(ticker, "high", 100.0);
        e.priority = Some(priority);
        e
    }

    #[test]
    fn higher_priority_jumps_earlier_insertions() {
        let mut queue = EmissionQueue::new();
        queue.push(event_with_priority("A", EventPriority::Normal), summary("A", "high"));
        queue.push(event_with_priority("B", EventPriority::High), summary("B", "surge"));

        let (first, _) = queue.pop().unwrap();
        assert_eq!(first.ticker, "B");
        let (second, _) = queue.pop().unwrap();
        assert_eq!(second.ticker, "A");
    }

    #[test]
    fn fifo_within_equal_priority() {
        let mut queue = EmissionQueue::new();
        for i in 0..5 {
            queue.push(
                event_with_priority(&format!("T{}", i), EventPriority::Normal),
                summary(&format!("T{}", i), "high"),
            );
        }
        for i in 0..5 {
            let (event, _) = queue.pop().unwrap();
            assert_eq!(event.ticker, format!("T{}", i));
        }
    }

    #[test]
    fn pop_batch_respects_max() {
        let mut queue = EmissionQueue::new();
        for i in 0..10 {
            queue.push(
                event_with_priority(&format!("T{}", i), EventPriority::Normal),
                summary(&format!("T{}", i), "high"),
            );
        }
        assert_eq!(queue.pop_batch(3).len(), 3);
        assert_eq!(queue.len(), 7);
        assert_eq!(queue.pop_batch(100).len(), 7);
        assert!(queue.is_empty());
    }

    proptest! {
        #[test]
        fn drains_in_priority_then_insertion_order(levels in prop::collection::vec(1u8..=5, 1..50)) {
            let mut queue = EmissionQueue::new();
            for (i, level) in levels.iter().enumerate() {
                let priority = match level {
                    1 => EventPriority::Critical,
                    2 => EventPriority::High,
                    3 => EventPriority::Normal,
                    4 => EventPriority::Low,
                    _ => EventPriority::Background,
                };
                queue.push(
                    event_with_priority(&format!("T{}", i), priority),
                    summary(&format!("T{}", i), "high"),
                );
            }

            let mut expected: Vec<(u8, usize)> = levels
                .iter()
                .enumerate()
                .map(|(i, level)| (*level, i))
                .collect();
            expected.sort();

            for (level, idx) in expected {
                let (event, _) = queue.pop().unwrap();
                prop_assert_eq!(event.effective_priority().as_u8(), level);
                prop_assert_eq!(event.ticker, format!("T{}", idx));
            }
            prop_assert!(queue.is_empty());
        }
    }
}
