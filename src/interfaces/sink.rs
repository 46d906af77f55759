use crate::types::event::MarketEvent;

/// Outbound event sink: a priority publish queue or transport owned by
/// the surrounding messaging layer. Returns false when the event was
/// not accepted.
pub trait EventSink: Send + Sync {
    fn add(&self, event: MarketEvent) -> bool;
}
