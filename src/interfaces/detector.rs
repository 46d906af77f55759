use async_trait::async_trait;

use crate::types::event::MarketEvent;
use crate::types::observation::TickData;

#[derive(Clone, Debug, Default)]
pub struct DetectResult {
    pub success: bool,
    pub events: Vec<MarketEvent>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Pattern detector for the legacy tick-only ingestion path. Detector
/// state (rolling highs/lows, trend windows) lives on the collaborator's
/// side.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventDetector: Send + Sync {
    async fn detect_events(&self, ticker: &str, tick: &TickData) -> DetectResult;
}
