use async_trait::async_trait;

use crate::types::event::MarketEvent;
use crate::types::observation::Observation;

/// Outcome of handing an observation to the external channel router.
/// Success with zero events is normal: absence of a pattern is not an
/// error.
#[derive(Clone, Debug, Default)]
pub struct RouteResult {
    pub success: bool,
    pub events: Vec<MarketEvent>,
    pub errors: Vec<String>,
}

/// External channel/transport router. The only potentially blocking
/// collaborator; the core invokes it without holding internal locks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataRouter: Send + Sync {
    async fn route_data(&self, observation: &Observation) -> RouteResult;
}
