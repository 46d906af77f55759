pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::coordinator::ConflictStrategy;
use crate::types::source::DataSource;

/// Full configuration surface of the coordination core. Every field has
/// a default; construction-time overrides come from the config loader.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Per-event-type coordination windows in milliseconds.
    pub windows_ms: HashMap<String, u64>,
    pub default_window_ms: u64,

    /// Per-event-type conflict resolution strategy.
    pub strategies: HashMap<String, ConflictStrategy>,
    pub default_strategy: ConflictStrategy,

    /// Per-event-type sets of sources whose joint arrival resolves a
    /// coordination before its deadline. Unknown event types get no set,
    /// so the early-resolution path never fires for them. This heuristic
    /// came from observed traffic and may need tuning.
    pub expected_sources: HashMap<String, Vec<DataSource>>,

    /// Overrides for the default source priority ordering.
    pub source_priorities: HashMap<DataSource, u8>,

    pub rule_budget_ms: u64,
    pub circuit_breaker_threshold: u64,
    pub freshness_max_age_secs: f64,

    pub context_max_age_secs: u64,
    pub max_contexts: usize,
    pub context_cleanup_interval_secs: u64,

    pub sweep_interval_secs: u64,
    pub drain_batch: usize,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        let mut windows_ms = HashMap::new();
        windows_ms.insert("high".to_string(), 500);
        windows_ms.insert("low".to_string(), 500);
        windows_ms.insert("trend".to_string(), 1000);
        windows_ms.insert("surge".to_string(), 200);

        let mut strategies = HashMap::new();
        strategies.insert("high".to_string(), ConflictStrategy::SourcePriority);
        strategies.insert("low".to_string(), ConflictStrategy::SourcePriority);
        strategies.insert("surge".to_string(), ConflictStrategy::SourcePriority);
        strategies.insert("trend".to_string(), ConflictStrategy::ConfidenceHighest);

        let mut expected_sources = HashMap::new();
        expected_sources.insert(
            "high".to_string(),
            vec![DataSource::Tick, DataSource::WebSocket],
        );
        expected_sources.insert(
            "low".to_string(),
            vec![DataSource::Tick, DataSource::WebSocket],
        );
        expected_sources.insert("trend".to_string(), vec![DataSource::Ohlcv]);
        expected_sources.insert(
            "surge".to_string(),
            vec![DataSource::Tick, DataSource::Ohlcv],
        );

        CoordinationConfig {
            windows_ms,
            default_window_ms: 500,
            strategies,
            default_strategy: ConflictStrategy::SourcePriority,
            expected_sources,
            source_priorities: HashMap::new(),
            rule_budget_ms: 50,
            circuit_breaker_threshold: 10,
            freshness_max_age_secs: 300.0,
            context_max_age_secs: 3600,
            max_contexts: 10_000,
            context_cleanup_interval_secs: 300,
            sweep_interval_secs: 60,
            drain_batch: 50,
        }
    }
}

impl CoordinationConfig {
    pub fn window_ms(&self, event_type: &str) -> u64 {
        self.windows_ms
            .get(event_type)
            .copied()
            .unwrap_or(self.default_window_ms)
    }

    pub fn strategy(&self, event_type: &str) -> ConflictStrategy {
        self.strategies
            .get(event_type)
            .copied()
            .unwrap_or(self.default_strategy)
    }

    pub fn expected_sources(&self, event_type: &str) -> &[DataSource] {
        self.expected_sources
            .get(event_type)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn source_priority(&self, source: DataSource) -> u8 {
        self.source_priorities
            .get(&source)
            .copied()
            .unwrap_or_else(|| source.default_priority())
    }
}
