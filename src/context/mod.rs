pub mod manager;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::rules::RuleSnapshot;
use crate::types::source::DataSource;
use crate::utils::helper::current_timestamp_ms;

pub type SharedContext = Arc<Mutex<SourceContext>>;

/// Per-observation metadata record: provenance, confidence, and the
/// processing history accumulated while the observation moves through
/// rules and coordination.
#[derive(Clone, Debug, Serialize)]
pub struct SourceContext {
    pub source_type: DataSource,
    /// Immutable once created, unique for the lifetime of the store.
    pub source_id: String,
    pub ticker: String,
    /// Observation timestamp in unix seconds.
    pub timestamp: f64,
    /// 0..=1, default 1.0. FMV observations overwrite this with their
    /// reported confidence.
    pub confidence: f64,
    /// Snapshot of the rule-engine config for this source type.
    pub processing_rules: Vec<RuleSnapshot>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at_ms: u64,
    /// Append-only, monotonically growing.
    pub processing_stages: Vec<ProcessingStage>,
    pub error_count: u32,
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProcessingStage {
    pub stage: String,
    pub at_ms: u64,
}

impl SourceContext {
    pub fn new(
        source_type: DataSource,
        source_id: String,
        ticker: String,
        timestamp: f64,
    ) -> Self {
        SourceContext {
            source_type,
            source_id,
            ticker,
            timestamp,
            confidence: 1.0,
            processing_rules: Vec::new(),
            metadata: HashMap::new(),
            created_at_ms: current_timestamp_ms(),
            processing_stages: Vec::new(),
            error_count: 0,
            warnings: Vec::new(),
        }
    }

    pub fn add_stage(&mut self, stage: impl Into<String>) {
        self.processing_stages.push(ProcessingStage {
            stage: stage.into(),
            at_ms: current_timestamp_ms(),
        });
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn record_error(&mut self, detail: impl Into<String>) {
        self.error_count += 1;
        self.warnings.push(detail.into());
    }

    /// Wall-clock time since this context was created.
    pub fn elapsed_ms(&self) -> u64 {
        current_timestamp_ms().saturating_sub(self.created_at_ms)
    }

    /// Whether a stage with the given name was appended within the last
    /// `window_ms` milliseconds.
    pub fn has_recent_stage(&self, stage: &str, window_ms: u64) -> bool {
        let cutoff = current_timestamp_ms().saturating_sub(window_ms);
        self.processing_stages
            .iter()
            .any(|s| s.stage == stage && s.at_ms >= cutoff)
    }
}
