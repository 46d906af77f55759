pub mod defaults;
pub mod engine;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crate::context::SourceContext;
use crate::error::Result;
use crate::types::observation::Observation;
use crate::types::source::DataSource;

/// Predicate evaluated against an observation and its context.
pub type RuleCondition =
    Box<dyn Fn(&Observation, &SourceContext) -> Result<bool> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Filter,
    Validate,
    Transform,
    Enrich,
}

/// Named unit of validation/filtering logic with running execution
/// accounting. A condition returning `Ok(false)` or `Err` both count as
/// failures for circuit-breaker purposes: a rule that rejects all
/// traffic is treated the same as a broken one.
pub struct ProcessingRule {
    pub name: String,
    pub rule_type: RuleType,
    /// Source types this rule applies to. Empty = universal.
    pub source_types: Vec<DataSource>,
    /// Lower priority runs first.
    pub priority: u32,
    enabled: AtomicBool,
    condition: RuleCondition,
    execution_count: AtomicU64,
    success_count: AtomicU64,
    total_execution_micros: AtomicU64,
}

impl ProcessingRule {
    pub fn new(
        name: impl Into<String>,
        rule_type: RuleType,
        priority: u32,
        condition: RuleCondition,
    ) -> Self {
        ProcessingRule {
            name: name.into(),
            rule_type,
            source_types: Vec::new(),
            priority,
            enabled: AtomicBool::new(true),
            condition,
            execution_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            total_execution_micros: AtomicU64::new(0),
        }
    }

    pub fn for_sources(mut self, sources: Vec<DataSource>) -> Self {
        self.source_types = sources;
        self
    }

    pub fn applies_to(&self, source: DataSource) -> bool {
        self.source_types.is_empty() || self.source_types.contains(&source)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Run the condition, recording execution count and wall-clock time.
    pub fn evaluate(
        &self,
        observation: &Observation,
        context: &SourceContext,
    ) -> (Result<bool>, u64) {
        let started = Instant::now();
        let outcome = (self.condition)(observation, context);
        let elapsed_micros = started.elapsed().as_micros() as u64;

        self.execution_count.fetch_add(1, Ordering::SeqCst);
        self.total_execution_micros
            .fetch_add(elapsed_micros, Ordering::SeqCst);
        if matches!(outcome, Ok(true)) {
            self.success_count.fetch_add(1, Ordering::SeqCst);
        }

        (outcome, elapsed_micros)
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::SeqCst)
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::SeqCst)
    }

    pub fn failure_count(&self) -> u64 {
        self.execution_count() - self.success_count()
    }

    pub fn success_rate(&self) -> f64 {
        let executions = self.execution_count();
        if executions == 0 {
            return 1.0;
        }
        self.success_count() as f64 / executions as f64
    }

    pub fn avg_execution_ms(&self) -> f64 {
        let executions = self.execution_count();
        if executions == 0 {
            return 0.0;
        }
        self.total_execution_micros.load(Ordering::SeqCst) as f64 / executions as f64 / 1000.0
    }

    pub fn snapshot(&self) -> RuleSnapshot {
        RuleSnapshot {
            name: self.name.clone(),
            rule_type: self.rule_type,
            priority: self.priority,
            enabled: self.is_enabled(),
        }
    }
}

/// Point-in-time view of a rule's configuration, recorded on each
/// context at creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleSnapshot {
    pub name: String,
    pub rule_type: RuleType,
    pub priority: u32,
    pub enabled: bool,
}
