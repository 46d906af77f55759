use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::config::CoordinationConfig;
use crate::context::SourceContext;
use crate::observability::metrics::RULES_DISABLED_BY_BREAKER;
use crate::rules::{ProcessingRule, RuleSnapshot, RuleType};
use crate::types::observation::Observation;
use crate::types::source::DataSource;

/// Registry of prioritized, per-source-type processing rules with
/// execution accounting and automatic circuit breaking. Global rules
/// always run before source-specific ones.
pub struct SourceRulesEngine {
    global_rules: RwLock<Vec<Arc<ProcessingRule>>>,
    source_rules: RwLock<HashMap<DataSource, Vec<Arc<ProcessingRule>>>>,
    rule_budget_ms: u64,
    breaker_threshold: u64,
    breaker_trips: AtomicU64,
}

impl SourceRulesEngine {
    pub fn new(config: &CoordinationConfig) -> Self {
        SourceRulesEngine {
            global_rules: RwLock::new(Vec::new()),
            source_rules: RwLock::new(HashMap::new()),
            rule_budget_ms: config.rule_budget_ms,
            breaker_threshold: config.circuit_breaker_threshold,
            breaker_trips: AtomicU64::new(0),
        }
    }

    /// Engine pre-loaded with the canonical per-source rule set.
    pub fn with_default_rules(config: &CoordinationConfig) -> Self {
        let engine = Self::new(config);
        crate::rules::defaults::install_default_rules(&engine, config);
        engine
    }

    /// Register a rule for the source types it names. A rule with no
    /// source types is universal and lands in the global bucket.
    pub fn add_rule(&self, rule: ProcessingRule) {
        if rule.source_types.is_empty() {
            self.add_global_rule(rule);
            return;
        }
        let rule = Arc::new(rule);
        let mut buckets = self
            .source_rules
            .write()
            .unwrap_or_else(|e| e.into_inner());
        for source in &rule.source_types {
            let bucket = buckets.entry(*source).or_default();
            bucket.push(Arc::clone(&rule));
            bucket.sort_by_key(|r| r.priority);
        }
    }

    pub fn add_global_rule(&self, rule: ProcessingRule) {
        let mut globals = self
            .global_rules
            .write()
            .unwrap_or_else(|e| e.into_inner());
        globals.push(Arc::new(rule));
        globals.sort_by_key(|r| r.priority);
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        let mut removed = false;
        {
            let mut globals = self
                .global_rules
                .write()
                .unwrap_or_else(|e| e.into_inner());
            let before = globals.len();
            globals.retain(|r| r.name != name);
            removed |= globals.len() != before;
        }
        let mut buckets = self
            .source_rules
            .write()
            .unwrap_or_else(|e| e.into_inner());
        for bucket in buckets.values_mut() {
            let before = bucket.len();
            bucket.retain(|r| r.name != name);
            removed |= bucket.len() != before;
        }
        removed
    }

    pub fn enable_rule(&self, name: &str) -> bool {
        self.find_rule(name)
            .map(|rule| {
                rule.enable();
                true
            })
            .unwrap_or(false)
    }

    pub fn disable_rule(&self, name: &str) -> bool {
        self.find_rule(name)
            .map(|rule| {
                rule.disable();
                true
            })
            .unwrap_or(false)
    }

    fn find_rule(&self, name: &str) -> Option<Arc<ProcessingRule>> {
        {
            let globals = self.global_rules.read().unwrap_or_else(|e| e.into_inner());
            if let Some(rule) = globals.iter().find(|r| r.name == name) {
                return Some(Arc::clone(rule));
            }
        }
        let buckets = self.source_rules.read().unwrap_or_else(|e| e.into_inner());
        buckets
            .values()
            .flat_map(|bucket| bucket.iter())
            .find(|r| r.name == name)
            .map(Arc::clone)
    }

    fn rules_for(&self, source: DataSource) -> Vec<Arc<ProcessingRule>> {
        let mut rules: Vec<Arc<ProcessingRule>> = self
            .global_rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        if let Some(bucket) = self
            .source_rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&source)
        {
            rules.extend(bucket.iter().cloned());
        }
        rules
    }

    /// Run global rules then source-type rules in priority order.
    ///
    /// A Filter rule returning false stops evaluation and stamps the
    /// context `filtered_by_<rule>`. A Validate rule returning false
    /// fails the pass but later rules still execute. Condition errors
    /// count against the circuit breaker and never halt the pass.
    pub fn apply_rules(&self, observation: &Observation, context: &mut SourceContext) -> bool {
        let mut passed = true;

        for rule in self.rules_for(context.source_type) {
            if !rule.is_enabled() || !rule.applies_to(context.source_type) {
                continue;
            }

            let (outcome, elapsed_micros) = rule.evaluate(observation, context);
            if elapsed_micros / 1000 > self.rule_budget_ms {
                warn!(
                    "Rule {} exceeded execution budget: {}us (budget {}ms)",
                    rule.name, elapsed_micros, self.rule_budget_ms
                );
            }

            match outcome {
                Ok(true) => {}
                Ok(false) => {
                    self.maybe_trip_breaker(&rule);
                    match rule.rule_type {
                        RuleType::Filter => {
                            context.add_stage(format!("filtered_by_{}", rule.name));
                            debug!(
                                "Observation filtered: rule={}, ticker={}",
                                rule.name, context.ticker
                            );
                            return false;
                        }
                        RuleType::Validate => {
                            context.add_warning(format!("validation_failed:{}", rule.name));
                            passed = false;
                        }
                        RuleType::Transform | RuleType::Enrich => {
                            context.add_warning(format!("rule_declined:{}", rule.name));
                        }
                    }
                }
                Err(e) => {
                    self.maybe_trip_breaker(&rule);
                    context.record_error(format!("rule_error:{}:{}", rule.name, e));
                    warn!("Rule {} errored: {}", rule.name, e);
                }
            }
        }

        passed
    }

    fn maybe_trip_breaker(&self, rule: &ProcessingRule) {
        if !rule.is_enabled() {
            return;
        }
        if rule.execution_count() >= self.breaker_threshold
            && rule.failure_count() >= self.breaker_threshold
        {
            rule.disable();
            self.breaker_trips.fetch_add(1, Ordering::SeqCst);
            RULES_DISABLED_BY_BREAKER.inc();
            warn!(
                "Circuit breaker disabled rule {}: {} failures in {} executions",
                rule.name,
                rule.failure_count(),
                rule.execution_count()
            );
        }
    }

    pub fn breaker_trips(&self) -> u64 {
        self.breaker_trips.load(Ordering::SeqCst)
    }

    fn all_rules(&self) -> Vec<Arc<ProcessingRule>> {
        let mut rules: Vec<Arc<ProcessingRule>> = self
            .global_rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        let buckets = self.source_rules.read().unwrap_or_else(|e| e.into_inner());
        for bucket in buckets.values() {
            for rule in bucket {
                if !rules.iter().any(|r| Arc::ptr_eq(r, rule)) {
                    rules.push(Arc::clone(rule));
                }
            }
        }
        rules
    }

    pub fn get_rule_statistics(&self) -> RuleStatistics {
        let rules = self.all_rules();
        let mut per_rule = Vec::with_capacity(rules.len());
        let mut total_executions = 0u64;
        let mut total_failures = 0u64;

        for rule in &rules {
            total_executions += rule.execution_count();
            total_failures += rule.failure_count();
            per_rule.push(RuleStats {
                name: rule.name.clone(),
                rule_type: rule.rule_type,
                enabled: rule.is_enabled(),
                executions: rule.execution_count(),
                successes: rule.success_count(),
                success_rate: rule.success_rate(),
                avg_execution_ms: rule.avg_execution_ms(),
            });
        }

        RuleStatistics {
            rules: per_rule,
            total_executions,
            total_failures,
            failure_rate: if total_executions == 0 {
                0.0
            } else {
                total_failures as f64 / total_executions as f64
            },
            disabled_by_breaker: self.breaker_trips(),
        }
    }

    /// Operational self-diagnosis: duplicate names, rules that reject
    /// nearly everything, rules consistently over the execution budget.
    /// Informational only, never gates behavior.
    pub fn validate_configuration(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let rules = self.all_rules();

        let mut seen: HashMap<&str, u32> = HashMap::new();
        for rule in &rules {
            *seen.entry(rule.name.as_str()).or_insert(0) += 1;
        }
        for (name, count) in seen {
            if count > 1 {
                issues.push(format!("duplicate rule name: {} ({} registrations)", name, count));
            }
        }

        for rule in &rules {
            if rule.execution_count() < 10 {
                continue;
            }
            if rule.success_rate() < 0.10 {
                issues.push(format!(
                    "rule {} success rate {:.1}% after {} executions",
                    rule.name,
                    rule.success_rate() * 100.0,
                    rule.execution_count()
                ));
            }
            if rule.avg_execution_ms() > 2.0 * self.rule_budget_ms as f64 {
                issues.push(format!(
                    "rule {} averages {:.1}ms, over 2x the {}ms budget",
                    rule.name,
                    rule.avg_execution_ms(),
                    self.rule_budget_ms
                ));
            }
        }

        issues
    }

    pub fn rules_snapshot(&self, source: DataSource) -> Vec<RuleSnapshot> {
        self.rules_for(source)
            .iter()
            .map(|r| r.snapshot())
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct RuleStatistics {
    pub rules: Vec<RuleStats>,
    pub total_executions: u64,
    pub total_failures: u64,
    pub failure_rate: f64,
    pub disabled_by_breaker: u64,
}

#[derive(Clone, Debug)]
pub struct RuleStats {
    pub name: String,
    pub rule_type: RuleType,
    pub enabled: bool,
    pub executions: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub avg_execution_ms: f64,
}
