use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::config::CoordinationConfig;
use crate::context::{SharedContext, SourceContext};
use crate::error::{Error, Result};
use crate::rules::engine::SourceRulesEngine;
use crate::types::event::{MarketEvent, SourceMetadata};
use crate::types::observation::Observation;
use crate::types::source::DataSource;
use crate::utils::helper::{current_timestamp_ms, make_source_id};

const DEDUP_WINDOW_MS: u64 = 60_000;

/// Creates and tracks one `SourceContext` per inbound observation.
/// Contexts are garbage-collected by age and by store size, oldest
/// first.
pub struct SourceContextManager {
    contexts: DashMap<String, SharedContext>,
    rules_engine: Arc<SourceRulesEngine>,
    config: Arc<CoordinationConfig>,
    last_cleanup_ms: AtomicU64,
}

impl SourceContextManager {
    pub fn new(rules_engine: Arc<SourceRulesEngine>, config: Arc<CoordinationConfig>) -> Self {
        SourceContextManager {
            contexts: DashMap::new(),
            rules_engine,
            config,
            last_cleanup_ms: AtomicU64::new(0),
        }
    }

    /// Build, store, and return the context for one observation. Never
    /// fails the caller: an observation the manager cannot make sense of
    /// gets a minimal fallback context instead.
    pub fn create_context(
        &self,
        observation: &Observation,
        source_hint: Option<DataSource>,
    ) -> SharedContext {
        match self.build_context(observation, source_hint) {
            Ok(context) => context,
            Err(e) => {
                warn!("Falling back to minimal context: {}", e);
                self.fallback_context(observation)
            }
        }
    }

    fn build_context(
        &self,
        observation: &Observation,
        source_hint: Option<DataSource>,
    ) -> Result<SharedContext> {
        let ticker = observation.ticker();
        if ticker.is_empty() {
            return Err(Error::EmptyTicker);
        }

        let source = source_hint.unwrap_or_else(|| observation.infer_source());
        let source_id = make_source_id(source, ticker, observation.timestamp());

        let mut context = SourceContext::new(
            source,
            source_id.clone(),
            ticker.to_string(),
            observation.timestamp(),
        );
        context.processing_rules = self.rules_engine.rules_snapshot(source);
        self.extract_metadata(observation, &mut context);
        context.add_stage("context_created");

        let shared = Arc::new(Mutex::new(context));
        self.contexts.insert(source_id, Arc::clone(&shared));
        self.cleanup_old_contexts(false);
        Ok(shared)
    }

    fn fallback_context(&self, observation: &Observation) -> SharedContext {
        let source_id = make_source_id(DataSource::WebSocket, "UNKNOWN", observation.timestamp());
        let mut context = SourceContext::new(
            DataSource::WebSocket,
            source_id.clone(),
            "UNKNOWN".to_string(),
            observation.timestamp(),
        );
        context.add_warning("fallback_context");
        context.add_stage("context_created");

        let shared = Arc::new(Mutex::new(context));
        self.contexts.insert(source_id, Arc::clone(&shared));
        shared
    }

    fn extract_metadata(&self, observation: &Observation, context: &mut SourceContext) {
        match observation {
            Observation::Tick(tick) => {
                context
                    .metadata
                    .insert("price".to_string(), serde_json::json!(tick.price));
                context
                    .metadata
                    .insert("volume".to_string(), serde_json::json!(tick.volume));
            }
            Observation::Ohlcv(bar) => {
                if let Some(pc) = bar.percent_change {
                    context
                        .metadata
                        .insert("percent_change".to_string(), serde_json::json!(pc));
                }
                if let Some(avg) = bar.avg_volume {
                    if avg > 0 {
                        let ratio = bar.volume as f64 / avg as f64;
                        context
                            .metadata
                            .insert("volume_ratio".to_string(), serde_json::json!(ratio));
                    }
                }
                context
                    .metadata
                    .insert("close".to_string(), serde_json::json!(bar.close));
            }
            Observation::Fmv(fmv) => {
                context.confidence = fmv.confidence.clamp(0.0, 1.0);
                context
                    .metadata
                    .insert("fmv".to_string(), serde_json::json!(fmv.fmv));
                context
                    .metadata
                    .insert("market_price".to_string(), serde_json::json!(fmv.market_price));
                context.metadata.insert(
                    "deviation_percent".to_string(),
                    serde_json::json!(fmv.deviation_percent),
                );
            }
        }
    }

    pub fn get_context(&self, source_id: &str) -> Option<SharedContext> {
        self.contexts.get(source_id).map(|entry| Arc::clone(&entry))
    }

    /// Merge fields into the context's metadata. Returns false if the
    /// context is unknown.
    pub fn update_context(
        &self,
        source_id: &str,
        fields: HashMap<String, serde_json::Value>,
    ) -> bool {
        let Some(shared) = self.get_context(source_id) else {
            return false;
        };
        let mut context = lock_context(&shared);
        let mut keys: Vec<&str> = fields.keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        let stage = format!("updated:{}", keys.join(","));
        context.metadata.extend(fields);
        context.add_stage(stage);
        true
    }

    /// Attach the provenance snapshot consumed downstream. Never fails;
    /// the stage marker doubles as the audit record.
    pub fn add_event_metadata(&self, event: &mut MarketEvent, context: &mut SourceContext) {
        event.source_metadata = Some(SourceMetadata {
            source_type: context.source_type,
            source_id: context.source_id.clone(),
            confidence: context.confidence,
            processing_duration_ms: context.elapsed_ms(),
        });
        context.add_stage("metadata_attached");
    }

    /// Run the observation through the per-source rule set.
    pub fn apply_source_rules(
        &self,
        observation: &Observation,
        context: &mut SourceContext,
    ) -> bool {
        self.rules_engine.apply_rules(observation, context)
    }

    /// Best-effort duplicate suppression, independent of the
    /// coordinator's conflict resolution: true when another source
    /// already stage-marked the same (ticker, event type) within the
    /// last 60 seconds. Contended contexts are skipped rather than
    /// waited on.
    pub fn should_deduplicate_event(&self, event: &MarketEvent, context: &SourceContext) -> bool {
        let stage = format!("event_detected:{}", event.event_type);
        for entry in self.contexts.iter() {
            let Ok(other) = entry.value().try_lock() else {
                continue;
            };
            if other.source_id == context.source_id {
                continue;
            }
            if other.ticker == event.ticker
                && other.source_type != context.source_type
                && other.has_recent_stage(&stage, DEDUP_WINDOW_MS)
            {
                debug!(
                    "Duplicate {} event for {} already seen from {}",
                    event.event_type, event.ticker, other.source_type
                );
                return true;
            }
        }
        false
    }

    pub fn get_source_statistics(&self) -> SourceStatistics {
        let mut by_source: HashMap<String, u64> = HashMap::new();
        let mut by_ticker: HashMap<String, u64> = HashMap::new();
        let mut total_errors = 0u64;
        let mut total_warnings = 0u64;
        let mut total_elapsed_ms = 0u64;
        let mut total = 0u64;

        for entry in self.contexts.iter() {
            let context = lock_context(entry.value());
            total += 1;
            *by_source.entry(context.source_type.to_string()).or_insert(0) += 1;
            *by_ticker.entry(context.ticker.clone()).or_insert(0) += 1;
            total_errors += context.error_count as u64;
            total_warnings += context.warnings.len() as u64;
            total_elapsed_ms += context.elapsed_ms();
        }

        SourceStatistics {
            total_contexts: total,
            by_source,
            by_ticker,
            avg_processing_ms: if total == 0 {
                0.0
            } else {
                total_elapsed_ms as f64 / total as f64
            },
            total_errors,
            total_warnings,
        }
    }

    /// Remove contexts older than the max age, then trim the oldest
    /// beyond the max count. Rate-limited to the cleanup interval unless
    /// forced. Returns the number of contexts removed.
    pub fn cleanup_old_contexts(&self, force: bool) -> usize {
        let now = current_timestamp_ms();
        if !force {
            let interval_ms = self.config.context_cleanup_interval_secs * 1000;
            let last = self.last_cleanup_ms.load(Ordering::SeqCst);
            if now.saturating_sub(last) < interval_ms {
                return 0;
            }
            if self
                .last_cleanup_ms
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return 0; // another thread is cleaning
            }
        } else {
            self.last_cleanup_ms.store(now, Ordering::SeqCst);
        }

        let max_age_ms = self.config.context_max_age_secs * 1000;
        let mut removed = 0usize;

        let expired: Vec<String> = self
            .contexts
            .iter()
            .filter(|entry| {
                let context = lock_context(entry.value());
                now.saturating_sub(context.created_at_ms) > max_age_ms
            })
            .map(|entry| entry.key().clone())
            .collect();
        for id in expired {
            if self.contexts.remove(&id).is_some() {
                removed += 1;
            }
        }

        let over = self.contexts.len().saturating_sub(self.config.max_contexts);
        if over > 0 {
            let mut by_age: Vec<(u64, String)> = self
                .contexts
                .iter()
                .map(|entry| {
                    let context = lock_context(entry.value());
                    (context.created_at_ms, entry.key().clone())
                })
                .collect();
            by_age.sort_unstable_by_key(|(created, _)| *created);
            for (_, id) in by_age.into_iter().take(over) {
                if self.contexts.remove(&id).is_some() {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            debug!("Context cleanup removed {} contexts", removed);
        }
        removed
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }
}

fn lock_context(shared: &SharedContext) -> std::sync::MutexGuard<'_, SourceContext> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Debug, Default)]
pub struct SourceStatistics {
    pub total_contexts: u64,
    pub by_source: HashMap<String, u64>,
    pub by_ticker: HashMap<String, u64>,
    pub avg_processing_ms: f64,
    pub total_errors: u64,
    pub total_warnings: u64,
}
