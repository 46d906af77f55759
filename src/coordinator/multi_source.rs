use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use crate::config::CoordinationConfig;
use crate::context::SourceContext;
use crate::coordinator::emission::EmissionQueue;
use crate::coordinator::resolution;
use crate::coordinator::{CoordinationSummary, EventCoordination};
use crate::error::Result;
use crate::observability::metrics::{
    ACTIVE_COORDINATIONS, CONFLICTS_DETECTED, COORDINATION_TIMEOUTS, EVENTS_COORDINATED,
    EVENTS_EMITTED,
};
use crate::observability::tracing::trace_coordination;
use crate::types::event::MarketEvent;
use crate::utils::helper::current_timestamp_ms;

type CoordinationKey = (String, String);

/// Groups candidate events by (ticker, event type) into time-boxed
/// coordination records, resolves cross-source conflicts, and feeds the
/// priority-ordered emission queue.
///
/// The active map and the emission queue each sit behind their own lock;
/// resolution happens after a record is removed from the active map, so
/// the two locks are never held together.
pub struct MultiSourceCoordinator {
    active: Mutex<HashMap<CoordinationKey, EventCoordination>>,
    emission: Mutex<EmissionQueue>,
    config: Arc<CoordinationConfig>,

    events_received: AtomicU64,
    conflicts_detected: AtomicU64,
    events_resolved: AtomicU64,
    events_emitted: AtomicU64,
    resolution_failures: AtomicU64,
    coordination_timeouts: AtomicU64,
    by_source: Mutex<HashMap<String, u64>>,
    by_event_type: Mutex<HashMap<String, u64>>,
}

impl MultiSourceCoordinator {
    pub fn new(config: Arc<CoordinationConfig>) -> Self {
        MultiSourceCoordinator {
            active: Mutex::new(HashMap::new()),
            emission: Mutex::new(EmissionQueue::new()),
            config,
            events_received: AtomicU64::new(0),
            conflicts_detected: AtomicU64::new(0),
            events_resolved: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            resolution_failures: AtomicU64::new(0),
            coordination_timeouts: AtomicU64::new(0),
            by_source: Mutex::new(HashMap::new()),
            by_event_type: Mutex::new(HashMap::new()),
        }
    }

    /// Feed one candidate event into its coordination window. Returns
    /// false only on internal error; errors are recorded on the context,
    /// never raised to the caller.
    pub fn coordinate_event(&self, event: &MarketEvent, context: &mut SourceContext) -> bool {
        match self.try_coordinate(event, context) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Coordination error for {}/{}: {}",
                    event.ticker, event.event_type, e
                );
                context.record_error(format!("coordination_error:{}", e));
                false
            }
        }
    }

    fn try_coordinate(&self, event: &MarketEvent, context: &mut SourceContext) -> Result<()> {
        let span = trace_coordination(&event.ticker, &event.event_type);
        let _guard = span.enter();
        self.events_received.fetch_add(1, Ordering::SeqCst);
        EVENTS_COORDINATED.inc();
        self.bump(&self.by_source, context.source_type.as_str());
        self.bump(&self.by_event_type, &event.event_type);

        let key = (event.ticker.clone(), event.event_type.clone());
        let ready = {
            let mut active = lock_map(&self.active);
            let coordination = active.entry(key.clone()).or_insert_with(|| {
                debug!(
                    "Opening coordination window for {}/{} ({}ms)",
                    event.ticker,
                    event.event_type,
                    self.config.window_ms(&event.event_type)
                );
                EventCoordination::new(
                    event.ticker.clone(),
                    event.event_type.clone(),
                    self.config.window_ms(&event.event_type),
                    self.config.strategy(&event.event_type),
                )
            });

            if coordination.add_event(context.source_type, event.clone()) {
                self.conflicts_detected.fetch_add(1, Ordering::SeqCst);
                CONFLICTS_DETECTED.inc();
                debug!(
                    "Conflict detected for {}/{}: {} sources",
                    event.ticker,
                    event.event_type,
                    coordination.events.len()
                );
            }

            let now = current_timestamp_ms();
            let ready = coordination.deadline_passed(now)
                || coordination.has_critical_event()
                || coordination
                    .expected_sources_satisfied(self.config.expected_sources(&event.event_type));
            if ready {
                active.remove(&key)
            } else {
                None
            }
            // active lock released here; resolution never runs under it
        };
        self.update_active_gauge();

        context.add_stage(format!("coordinated:{}", event.event_type));

        if let Some(coordination) = ready {
            self.resolve_and_queue(coordination)?;
        }
        Ok(())
    }

    fn resolve_and_queue(&self, mut coordination: EventCoordination) -> Result<()> {
        match resolution::resolve(&mut coordination, &self.config) {
            Ok((source, event)) => {
                self.events_resolved.fetch_add(1, Ordering::SeqCst);
                self.events_emitted.fetch_add(1, Ordering::SeqCst);
                EVENTS_EMITTED.inc();
                info!(
                    "Coordination resolved: {}/{} -> {} ({} rejected)",
                    coordination.ticker,
                    coordination.event_type,
                    source,
                    coordination.rejected.len()
                );
                let summary = coordination.summary();
                lock_queue(&self.emission).push(event, summary);
                Ok(())
            }
            Err(e) => {
                self.resolution_failures.fetch_add(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Pop up to `max_events` resolved events, most urgent first. This
    /// is the sole consumption point for downstream publishing.
    pub fn get_pending_events(
        &self,
        max_events: usize,
    ) -> Vec<(MarketEvent, CoordinationSummary)> {
        lock_queue(&self.emission).pop_batch(max_events)
    }

    pub fn pending_event_count(&self) -> usize {
        lock_queue(&self.emission).len()
    }

    /// Immediately resolve all (or one ticker's) open coordinations,
    /// bypassing their deadlines. Returns the number emitted. Used at
    /// shutdown and for explicit flushes.
    pub fn force_emit_pending(&self, ticker: Option<&str>) -> usize {
        let drained: Vec<EventCoordination> = {
            let mut active = lock_map(&self.active);
            let keys: Vec<CoordinationKey> = active
                .keys()
                .filter(|(t, _)| ticker.map(|want| want == t).unwrap_or(true))
                .cloned()
                .collect();
            keys.into_iter().filter_map(|k| active.remove(&k)).collect()
        };
        self.update_active_gauge();

        let mut emitted = 0;
        for coordination in drained {
            if self.resolve_and_queue(coordination).is_ok() {
                emitted += 1;
            }
        }
        if emitted > 0 {
            info!("Force-emitted {} pending coordinations", emitted);
        }
        emitted
    }

    /// Resolve every coordination past its deadline. Run periodically so
    /// no record is held indefinitely when no further events arrive.
    pub fn sweep_expired(&self) -> usize {
        let now = current_timestamp_ms();
        let expired: Vec<EventCoordination> = {
            let mut active = lock_map(&self.active);
            let keys: Vec<CoordinationKey> = active
                .iter()
                .filter(|(_, c)| c.deadline_passed(now))
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter().filter_map(|k| active.remove(&k)).collect()
        };
        self.update_active_gauge();

        let mut swept = 0;
        for coordination in expired {
            self.coordination_timeouts.fetch_add(1, Ordering::SeqCst);
            COORDINATION_TIMEOUTS.inc();
            if self.resolve_and_queue(coordination).is_ok() {
                swept += 1;
            }
        }
        if swept > 0 {
            debug!("Deadline sweep resolved {} coordinations", swept);
        }
        swept
    }

    pub fn get_coordination_statistics(&self) -> CoordinationStatistics {
        let received = self.events_received.load(Ordering::SeqCst);
        let conflicts = self.conflicts_detected.load(Ordering::SeqCst);
        let resolved = self.events_resolved.load(Ordering::SeqCst);
        let failures = self.resolution_failures.load(Ordering::SeqCst);

        let mut active_by_type: HashMap<String, u64> = HashMap::new();
        for (_, coordination) in lock_map(&self.active).iter() {
            *active_by_type
                .entry(coordination.event_type.clone())
                .or_insert(0) += 1;
        }

        CoordinationStatistics {
            events_received: received,
            conflicts_detected: conflicts,
            events_resolved: resolved,
            events_emitted: self.events_emitted.load(Ordering::SeqCst),
            coordination_timeouts: self.coordination_timeouts.load(Ordering::SeqCst),
            conflict_rate: ratio(conflicts, received),
            resolution_success_rate: ratio(resolved, resolved + failures),
            by_source: lock_map_plain(&self.by_source).clone(),
            by_event_type: lock_map_plain(&self.by_event_type).clone(),
            active_by_type,
            pending_emissions: self.pending_event_count(),
        }
    }

    fn bump(&self, map: &Mutex<HashMap<String, u64>>, key: &str) {
        *lock_map_plain(map).entry(key.to_string()).or_insert(0) += 1;
    }

    fn update_active_gauge(&self) {
        ACTIVE_COORDINATIONS.set(lock_map(&self.active).len() as i64);
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn lock_map(
    map: &Mutex<HashMap<CoordinationKey, EventCoordination>>,
) -> std::sync::MutexGuard<'_, HashMap<CoordinationKey, EventCoordination>> {
    map.lock().unwrap_or_else(|p| p.into_inner())
}

fn lock_map_plain(
    map: &Mutex<HashMap<String, u64>>,
) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
    map.lock().unwrap_or_else(|p| p.into_inner())
}

fn lock_queue(queue: &Mutex<EmissionQueue>) -> std::sync::MutexGuard<'_, EmissionQueue> {
    queue.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Clone, Debug)]
pub struct CoordinationStatistics {
    pub events_received: u64,
    pub conflicts_detected: u64,
    pub events_resolved: u64,
    pub events_emitted: u64,
    pub coordination_timeouts: u64,
    pub conflict_rate: f64,
    pub resolution_success_rate: f64,
    pub by_source: HashMap<String, u64>,
    pub by_event_type: HashMap<String, u64>,
    pub active_by_type: HashMap<String, u64>,
    pub pending_emissions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::ConflictStrategy;
    use crate::types::event::EventPriority;
    use crate::types::source::DataSource;
    use crate::utils::helper::current_unix_secs;
    use std::thread::sleep;
    use std::time::Duration;

    fn coordinator_with(config: CoordinationConfig) -> MultiSourceCoordinator {
        MultiSourceCoordinator::new(Arc::new(config))
    }

    fn short_window_config() -> CoordinationConfig {
        let mut config = CoordinationConfig::default();
        config.windows_ms.insert("high".to_string(), 50);
        config.windows_ms.insert("surge".to_string(), 50);
        config
    }

    fn context(source: DataSource, ticker: &str) -> SourceContext {
        SourceContext::new(
            source,
            format!("{}:{}:0:0", source, ticker),
            ticker.to_string(),
            current_unix_secs(),
        )
    }

    fn event(ticker: &str, event_type: &str, time: f64) -> MarketEvent {
        MarketEvent::new(ticker, event_type, time)
    }

    #[test]
    fn no_resolution_before_window_elapses() {
        let coordinator = coordinator_with(short_window_config());
        let mut ctx = context(DataSource::Tick, "AAPL");
        assert!(coordinator.coordinate_event(&event("AAPL", "high", 100.0), &mut ctx));

        assert_eq!(coordinator.sweep_expired(), 0);
        assert!(coordinator.get_pending_events(10).is_empty());

        sleep(Duration::from_millis(80));
        assert_eq!(coordinator.sweep_expired(), 1);
        let pending = coordinator.get_pending_events(10);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].1.selected_source, Some(DataSource::Tick));
    }

    #[test]
    fn tick_beats_ohlcv_under_source_priority() {
        // The canonical scenario: a tick high and an OHLCV high for the
        // same ticker inside one window produce exactly one event,
        // sourced from the tick feed.
        let coordinator = coordinator_with(short_window_config());

        let mut tick_ctx = context(DataSource::Tick, "AAPL");
        let mut tick_event = event("AAPL", "high", 100.0);
        tick_event.price = Some(150.0);
        assert!(coordinator.coordinate_event(&tick_event, &mut tick_ctx));

        let mut bar_ctx = context(DataSource::Ohlcv, "AAPL");
        let mut bar_event = event("AAPL", "high", 100.05);
        bar_event.price = Some(151.0);
        assert!(coordinator.coordinate_event(&bar_event, &mut bar_ctx));

        sleep(Duration::from_millis(80));
        coordinator.sweep_expired();

        let pending = coordinator.get_pending_events(10);
        assert_eq!(pending.len(), 1);
        let (winner, summary) = &pending[0];
        assert_eq!(winner.price, Some(150.0));
        assert_eq!(summary.selected_source, Some(DataSource::Tick));
        assert!(summary.conflict_detected);
        assert_eq!(summary.rejected_count, 1);
    }

    #[test]
    fn timestamp_latest_strategy_selects_newest() {
        let mut config = short_window_config();
        config
            .strategies
            .insert("high".to_string(), ConflictStrategy::TimestampLatest);
        let coordinator = coordinator_with(config);

        let mut tick_ctx = context(DataSource::Tick, "AAPL");
        coordinator.coordinate_event(&event("AAPL", "high", 100.0), &mut tick_ctx);
        let mut bar_ctx = context(DataSource::Ohlcv, "AAPL");
        coordinator.coordinate_event(&event("AAPL", "high", 100.5), &mut bar_ctx);

        sleep(Duration::from_millis(80));
        coordinator.sweep_expired();
        let pending = coordinator.get_pending_events(10);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0.time, 100.5);
        assert_eq!(pending[0].1.selected_source, Some(DataSource::Ohlcv));
    }

    #[test]
    fn critical_event_resolves_immediately() {
        let coordinator = coordinator_with(CoordinationConfig::default());
        let mut ctx = context(DataSource::Tick, "TSLA");
        let mut critical = event("TSLA", "high", 100.0);
        critical.priority = Some(EventPriority::Critical);

        assert!(coordinator.coordinate_event(&critical, &mut ctx));
        let pending = coordinator.get_pending_events(10);
        assert_eq!(pending.len(), 1);
        assert!(!pending[0].1.conflict_detected);
    }

    #[test]
    fn expected_sources_trigger_early_resolution() {
        // trend expects only OHLCV, so a single OHLCV trend event
        // resolves without waiting out its 1s window.
        let coordinator = coordinator_with(CoordinationConfig::default());
        let mut ctx = context(DataSource::Ohlcv, "MSFT");
        assert!(coordinator.coordinate_event(&event("MSFT", "trend", 100.0), &mut ctx));

        let pending = coordinator.get_pending_events(10);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].1.selected_source, Some(DataSource::Ohlcv));
    }

    #[test]
    fn last_event_per_source_wins_within_window() {
        let coordinator = coordinator_with(short_window_config());
        let mut ctx = context(DataSource::Tick, "AAPL");

        let mut first = event("AAPL", "high", 100.0);
        first.price = Some(150.0);
        coordinator.coordinate_event(&first, &mut ctx);
        let mut second = event("AAPL", "high", 100.01);
        second.price = Some(152.0);
        coordinator.coordinate_event(&second, &mut ctx);

        sleep(Duration::from_millis(80));
        coordinator.sweep_expired();
        let pending = coordinator.get_pending_events(10);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0.price, Some(152.0));
        assert!(!pending[0].1.conflict_detected);
    }

    #[test]
    fn pending_events_never_exceed_max() {
        let coordinator = coordinator_with(CoordinationConfig::default());

        for ticker in ["AAPL", "MSFT", "TSLA"] {
            let mut ctx = context(DataSource::Tick, ticker);
            let mut critical = event(ticker, "high", 100.0);
            critical.priority = Some(EventPriority::Critical); // resolve now
            coordinator.coordinate_event(&critical, &mut ctx);
        }

        assert_eq!(coordinator.get_pending_events(2).len(), 2);
        assert_eq!(coordinator.get_pending_events(10).len(), 1);
        assert!(coordinator.get_pending_events(10).is_empty());
    }

    #[test]
    fn high_priority_surge_drains_before_normal_high() {
        let coordinator = coordinator_with(short_window_config());

        let mut ctx = context(DataSource::Tick, "AAPL");
        coordinator.coordinate_event(&event("AAPL", "high", 100.0), &mut ctx);
        let mut ctx = context(DataSource::Tick, "MSFT");
        coordinator.coordinate_event(&event("MSFT", "surge", 100.1), &mut ctx);

        sleep(Duration::from_millis(80));
        coordinator.sweep_expired();

        // "high" was queued first but "surge" derives High priority.
        let pending = coordinator.get_pending_events(10);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].0.event_type, "surge");
        assert_eq!(pending[1].0.event_type, "high");
    }

    #[test]
    fn force_emit_scopes_to_ticker() {
        let coordinator = coordinator_with(CoordinationConfig::default());
        let mut ctx = context(DataSource::Tick, "AAPL");
        coordinator.coordinate_event(&event("AAPL", "high", 100.0), &mut ctx);
        let mut ctx = context(DataSource::Tick, "MSFT");
        coordinator.coordinate_event(&event("MSFT", "high", 100.0), &mut ctx);

        assert_eq!(coordinator.force_emit_pending(Some("AAPL")), 1);
        assert_eq!(coordinator.get_pending_events(10).len(), 1);

        assert_eq!(coordinator.force_emit_pending(None), 1);
        assert_eq!(coordinator.get_pending_events(10).len(), 1);
    }

    #[test]
    fn statistics_track_conflicts_and_timeouts() {
        let coordinator = coordinator_with(short_window_config());

        let mut tick_ctx = context(DataSource::Tick, "AAPL");
        coordinator.coordinate_event(&event("AAPL", "high", 100.0), &mut tick_ctx);
        let mut bar_ctx = context(DataSource::Ohlcv, "AAPL");
        coordinator.coordinate_event(&event("AAPL", "high", 100.1), &mut bar_ctx);

        let stats = coordinator.get_coordination_statistics();
        assert_eq!(stats.events_received, 2);
        assert_eq!(stats.conflicts_detected, 1);
        assert_eq!(stats.active_by_type.get("high"), Some(&1));

        sleep(Duration::from_millis(80));
        coordinator.sweep_expired();

        let stats = coordinator.get_coordination_statistics();
        assert_eq!(stats.events_resolved, 1);
        assert_eq!(stats.coordination_timeouts, 1);
        assert_eq!(stats.by_source.get("tick"), Some(&1));
        assert_eq!(stats.by_source.get("ohlcv"), Some(&1));
        assert!(stats.conflict_rate > 0.0);
        assert_eq!(stats.resolution_success_rate, 1.0);
        assert_eq!(stats.pending_emissions, 1);
    }

    #[test]
    fn resolution_failure_is_counted_not_raised() {
        // An eventless record cannot pick a winner; force-emitting it
        // counts a resolution failure and emits nothing.
        let coordinator = coordinator_with(CoordinationConfig::default());
        {
            let mut active = lock_map(&coordinator.active);
            active.insert(
                ("GE".to_string(), "high".to_string()),
                EventCoordination::new("GE", "high", 500, ConflictStrategy::SourcePriority),
            );
        }
        assert_eq!(coordinator.force_emit_pending(None), 0);
        let stats = coordinator.get_coordination_statistics();
        assert_eq!(stats.resolution_success_rate, 0.0);
    }
}
