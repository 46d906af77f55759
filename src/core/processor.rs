use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

use crate::config::CoordinationConfig;
use crate::context::manager::{SourceContextManager, SourceStatistics};
use crate::context::{SharedContext, SourceContext};
use crate::coordinator::multi_source::{CoordinationStatistics, MultiSourceCoordinator};
use crate::error::{Error, Result};
use crate::interfaces::detector::EventDetector;
use crate::interfaces::router::DataRouter;
use crate::interfaces::sink::EventSink;
use crate::observability::metrics::{
    OBSERVATIONS_RECEIVED, OBSERVATIONS_REJECTED, PROCESSING_LATENCY,
};
use crate::observability::tracing::trace_observation;
use crate::rules::engine::{RuleStatistics, SourceRulesEngine};
use crate::types::event::MarketEvent;
use crate::types::observation::{Observation, TickData};
use crate::types::source::DataSource;
use crate::utils::task_supervisor::TaskSupervisor;

const SLOW_PROCESSING_WARN_MS: u64 = 500;

/// Per-call outcome. Never carries an error out as a panic or a
/// propagated Result: failures land in `errors` and flip `success`.
#[derive(Clone, Debug, Default)]
pub struct ProcessingResult {
    pub success: bool,
    pub events_processed: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub processing_time_ms: u64,
}

/// Single entry point for every inbound observation: builds the source
/// context, applies per-source rules, routes to the external channel
/// router (or the direct tick fallback), feeds produced events into the
/// coordinator, and drains resolved events to the outbound sink.
pub struct EventProcessor {
    contexts: Arc<SourceContextManager>,
    rules: Arc<SourceRulesEngine>,
    coordinator: Arc<MultiSourceCoordinator>,
    router: RwLock<Option<Arc<dyn DataRouter>>>,
    detector: Option<Arc<dyn EventDetector>>,
    sink: Arc<dyn EventSink>,
    config: Arc<CoordinationConfig>,

    observations_received: AtomicU64,
    observations_processed: AtomicU64,
    events_detected: AtomicU64,
    events_published: AtomicU64,
    error_count: AtomicU64,
}

impl EventProcessor {
    pub fn new(config: Arc<CoordinationConfig>, sink: Arc<dyn EventSink>) -> Self {
        let rules = Arc::new(SourceRulesEngine::with_default_rules(&config));
        let contexts = Arc::new(SourceContextManager::new(
            Arc::clone(&rules),
            Arc::clone(&config),
        ));
        let coordinator = Arc::new(MultiSourceCoordinator::new(Arc::clone(&config)));
        EventProcessor {
            contexts,
            rules,
            coordinator,
            router: RwLock::new(None),
            detector: None,
            sink,
            config,
            observations_received: AtomicU64::new(0),
            observations_processed: AtomicU64::new(0),
            events_detected: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn EventDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Wire the external channel router. Idempotent; a later call
    /// replaces the previous router.
    pub fn set_router(&self, router: Arc<dyn DataRouter>) {
        let mut slot = self.router.write().unwrap_or_else(|p| p.into_inner());
        *slot = Some(router);
        info!("Channel router configured");
    }

    fn current_router(&self) -> Option<Arc<dyn DataRouter>> {
        self.router
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Process one multi-source observation end to end. Nothing escapes
    /// this method: all failure modes are folded into the result.
    pub async fn handle_multi_source_data(
        &self,
        observation: Observation,
        source_label: &str,
    ) -> ProcessingResult {
        let started = Instant::now();
        self.observations_received.fetch_add(1, Ordering::SeqCst);

        let hint = DataSource::from_label(source_label);
        let source_str = hint.map(|s| s.as_str()).unwrap_or("unknown");
        OBSERVATIONS_RECEIVED.with_label_values(&[source_str]).inc();
        let span = trace_observation(
            hint.unwrap_or_else(|| observation.infer_source()),
            observation.ticker(),
        );

        let outcome = self
            .process_observation(&observation, hint)
            .instrument(span)
            .await;
        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                self.error_count.fetch_add(1, Ordering::SeqCst);
                ProcessingResult {
                    success: false,
                    errors: vec![e.to_string()],
                    ..Default::default()
                }
            }
        };

        let drained = self.drain_pending(self.config.drain_batch);
        if drained > 0 {
            debug!("Drained {} coordinated events to sink", drained);
        }

        self.observations_processed.fetch_add(1, Ordering::SeqCst);
        let elapsed = started.elapsed();
        PROCESSING_LATENCY.observe(elapsed.as_secs_f64());
        result.processing_time_ms = elapsed.as_millis() as u64;
        if result.processing_time_ms > SLOW_PROCESSING_WARN_MS {
            warn!(
                "Slow observation processing: {}ms for {}",
                result.processing_time_ms,
                observation.ticker()
            );
        }
        result
    }

    async fn process_observation(
        &self,
        observation: &Observation,
        hint: Option<DataSource>,
    ) -> Result<ProcessingResult> {
        let mut result = ProcessingResult::default();
        let shared = self.contexts.create_context(observation, hint);

        let passed = {
            let mut context = lock(&shared);
            self.contexts.apply_source_rules(observation, &mut context)
        };
        if !passed {
            let source = hint.unwrap_or_else(|| observation.infer_source());
            OBSERVATIONS_REJECTED
                .with_label_values(&[source.as_str()])
                .inc();
            result
                .warnings
                .push(format!("observation rejected by source rules: {}", observation.ticker()));
            return Ok(result);
        }

        match self.current_router() {
            Some(router) => {
                // The router may block; call it with no locks held.
                let route = router.route_data(observation).await;
                result.errors.extend(route.errors);
                result.success = route.success;

                for event in route.events {
                    self.ingest_routed_event(event, &shared, &mut result);
                }
            }
            None => {
                result
                    .warnings
                    .push("no router configured, using direct processing".to_string());
                match observation {
                    Observation::Tick(tick) => {
                        let forwarded = self.detect_and_forward(tick, &mut result).await?;
                        result.events_processed += forwarded;
                        result.success = true;
                    }
                    _ => {
                        result
                            .warnings
                            .push("direct processing handles tick data only".to_string());
                    }
                }
            }
        }

        Ok(result)
    }

    fn ingest_routed_event(
        &self,
        mut event: MarketEvent,
        shared: &SharedContext,
        result: &mut ProcessingResult,
    ) {
        let mut context = lock(shared);
        if self.contexts.should_deduplicate_event(&event, &context) {
            context.add_stage(format!("deduplicated:{}", event.event_type));
            result.warnings.push(format!(
                "duplicate {} event for {} suppressed",
                event.event_type, event.ticker
            ));
            return;
        }

        self.contexts.add_event_metadata(&mut event, &mut context);
        context.add_stage(format!("event_detected:{}", event.event_type));
        self.events_detected.fetch_add(1, Ordering::SeqCst);

        if self.coordinator.coordinate_event(&event, &mut context) {
            result.events_processed += 1;
        } else {
            result.errors.push(format!(
                "coordination failed for {}/{}",
                event.ticker, event.event_type
            ));
        }
    }

    async fn detect_and_forward(
        &self,
        tick: &TickData,
        result: &mut ProcessingResult,
    ) -> Result<usize> {
        let detector = self.detector.as_ref().ok_or(Error::NoDetector)?;
        let detected = detector.detect_events(&tick.ticker, tick).await;
        result.warnings.extend(detected.warnings);
        if !detected.success {
            return Err(Error::DetectorFailed(detected.errors.join("; ")));
        }

        let mut forwarded = 0;
        for event in detected.events {
            self.events_detected.fetch_add(1, Ordering::SeqCst);
            if self.sink.add(event) {
                self.events_published.fetch_add(1, Ordering::SeqCst);
                forwarded += 1;
            }
        }
        Ok(forwarded)
    }

    /// Legacy tick-only ingestion: validation, detection, and direct
    /// publishing with no multi-source coordination.
    pub async fn handle_tick(&self, tick: TickData) -> ProcessingResult {
        let started = Instant::now();
        self.observations_received.fetch_add(1, Ordering::SeqCst);
        OBSERVATIONS_RECEIVED.with_label_values(&["tick"]).inc();

        let mut result = ProcessingResult::default();
        if tick.ticker.is_empty() || tick.price <= 0.0 || tick.timestamp <= 0.0 {
            OBSERVATIONS_REJECTED.with_label_values(&["tick"]).inc();
            result.errors.push(format!("invalid tick for {:?}", tick.ticker));
        } else {
            match self.detect_and_forward(&tick, &mut result).await {
                Ok(forwarded) => {
                    result.events_processed = forwarded;
                    result.success = true;
                }
                Err(e) => {
                    self.error_count.fetch_add(1, Ordering::SeqCst);
                    result.errors.push(e.to_string());
                }
            }
        }

        self.observations_processed.fetch_add(1, Ordering::SeqCst);
        result.processing_time_ms = started.elapsed().as_millis() as u64;
        result
    }

    /// Move resolved events from the coordinator's emission queue to the
    /// outbound sink. Returns the number the sink accepted.
    pub fn drain_pending(&self, max_events: usize) -> usize {
        let mut published = 0;
        for (event, summary) in self.coordinator.get_pending_events(max_events) {
            debug!(
                "Emitting {}/{} selected from {:?}",
                summary.ticker, summary.event_type, summary.selected_source
            );
            if self.sink.add(event) {
                published += 1;
            }
        }
        self.events_published
            .fetch_add(published as u64, Ordering::SeqCst);
        published
    }

    /// Spawn the periodic maintenance loops: context store cleanup and
    /// the coordination-deadline sweep (which also drains what it
    /// resolves).
    pub fn start_maintenance(self: &Arc<Self>, supervisor: &mut TaskSupervisor) {
        let processor = Arc::clone(self);
        let cleanup_interval = self.config.context_cleanup_interval_secs;
        supervisor.spawn("context_cleanup", async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(cleanup_interval.max(1)));
            loop {
                ticker.tick().await;
                processor.contexts.cleanup_old_contexts(false);
            }
        });

        let processor = Arc::clone(self);
        let sweep_interval = self.config.sweep_interval_secs;
        let drain_batch = self.config.drain_batch;
        supervisor.spawn("coordination_sweep", async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(sweep_interval.max(1)));
            loop {
                ticker.tick().await;
                processor.coordinator.sweep_expired();
                processor.drain_pending(drain_batch);
            }
        });
    }

    /// Flush everything still in flight: force-resolve open
    /// coordinations and drain the emission queue to the sink.
    pub fn shutdown(&self) {
        let flushed = self.coordinator.force_emit_pending(None);
        info!("Shutdown flush: {} coordinations force-emitted", flushed);
        while self.drain_pending(self.config.drain_batch) > 0 {}
    }

    pub fn get_performance_report(&self) -> PerformanceReport {
        PerformanceReport {
            observations_received: self.observations_received.load(Ordering::SeqCst),
            observations_processed: self.observations_processed.load(Ordering::SeqCst),
            events_detected: self.events_detected.load(Ordering::SeqCst),
            events_published: self.events_published.load(Ordering::SeqCst),
            errors: self.error_count.load(Ordering::SeqCst),
            rules: self.rules.get_rule_statistics(),
            coordination: self.coordinator.get_coordination_statistics(),
            sources: self.contexts.get_source_statistics(),
        }
    }

    pub fn context_manager(&self) -> &Arc<SourceContextManager> {
        &self.contexts
    }

    pub fn rules_engine(&self) -> &Arc<SourceRulesEngine> {
        &self.rules
    }

    pub fn coordinator(&self) -> &Arc<MultiSourceCoordinator> {
        &self.coordinator
    }
}

fn lock(shared: &SharedContext) -> std::sync::MutexGuard<'_, SourceContext> {
    shared.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Clone, Debug)]
pub struct PerformanceReport {
    pub observations_received: u64,
    pub observations_processed: u64,
    pub events_detected: u64,
    pub events_published: u64,
    pub errors: u64,
    pub rules: RuleStatistics,
    pub coordination: CoordinationStatistics,
    pub sources: SourceStatistics,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::detector::{DetectResult, MockEventDetector};
    use crate::interfaces::router::{MockDataRouter, RouteResult};
    use crate::types::observation::OhlcvData;
    use crate::utils::helper::current_unix_secs;
    use std::sync::Mutex;

    struct VecSink {
        events: Mutex<Vec<MarketEvent>>,
    }

    impl VecSink {
        fn new() -> Arc<Self> {
            Arc::new(VecSink {
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<MarketEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventSink for VecSink {
        fn add(&self, event: MarketEvent) -> bool {
            self.events.lock().unwrap().push(event);
            true
        }
    }

    fn processor(sink: Arc<VecSink>) -> EventProcessor {
        EventProcessor::new(Arc::new(CoordinationConfig::default()), sink)
    }

    fn passing_ohlcv(ticker: &str) -> Observation {
        Observation::Ohlcv(OhlcvData {
            ticker: ticker.to_string(),
            timestamp: current_unix_secs(),
            open: 100.0,
            high: 103.0,
            low: 99.0,
            close: 102.0,
            volume: 4000,
            avg_volume: Some(2000),
            percent_change: Some(2.0),
        })
    }

    fn weak_ohlcv(ticker: &str) -> Observation {
        Observation::Ohlcv(OhlcvData {
            ticker: ticker.to_string(),
            timestamp: current_unix_secs(),
            open: 100.0,
            high: 100.6,
            low: 99.9,
            close: 100.5,
            volume: 4000,
            avg_volume: Some(2000),
            percent_change: Some(0.5),
        })
    }

    fn tick(ticker: &str) -> TickData {
        TickData {
            ticker: ticker.to_string(),
            timestamp: current_unix_secs(),
            price: 150.0,
            volume: 100,
        }
    }

    fn trend_event(ticker: &str) -> MarketEvent {
        MarketEvent::new(ticker, "trend", current_unix_secs())
    }

    #[tokio::test]
    async fn routed_event_is_coordinated_and_published() {
        let sink = VecSink::new();
        let processor = processor(Arc::clone(&sink));

        let mut router = MockDataRouter::new();
        router.expect_route_data().returning(|observation| RouteResult {
            success: true,
            events: vec![trend_event(observation.ticker())],
            errors: Vec::new(),
        });
        processor.set_router(Arc::new(router));

        // trend expects only OHLCV, so coordination resolves in-line and
        // the drain at the end of the call reaches the sink.
        let result = processor
            .handle_multi_source_data(passing_ohlcv("MSFT"), "ohlcv")
            .await;

        assert!(result.success);
        assert_eq!(result.events_processed, 1);
        assert!(result.errors.is_empty());

        let published = sink.events();
        assert_eq!(published.len(), 1);
        let meta = published[0].source_metadata.as_ref().expect("provenance");
        assert_eq!(meta.source_type, DataSource::Ohlcv);
    }

    #[tokio::test]
    async fn rejected_observation_never_reaches_router() {
        let sink = VecSink::new();
        let processor = processor(Arc::clone(&sink));

        let mut router = MockDataRouter::new();
        router.expect_route_data().never();
        processor.set_router(Arc::new(router));

        let result = processor
            .handle_multi_source_data(weak_ohlcv("MSFT"), "ohlcv")
            .await;

        assert!(!result.success);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("rejected by source rules")));
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn router_success_with_zero_events_is_success() {
        let sink = VecSink::new();
        let processor = processor(Arc::clone(&sink));

        let mut router = MockDataRouter::new();
        router.expect_route_data().returning(|_| RouteResult {
            success: true,
            events: Vec::new(),
            errors: Vec::new(),
        });
        processor.set_router(Arc::new(router));

        let result = processor
            .handle_multi_source_data(passing_ohlcv("MSFT"), "ohlcv")
            .await;

        assert!(result.success);
        assert_eq!(result.events_processed, 0);
    }

    #[tokio::test]
    async fn missing_router_falls_back_to_direct_tick_processing() {
        let sink = VecSink::new();

        let mut detector = MockEventDetector::new();
        detector.expect_detect_events().returning(|ticker, _| DetectResult {
            success: true,
            events: vec![MarketEvent::new(ticker, "high", current_unix_secs())],
            errors: Vec::new(),
            warnings: Vec::new(),
        });
        let processor = EventProcessor::new(
            Arc::new(CoordinationConfig::default()),
            Arc::clone(&sink) as Arc<dyn EventSink>,
        )
        .with_detector(Arc::new(detector));

        let result = processor
            .handle_multi_source_data(Observation::Tick(tick("AAPL")), "tick")
            .await;

        assert!(result.success);
        assert_eq!(result.events_processed, 1);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("no router configured")));
        // Direct path bypasses coordination entirely.
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_event_from_second_source_is_suppressed() {
        let sink = VecSink::new();
        let processor = processor(Arc::clone(&sink));

        let mut router = MockDataRouter::new();
        router.expect_route_data().returning(|observation| RouteResult {
            success: true,
            events: vec![trend_event(observation.ticker())],
            errors: Vec::new(),
        });
        processor.set_router(Arc::new(router));

        let first = processor
            .handle_multi_source_data(passing_ohlcv("NVDA"), "ohlcv")
            .await;
        assert_eq!(first.events_processed, 1);

        let second = processor
            .handle_multi_source_data(Observation::Tick(tick("NVDA")), "tick")
            .await;
        assert!(second.success);
        assert_eq!(second.events_processed, 0);
        assert!(second.warnings.iter().any(|w| w.contains("duplicate")));
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn handle_tick_rejects_invalid_and_publishes_valid() {
        let sink = VecSink::new();

        let mut detector = MockEventDetector::new();
        detector.expect_detect_events().returning(|ticker, _| DetectResult {
            success: true,
            events: vec![MarketEvent::new(ticker, "low", current_unix_secs())],
            errors: Vec::new(),
            warnings: Vec::new(),
        });
        let processor = EventProcessor::new(
            Arc::new(CoordinationConfig::default()),
            Arc::clone(&sink) as Arc<dyn EventSink>,
        )
        .with_detector(Arc::new(detector));

        let mut bad = tick("AAPL");
        bad.price = 0.0;
        let result = processor.handle_tick(bad).await;
        assert!(!result.success);
        assert!(!result.errors.is_empty());

        let result = processor.handle_tick(tick("AAPL")).await;
        assert!(result.success);
        assert_eq!(result.events_processed, 1);
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_flushes_open_coordinations() {
        let sink = VecSink::new();
        let processor = processor(Arc::clone(&sink));

        let mut router = MockDataRouter::new();
        router.expect_route_data().returning(|observation| RouteResult {
            success: true,
            // "high" waits on its 500ms window; nothing drains in-line.
            events: vec![MarketEvent::new(
                observation.ticker(),
                "high",
                current_unix_secs(),
            )],
            errors: Vec::new(),
        });
        processor.set_router(Arc::new(router));

        let result = processor
            .handle_multi_source_data(passing_ohlcv("AMD"), "ohlcv")
            .await;
        assert_eq!(result.events_processed, 1);
        assert!(sink.events().is_empty());

        processor.shutdown();
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn performance_report_aggregates_components() {
        let sink = VecSink::new();
        let processor = processor(Arc::clone(&sink));

        let mut router = MockDataRouter::new();
        router.expect_route_data().returning(|observation| RouteResult {
            success: true,
            events: vec![trend_event(observation.ticker())],
            errors: Vec::new(),
        });
        processor.set_router(Arc::new(router));

        processor
            .handle_multi_source_data(passing_ohlcv("MSFT"), "ohlcv")
            .await;
        processor
            .handle_multi_source_data(weak_ohlcv("MSFT"), "ohlcv")
            .await;

        let report = processor.get_performance_report();
        assert_eq!(report.observations_received, 2);
        assert_eq!(report.observations_processed, 2);
        assert_eq!(report.events_detected, 1);
        assert_eq!(report.events_published, 1);
        assert_eq!(report.coordination.events_received, 1);
        assert!(report.rules.total_executions > 0);
        assert_eq!(report.sources.total_contexts, 2);
    }
}
