use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Histogram, HistogramOpts, IntGauge, Opts, Registry,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Observation metrics
    pub static ref OBSERVATIONS_RECEIVED: CounterVec = CounterVec::new(
        Opts::new(
            "observations_received_total",
            "Observations received, by source type"
        ),
        &["source"]
    ).unwrap();

    pub static ref OBSERVATIONS_REJECTED: CounterVec = CounterVec::new(
        Opts::new(
            "observations_rejected_total",
            "Observations rejected by source rules"
        ),
        &["source"]
    ).unwrap();

    // Coordination metrics
    pub static ref CONFLICTS_DETECTED: Counter = Counter::new(
        "conflicts_detected_total",
        "Coordinations with events from two or more sources"
    ).unwrap();

    pub static ref EVENTS_COORDINATED: Counter = Counter::new(
        "events_coordinated_total",
        "Events accepted into a coordination window"
    ).unwrap();

    pub static ref EVENTS_EMITTED: Counter = Counter::new(
        "events_emitted_total",
        "Resolved events pushed to the emission queue"
    ).unwrap();

    pub static ref COORDINATION_TIMEOUTS: Counter = Counter::new(
        "coordination_timeouts_total",
        "Coordinations force-resolved by the deadline sweep"
    ).unwrap();

    pub static ref ACTIVE_COORDINATIONS: IntGauge = IntGauge::new(
        "active_coordinations",
        "Currently open coordination windows"
    ).unwrap();

    // Rules metrics
    pub static ref RULES_DISABLED_BY_BREAKER: Counter = Counter::new(
        "rules_disabled_by_breaker_total",
        "Rules permanently disabled by the circuit breaker"
    ).unwrap();

    // Latency metrics
    pub static ref PROCESSING_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "observation_processing_latency_seconds",
            "End-to-end latency of handle_multi_source_data"
        ).buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5])
    ).unwrap();
}

pub fn register_metrics() {
    REGISTRY.register(Box::new(OBSERVATIONS_RECEIVED.clone())).unwrap();
    REGISTRY.register(Box::new(OBSERVATIONS_REJECTED.clone())).unwrap();
    REGISTRY.register(Box::new(CONFLICTS_DETECTED.clone())).unwrap();
    REGISTRY.register(Box::new(EVENTS_COORDINATED.clone())).unwrap();
    REGISTRY.register(Box::new(EVENTS_EMITTED.clone())).unwrap();
    REGISTRY.register(Box::new(COORDINATION_TIMEOUTS.clone())).unwrap();
    REGISTRY.register(Box::new(ACTIVE_COORDINATIONS.clone())).unwrap();
    REGISTRY.register(Box::new(RULES_DISABLED_BY_BREAKER.clone())).unwrap();
    REGISTRY.register(Box::new(PROCESSING_LATENCY.clone())).unwrap();
}
