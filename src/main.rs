use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tickfuse::config::loader::AppConfig;
use tickfuse::core::processor::EventProcessor;
use tickfuse::interfaces::sink::EventSink;
use tickfuse::observability::metrics::register_metrics;
use tickfuse::types::event::MarketEvent;
use tickfuse::utils::task_supervisor::TaskSupervisor;

/// Default sink for a standalone run: logs resolved events instead of
/// publishing them to a transport.
struct LogSink;

impl EventSink for LogSink {
    fn add(&self, event: MarketEvent) -> bool {
        info!(
            ticker = %event.ticker,
            event_type = %event.event_type,
            price = ?event.price,
            source = ?event.source_metadata.as_ref().map(|m| m.source_type),
            "Event emitted"
        );
        true
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("TICKFUSE_ENV").unwrap_or_else(|_| "default".to_string());
    let config = match AppConfig::load(&env) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config load failed ({}), using defaults", e);
            AppConfig::default()
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.clone()));
    if config.log.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    register_metrics();

    let processor = Arc::new(EventProcessor::new(
        Arc::new(config.coordination),
        Arc::new(LogSink),
    ));
    let mut supervisor = TaskSupervisor::new();
    processor.start_maintenance(&mut supervisor);

    info!("Coordination core running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    processor.shutdown();
    supervisor.shutdown_all();

    let report = processor.get_performance_report();
    info!(
        "Final counts: {} observations, {} events published, {} errors",
        report.observations_processed, report.events_published, report.errors
    );
    Ok(())
}
