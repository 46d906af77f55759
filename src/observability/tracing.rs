use tracing::Span;

use crate::types::source::DataSource;

pub fn trace_observation(source: DataSource, ticker: &str) -> Span {
    tracing::info_span!(
        "observation_processing",
        source = %source,
        ticker = %ticker,
    )
}

pub fn trace_coordination(ticker: &str, event_type: &str) -> Span {
    tracing::info_span!(
        "coordination",
        ticker = %ticker,
        event_type = %event_type,
    )
}
