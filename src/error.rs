use thiserror::Error;

use crate::types::source::DataSource;

#[derive(Error, Debug)]
pub enum Error {
    // Observation errors
    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    #[error("Observation rejected by rule: {0}")]
    ObservationRejected(String),

    // Context errors
    #[error("Context not found: {0}")]
    ContextNotFound(String),

    #[error("Observation has no ticker")]
    EmptyTicker,

    // Rule errors
    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    #[error("Duplicate rule name: {0}")]
    DuplicateRule(String),

    #[error("Rule condition failed: rule={rule}, detail={detail}")]
    RuleExecution {
        rule: String,
        detail: String,
    },

    // Coordination errors
    #[error("Coordination failed for {ticker}/{event_type}: {detail}")]
    CoordinationFailed {
        ticker: String,
        event_type: String,
        detail: String,
    },

    #[error("No event selected for {ticker}/{event_type}")]
    NoEventSelected {
        ticker: String,
        event_type: String,
    },

    #[error("Unknown source for event: {0:?}")]
    UnknownSource(DataSource),

    // Processor errors
    #[error("Router failed: {0}")]
    RouterFailed(String),

    #[error("Detector failed: {0}")]
    DetectorFailed(String),

    #[error("No detector configured")]
    NoDetector,

    // System errors
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // IO Errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
