pub mod types;
pub mod utils;
pub mod rules;
pub mod context;
pub mod coordinator;
pub mod core;
pub mod error;
pub mod config;
pub mod observability;
pub mod interfaces;
