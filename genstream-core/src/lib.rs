pub mod aggregator;
pub mod assembler;
pub mod config;
pub mod delta;
pub mod engine;
pub mod error;
pub mod error_format;
pub mod formatter;
pub mod handler;
pub mod metrics;
pub mod model;
pub mod prompt;
pub mod state;
pub mod stream;
pub mod telemetry;
#[cfg(test)]
pub mod test_util;
