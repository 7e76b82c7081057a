//! Error types for monitor registration.

use thiserror::Error;

/// Errors reported by a [`MetricsSink`](crate::sink::MetricsSink).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("a monitor named '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("unknown registration token: {0}")]
    UnknownToken(u64),

    #[error("metrics sink unavailable: {0}")]
    Unavailable(String),
}
