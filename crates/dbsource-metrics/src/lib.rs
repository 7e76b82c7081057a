//! dbsource-metrics: observability for connection sources.
//!
//! Registers per-source monitors with a metrics sink and renders their
//! gauges in Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! MonitoredConnectionSource
//!   └── monitor() → ConnectionSourceMonitor ──register──▶ MetricsSink
//!                                                          └── MonitorRegistry
//!                                                                ├── collect()
//!                                                                └── render_prometheus()
//! ```

pub mod error;
pub mod monitored;
pub mod prometheus;
pub mod sink;

pub use error::MetricsError;
pub use monitored::{ConnectionSourceMonitor, MonitoredConnectionSource};
pub use prometheus::render_prometheus;
pub use sink::{MetricsSink, Monitor, MonitorRegistry, RegistrationToken, Sample};
