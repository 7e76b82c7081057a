//! MonitoredConnectionSource: the monitoring decorator.
//!
//! Sits on top of a [`RecordingConnectionSource`] and carries the
//! [`ConnectionSourceMonitor`] that a factory registers with its
//! [`MetricsSink`](crate::sink::MetricsSink). Every connection operation is
//! forwarded unchanged.

use std::sync::{Arc, Weak};

use dbsource_core::{ConnectionSource, DatabaseConnection, RecordingConnectionSource, SqlResult};

use crate::sink::{Monitor, Sample};

/// Exposes the live-connection count of one named source.
///
/// Holds the recorder weakly: a monitor left registered never keeps a
/// destroyed source alive, it just reports nothing.
pub struct ConnectionSourceMonitor {
    application: String,
    name: String,
    source: Weak<RecordingConnectionSource>,
}

impl ConnectionSourceMonitor {
    pub fn new(application: &str, name: &str, source: &Arc<RecordingConnectionSource>) -> Self {
        Self {
            application: application.to_string(),
            name: name.to_string(),
            source: Arc::downgrade(source),
        }
    }

    /// Current live-connection count, or `None` once the source is gone.
    pub fn connection_count(&self) -> Option<usize> {
        self.source.upgrade().map(|s| s.connection_count())
    }
}

impl Monitor for ConnectionSourceMonitor {
    fn object_name(&self) -> String {
        format!(
            "dbsource:type=ConnectionSource,application={},name={}",
            self.application, self.name
        )
    }

    fn samples(&self) -> Vec<Sample> {
        let Some(source) = self.source.upgrade() else {
            return Vec::new();
        };
        vec![
            Sample::gauge(
                "dbsource_connections_live",
                "Connections checked out and not yet released.",
                source.connection_count() as f64,
            )
            .with_label("application", &self.application)
            .with_label("database", &self.name),
            Sample::gauge(
                "dbsource_source_open",
                "Whether the connection source accepts checkouts (1 = open).",
                if source.is_open() { 1.0 } else { 0.0 },
            )
            .with_label("application", &self.application)
            .with_label("database", &self.name),
        ]
    }
}

/// Decorator that pairs a recording source with its monitor.
pub struct MonitoredConnectionSource {
    delegate: Arc<RecordingConnectionSource>,
    monitor: Arc<ConnectionSourceMonitor>,
}

impl MonitoredConnectionSource {
    pub fn new(application: &str, name: &str, delegate: Arc<RecordingConnectionSource>) -> Self {
        let monitor = Arc::new(ConnectionSourceMonitor::new(application, name, &delegate));
        Self { delegate, monitor }
    }

    /// The monitor to register with a metrics sink.
    pub fn monitor(&self) -> Arc<dyn Monitor> {
        self.monitor.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.delegate.connection_count()
    }

    pub fn delegate(&self) -> &Arc<RecordingConnectionSource> {
        &self.delegate
    }
}

impl ConnectionSource for MonitoredConnectionSource {
    fn read_only_connection(&self, table: Option<&str>) -> SqlResult<Box<dyn DatabaseConnection>> {
        self.delegate.read_only_connection(table)
    }

    fn read_write_connection(
        &self,
        table: Option<&str>,
    ) -> SqlResult<Box<dyn DatabaseConnection>> {
        self.delegate.read_write_connection(table)
    }

    fn special_connection(&self, table: Option<&str>) -> Option<Box<dyn DatabaseConnection>> {
        self.delegate.special_connection(table)
    }

    fn save_special_connection(
        &self,
        connection: Box<dyn DatabaseConnection>,
    ) -> Option<Box<dyn DatabaseConnection>> {
        self.delegate.save_special_connection(connection)
    }

    fn release_connection(&self, connection: Box<dyn DatabaseConnection>) -> SqlResult<()> {
        self.delegate.release_connection(connection)
    }

    fn close(&self) -> SqlResult<()> {
        self.delegate.close()
    }

    fn is_open(&self) -> bool {
        self.delegate.is_open()
    }

    fn database_type(&self) -> &str {
        self.delegate.database_type()
    }
}
