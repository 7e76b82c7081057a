//! Monitor registration.
//!
//! A [`MetricsSink`] accepts [`Monitor`]s and returns an opaque
//! [`RegistrationToken`] that is later handed back to unregister them.
//! [`MonitorRegistry`] is the in-process sink; anything that can export
//! gauges (a JMX bridge, an OpenTelemetry meter) can implement the trait.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::error::MetricsError;

/// One gauge reading produced by a monitor.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Metric family name, e.g. `dbsource_connections_live`.
    pub metric: String,
    /// One-line description used for `# HELP`.
    pub help: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

impl Sample {
    pub fn gauge(metric: &str, help: &str, value: f64) -> Self {
        Self {
            metric: metric.to_string(),
            help: help.to_string(),
            labels: Vec::new(),
            value,
        }
    }

    /// Builder method: add a label.
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.push((key.to_string(), value.to_string()));
        self
    }
}

/// Something that exposes live state to a metrics sink.
pub trait Monitor: Send + Sync {
    /// Unique name, e.g.
    /// `dbsource:type=ConnectionSource,application=app,name=default`.
    fn object_name(&self) -> String;

    /// Current readings.
    fn samples(&self) -> Vec<Sample>;
}

/// Opaque handle returned by [`MetricsSink::register`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RegistrationToken {
    id: u64,
    object_name: String,
}

impl RegistrationToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }
}

/// Destination for monitors.
pub trait MetricsSink: Send + Sync {
    fn register(&self, monitor: Arc<dyn Monitor>) -> Result<RegistrationToken, MetricsError>;

    fn unregister(&self, token: RegistrationToken) -> Result<(), MetricsError>;
}

struct Registration {
    object_name: String,
    monitor: Arc<dyn Monitor>,
}

/// In-process sink that keeps monitors in memory and samples them on demand.
pub struct MonitorRegistry {
    /// Registrations keyed by token id, in registration order.
    entries: RwLock<BTreeMap<u64, Registration>>,
    next_id: AtomicU64,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of registered monitors.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Object names of every registered monitor, in registration order.
    pub fn object_names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|r| r.object_name.clone())
            .collect()
    }

    /// Sample every registered monitor.
    pub fn collect(&self) -> Vec<Sample> {
        let monitors: Vec<Arc<dyn Monitor>> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|r| Arc::clone(&r.monitor))
            .collect();
        // Sampling runs outside the lock; monitors may take their own locks.
        monitors.iter().flat_map(|m| m.samples()).collect()
    }

    /// Render every registered monitor in Prometheus text format.
    pub fn render_prometheus(&self) -> String {
        crate::prometheus::render_prometheus(&self.collect())
    }
}

impl Default for MonitorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for MonitorRegistry {
    fn register(&self, monitor: Arc<dyn Monitor>) -> Result<RegistrationToken, MetricsError> {
        let object_name = monitor.object_name();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.values().any(|r| r.object_name == object_name) {
            return Err(MetricsError::AlreadyRegistered(object_name));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            id,
            Registration {
                object_name: object_name.clone(),
                monitor,
            },
        );
        debug!(id, %object_name, "monitor registered");
        Ok(RegistrationToken { id, object_name })
    }

    fn unregister(&self, token: RegistrationToken) -> Result<(), MetricsError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .remove(&token.id)
            .ok_or(MetricsError::UnknownToken(token.id))?;
        debug!(id = token.id, object_name = %token.object_name, "monitor unregistered");
        Ok(())
    }
}

impl std::fmt::Debug for MonitorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorRegistry")
            .field("monitors", &self.object_names())
            .finish_non_exhaustive()
    }
}
