//! Application start and stop for all configured connection sources.

use std::sync::{Arc, Mutex, PoisonError};

use dbsource_core::{ConnectionSourceError, DatabaseOptions, SourceResult};
use dbsource_metrics::{MetricsError, MetricsSink, RegistrationToken};
use tracing::{info, warn};

use crate::factory::ConnectionSourceFactory;
use crate::handler::ConnectionSourceHandler;
use crate::storage::{ConnectionSourceStorage, StorageMonitor};

pub struct Lifecycle {
    handler: Arc<ConnectionSourceHandler>,
    factory: Arc<ConnectionSourceFactory>,
    storage: Arc<ConnectionSourceStorage>,
    sink: Arc<dyn MetricsSink>,
    storage_token: Mutex<Option<RegistrationToken>>,
}

impl Lifecycle {
    pub fn new(
        handler: Arc<ConnectionSourceHandler>,
        factory: Arc<ConnectionSourceFactory>,
        storage: Arc<ConnectionSourceStorage>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            handler,
            factory,
            storage,
            sink,
            storage_token: Mutex::new(None),
        }
    }

    /// Wire a lifecycle around a handler, reusing its factory, storage and
    /// the factory's metrics sink.
    pub fn for_handler(handler: Arc<ConnectionSourceHandler>) -> Self {
        let factory = Arc::clone(handler.factory());
        let storage = Arc::clone(handler.storage());
        let sink = Arc::clone(factory.metrics_sink());
        Self::new(handler, factory, storage, sink)
    }

    pub fn handler(&self) -> &Arc<ConnectionSourceHandler> {
        &self.handler
    }

    /// Register the storage monitor. Calling it twice is a no-op.
    pub fn init(&self) -> Result<(), MetricsError> {
        let mut token = self.storage_token.lock().unwrap_or_else(PoisonError::into_inner);
        if token.is_none() {
            let monitor = StorageMonitor::new(self.factory.application_name(), &self.storage);
            *token = Some(self.sink.register(Arc::new(monitor))?);
        }
        Ok(())
    }

    /// Eagerly create every source configured with `connect_on_startup`.
    ///
    /// Every configured database's options are validated, eager or not.
    /// Stops at the first failure. Returns the names that were connected.
    pub fn startup(&self) -> SourceResult<Vec<String>> {
        let mut connected = Vec::new();
        for name in self.factory.connection_source_names() {
            let config = self.factory.configuration_for(name)?;
            let options = DatabaseOptions::from_config(name, &config)?;
            if !options.connect_on_startup {
                continue;
            }
            self.handler.with_connection_source_named(name, |_, _| Ok(()))?;
            connected.push(name.clone());
        }
        info!(connected = connected.len(), "connection sources started");
        Ok(connected)
    }

    /// Close every configured or registered source and unregister the
    /// storage monitor. All names are attempted; the first error is returned.
    pub fn shutdown(&self) -> SourceResult<()> {
        let mut names: Vec<String> = self.factory.connection_source_names().to_vec();
        for name in self.storage.names() {
            if !names.contains(&name) {
                names.push(name);
            }
        }

        let mut first_error: Option<ConnectionSourceError> = None;
        for name in &names {
            if let Err(e) = self.handler.close_connection_source_named(name) {
                warn!(database = %name, error = %e, "failed to close connection source");
                first_error.get_or_insert(e);
            }
        }

        let token = self
            .storage_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            if let Err(e) = self.sink.unregister(token) {
                warn!(error = %e, "failed to unregister storage monitor");
            }
        }

        info!(closed = names.len(), "connection sources shut down");
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}
