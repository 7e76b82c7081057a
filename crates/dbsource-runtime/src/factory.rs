//! ConnectionSourceFactory: builds and tears down named connection sources.
//!
//! A finished source is the underlying source (a [`PooledConnectionSource`]
//! or a borrowed shared source) wrapped in a [`RecordingConnectionSource`],
//! optionally wrapped again in a [`MonitoredConnectionSource`] that is
//! registered with the metrics sink. Construction and destruction are
//! bracketed by lifecycle events and run the bootstrap hooks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use dbsource_core::error::require_non_blank;
use dbsource_core::{
    ConfigMap, ConfigTree, ConnectionSource, ConnectionSourceError, DatabaseOptions,
    RecordingConnectionSource, SourceResult,
};
use dbsource_metrics::{MetricsSink, MonitorRegistry, MonitoredConnectionSource, RegistrationToken};
use tracing::{debug, info, warn};

use crate::bootstrap::ConnectionSourceBootstrap;
use crate::data_source::{BorrowedDataSource, DataSourceStorage};
use crate::events::{ConnectionSourceEvent, EventBus, EventListeners};
use crate::pool::{Credentials, DriverRegistry, PoolOptions, PooledConnectionSource};

/// Application name used in monitor object names when none is configured.
pub const DEFAULT_APPLICATION: &str = "dbsource";

/// What `destroy` must undo for one created instance besides closing it.
#[derive(Debug, Default)]
struct Teardown {
    tokens: Vec<RegistrationToken>,
    borrowed: Option<Arc<BorrowedDataSource>>,
}

/// Identity of a created source, used to find its teardown record.
fn instance_key(source: &Arc<dyn ConnectionSource>) -> usize {
    Arc::as_ptr(source).cast::<()>() as usize
}

pub struct ConnectionSourceFactory {
    config: ConfigTree,
    names: Vec<String>,
    drivers: DriverRegistry,
    data_sources: Arc<DataSourceStorage>,
    events: Arc<dyn EventBus>,
    hooks: Vec<Arc<dyn ConnectionSourceBootstrap>>,
    metrics: Arc<dyn MetricsSink>,
    application: String,
    teardown: Mutex<HashMap<usize, Teardown>>,
}

impl ConnectionSourceFactory {
    pub fn new(config: ConfigTree, drivers: DriverRegistry) -> Self {
        let names = config.database_names();
        Self {
            config,
            names,
            drivers,
            data_sources: Arc::new(DataSourceStorage::new()),
            events: Arc::new(EventListeners::new()),
            hooks: Vec::new(),
            metrics: Arc::new(MonitorRegistry::new()),
            application: DEFAULT_APPLICATION.to_string(),
            teardown: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_data_sources(mut self, data_sources: Arc<DataSourceStorage>) -> Self {
        self.data_sources = data_sources;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Append a bootstrap hook. Hooks run in the order they were added.
    pub fn with_bootstrap(mut self, hook: Arc<dyn ConnectionSourceBootstrap>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_metrics_sink(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_application_name(mut self, application: impl Into<String>) -> Self {
        self.application = application.into();
        self
    }

    /// Configured database names, `default` first.
    pub fn connection_source_names(&self) -> &[String] {
        &self.names
    }

    /// The narrowed configuration of `name`.
    pub fn configuration_for(&self, name: &str) -> SourceResult<ConfigMap> {
        let name = require_non_blank(name)?;
        Ok(self.config.narrow(name))
    }

    pub fn application_name(&self) -> &str {
        &self.application
    }

    pub fn metrics_sink(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    pub fn data_sources(&self) -> &Arc<DataSourceStorage> {
        &self.data_sources
    }

    /// Build the connection source for `name`.
    pub fn create(&self, name: &str) -> SourceResult<Arc<dyn ConnectionSource>> {
        let config = self.configuration_for(name)?;
        debug!(database = %name, "creating connection source");
        self.events.publish(&ConnectionSourceEvent::ConnectStart {
            name: name.to_string(),
            config: config.clone(),
        });

        let options = DatabaseOptions::from_config(name, &config)?;
        let mut teardown = Teardown::default();
        let underlying = self.build_underlying(name, &options, &mut teardown)?;
        let recorder = Arc::new(RecordingConnectionSource::new(underlying));

        let source: Arc<dyn ConnectionSource> = if options.monitoring {
            let monitored = Arc::new(MonitoredConnectionSource::new(
                &self.application,
                name,
                recorder,
            ));
            let source: Arc<dyn ConnectionSource> = monitored.clone();
            match self.metrics.register(monitored.monitor()) {
                Ok(token) => {
                    debug!(
                        database = %name,
                        object_name = token.object_name(),
                        "monitor registered"
                    );
                    teardown.tokens.push(token);
                }
                Err(e) => {
                    self.abandon(name, &source, teardown);
                    return Err(ConnectionSourceError::Metrics {
                        database: name.to_string(),
                        message: e.to_string(),
                    });
                }
            }
            source
        } else {
            recorder
        };

        for (index, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = hook.init(name, &source) {
                for initialized in &self.hooks[..index] {
                    if let Err(e) = initialized.destroy(name, &source) {
                        warn!(database = %name, error = %e, "bootstrap teardown failed");
                    }
                }
                self.abandon(name, &source, teardown);
                return Err(ConnectionSourceError::Hook {
                    database: name.to_string(),
                    message: format!("{e:#}"),
                });
            }
        }

        self.lock_teardown().insert(instance_key(&source), teardown);
        self.events.publish(&ConnectionSourceEvent::ConnectEnd {
            name: name.to_string(),
            config,
            source: Arc::clone(&source),
        });
        info!(
            database = %name,
            database_type = source.database_type(),
            monitoring = options.monitoring,
            "connection source created"
        );
        Ok(source)
    }

    /// Tear down a source previously returned by [`create`](Self::create).
    ///
    /// Every step runs even when an earlier one fails; the first failure is
    /// returned once `DisconnectEnd` has been published.
    pub fn destroy(&self, name: &str, instance: &Arc<dyn ConnectionSource>) -> SourceResult<()> {
        let config = self.configuration_for(name)?;
        debug!(database = %name, "destroying connection source");
        self.events.publish(&ConnectionSourceEvent::DisconnectStart {
            name: name.to_string(),
            config: config.clone(),
            source: Arc::clone(instance),
        });

        let mut first_error: Option<ConnectionSourceError> = None;
        let mut fail = |error: ConnectionSourceError| {
            warn!(database = %name, error = %error, "connection source teardown step failed");
            first_error.get_or_insert(error);
        };

        for hook in &self.hooks {
            if let Err(e) = hook.destroy(name, instance) {
                fail(ConnectionSourceError::Hook {
                    database: name.to_string(),
                    message: format!("{e:#}"),
                });
            }
        }

        if instance.is_open() {
            if let Err(e) = instance.close() {
                fail(ConnectionSourceError::sql(name, e));
            }
        }

        let teardown = self.take_teardown(instance);
        if let Some(borrowed) = &teardown.borrowed {
            if let Err(e) = self.data_sources.release(borrowed) {
                fail(ConnectionSourceError::sql(name, e));
            }
        }
        for token in teardown.tokens {
            if let Err(e) = self.metrics.unregister(token) {
                fail(ConnectionSourceError::Metrics {
                    database: name.to_string(),
                    message: e.to_string(),
                });
            }
        }

        self.events.publish(&ConnectionSourceEvent::DisconnectEnd {
            name: name.to_string(),
            config,
        });
        info!(database = %name, "connection source destroyed");
        first_error.map_or(Ok(()), Err)
    }

    fn build_underlying(
        &self,
        name: &str,
        options: &DatabaseOptions,
        teardown: &mut Teardown,
    ) -> SourceResult<Arc<dyn ConnectionSource>> {
        if let Some(data_source) = &options.data_source {
            let borrowed = self.data_sources.acquire(data_source).ok_or_else(|| {
                ConnectionSourceError::config(
                    name,
                    "data_source",
                    format!("no data source registered under '{data_source}'"),
                )
            })?;
            teardown.borrowed = Some(Arc::clone(&borrowed));
            return Ok(borrowed);
        }

        // `from_config` guarantees a non-blank url when there is no data source.
        let url = options.url.as_deref().unwrap_or_default();
        let driver = self
            .drivers
            .find(url)
            .map_err(|e| ConnectionSourceError::sql(name, e))?;
        let credentials = Credentials {
            username: options.username.clone(),
            password: options.password.clone(),
        };
        let pool =
            PooledConnectionSource::new(url, credentials, driver, PoolOptions::from(options));

        if options.test_on_create {
            if let Err(e) = pool.initialize() {
                if let Err(close_err) = pool.close() {
                    warn!(database = %name, error = %close_err, "failed to close rejected pool");
                }
                return Err(ConnectionSourceError::sql(name, e));
            }
        }
        Ok(Arc::new(pool))
    }

    /// Undo a partially built source: close it and undo what this create
    /// call recorded in `teardown`.
    fn abandon(&self, name: &str, source: &Arc<dyn ConnectionSource>, teardown: Teardown) {
        if let Err(e) = source.close() {
            warn!(database = %name, error = %e, "failed to close abandoned source");
        }
        if let Some(borrowed) = &teardown.borrowed {
            if let Err(e) = self.data_sources.release(borrowed) {
                warn!(database = %name, error = %e, "failed to release data source");
            }
        }
        for token in teardown.tokens {
            if let Err(e) = self.metrics.unregister(token) {
                warn!(database = %name, error = %e, "failed to unregister monitor");
            }
        }
    }

    fn take_teardown(&self, instance: &Arc<dyn ConnectionSource>) -> Teardown {
        self.lock_teardown()
            .remove(&instance_key(instance))
            .unwrap_or_default()
    }

    fn lock_teardown(&self) -> std::sync::MutexGuard<'_, HashMap<usize, Teardown>> {
        self.teardown.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ConnectionSourceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSourceFactory")
            .field("names", &self.names)
            .field("drivers", &self.drivers)
            .field("hooks", &self.hooks.len())
            .field("application", &self.application)
            .finish_non_exhaustive()
    }
}
