//! End-to-end tests for the connection-source lifecycle.
//!
//! The test stack: `ConnectionSourceHandler` → `ConnectionSourceFactory` →
//! `DriverRegistry` → `TestDriver`, with an `EventListeners` bus recording
//! every lifecycle event and a `MonitorRegistry` as the metrics sink.
//!
//! These tests check that:
//! 1. A source is created once per name and reused until closed
//! 2. Checked-out connections are counted and the count returns to zero
//! 3. Closing an unknown name does nothing and publishes nothing
//! 4. Closing then using a name creates a fresh source with fresh events
//! 5. Configuration errors name the database and register nothing
//! 6. Concurrent first use builds exactly one source

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, Once};

use dbsource_core::{
    ConfigTree, ConnectionSource, ConnectionSourceError, DatabaseConnection, SqlError, SqlResult,
};
use dbsource_metrics::MonitorRegistry;
use dbsource_runtime::{
    ConnectionSourceEvent, ConnectionSourceFactory, ConnectionSourceHandler,
    ConnectionSourceStorage, Credentials, DataSourceStorage, Driver, DriverRegistry,
    EventListeners, Lifecycle, PoolOptions, PooledConnectionSource,
};

// ── Tracing setup ────────────────────────────────────────────────

static TRACING_INIT: Once = Once::new();

/// Controlled by `RUST_LOG` (e.g. `RUST_LOG=dbsource=debug`).
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Test driver ──────────────────────────────────────────────────

#[derive(Debug)]
struct TestConnection {
    closed: bool,
}

impl DatabaseConnection for TestConnection {
    fn execute(&mut self, statement: &str) -> SqlResult<u64> {
        if self.closed {
            return Err(SqlError::Closed("test connection".into()));
        }
        if statement.starts_with("fail") {
            return Err(SqlError::Statement(statement.to_string()));
        }
        Ok(1)
    }

    fn ping(&mut self) -> bool {
        !self.closed
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) -> SqlResult<()> {
        self.closed = true;
        Ok(())
    }
}

#[derive(Default)]
struct TestDriver {
    connects: AtomicUsize,
}

impl Driver for TestDriver {
    fn name(&self) -> &str {
        "test"
    }

    fn accepts(&self, url: &str) -> bool {
        url.starts_with("jdbc:test")
    }

    fn connect(
        &self,
        _url: &str,
        _credentials: &Credentials,
    ) -> SqlResult<Box<dyn DatabaseConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestConnection { closed: false }))
    }
}

// ── Harness ──────────────────────────────────────────────────────

const CONFIG: &str = r#"
[database]
url = "jdbc:test"

[databases.reports]
url = "jdbc:test:reports"
username = "reporter"
password = "secret"

[databases.internal]
url = ""

[databases.warehouse]
data_source = "warehouse"
"#;

struct Harness {
    handler: Arc<ConnectionSourceHandler>,
    registry: Arc<MonitorRegistry>,
    data_sources: Arc<DataSourceStorage>,
    driver: Arc<TestDriver>,
    events: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    fn new() -> Self {
        init_tracing();
        let driver = Arc::new(TestDriver::default());
        let registry = Arc::new(MonitorRegistry::new());
        let data_sources = Arc::new(DataSourceStorage::new());
        let events = Arc::new(Mutex::new(Vec::new()));

        let bus = Arc::new(EventListeners::new());
        let log = Arc::clone(&events);
        bus.subscribe(Arc::new(move |event: &ConnectionSourceEvent| {
            log.lock()
                .unwrap()
                .push(format!("{}:{}", event.kind(), event.name()));
        }));

        let factory = ConnectionSourceFactory::new(
            ConfigTree::from_toml_str(CONFIG).unwrap(),
            DriverRegistry::new().with_driver(driver.clone()),
        )
        .with_event_bus(bus)
        .with_metrics_sink(registry.clone())
        .with_data_sources(data_sources.clone())
        .with_application_name("it");

        let handler = Arc::new(ConnectionSourceHandler::new(
            Arc::new(factory),
            Arc::new(ConnectionSourceStorage::new()),
        ));
        Self {
            handler,
            registry,
            data_sources,
            driver,
            events,
        }
    }

    fn source(&self, name: &str) -> Arc<dyn ConnectionSource> {
        self.handler
            .with_connection_source_named(name, |_, source| Ok(Arc::clone(source)))
            .unwrap()
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

fn live_connections(registry: &MonitorRegistry, database: &str) -> f64 {
    registry
        .collect()
        .into_iter()
        .find(|s| {
            s.metric == "dbsource_connections_live"
                && s.labels.contains(&("database".to_string(), database.to_string()))
        })
        .map(|s| s.value)
        .unwrap_or(-1.0)
}

// ── Scenarios ────────────────────────────────────────────────────

#[test]
fn default_database_end_to_end() {
    let harness = Harness::new();

    let result = harness
        .handler
        .with_connection_source(|name, source| {
            assert_eq!(name, "default");
            let mut conn = source.read_write_connection(None)?;
            conn.execute("select 1")?;
            source.release_connection(conn)?;
            Ok("ok")
        })
        .unwrap();

    assert_eq!(result, "ok");
    assert_eq!(harness.handler.storage().names(), vec!["default"]);
    assert_eq!(harness.events(), vec!["connect_start:default", "connect_end:default"]);
}

#[test]
fn source_is_reused_until_closed() {
    let harness = Harness::new();
    let first = harness.source("reports");
    let second = harness.source("reports");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(harness.handler.storage().len(), 1);
    assert_eq!(harness.events().len(), 2);
}

#[test]
fn connection_count_returns_to_zero() {
    let harness = Harness::new();
    let source = harness.source("default");

    let connections: Vec<_> = (0..4)
        .map(|_| source.read_only_connection(None).unwrap())
        .collect();
    assert_eq!(live_connections(&harness.registry, "default"), 4.0);

    for conn in connections {
        source.release_connection(conn).unwrap();
    }
    assert_eq!(live_connections(&harness.registry, "default"), 0.0);
}

#[test]
fn closing_a_connection_before_release_counts_once() {
    let harness = Harness::new();
    let source = harness.source("default");

    let mut conn = source.read_write_connection(None).unwrap();
    conn.close().unwrap();
    assert_eq!(live_connections(&harness.registry, "default"), 0.0);

    source.release_connection(conn).unwrap();
    assert_eq!(live_connections(&harness.registry, "default"), 0.0);
}

#[test]
fn close_of_unregistered_name_is_silent() {
    let harness = Harness::new();
    harness.handler.close_connection_source_named("reports").unwrap();
    harness.handler.close_connection_source_named("nowhere").unwrap();

    assert!(harness.events().is_empty());
    assert!(harness.handler.storage().is_empty());
}

#[test]
fn close_then_use_recreates() {
    let harness = Harness::new();
    let first = harness.source("default");
    harness.handler.close_connection_source().unwrap();
    let second = harness.source("default");

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(!first.is_open());
    assert_eq!(
        harness.events(),
        vec![
            "connect_start:default",
            "connect_end:default",
            "disconnect_start:default",
            "disconnect_end:default",
            "connect_start:default",
            "connect_end:default",
        ]
    );
    assert_eq!(harness.registry.len(), 1);
}

#[test]
fn blank_url_is_a_config_error_and_nothing_is_registered() {
    let harness = Harness::new();
    let err = harness
        .handler
        .with_connection_source_named("internal", |_, _| Ok(()))
        .unwrap_err();

    assert_eq!(err.database(), Some("internal"));
    assert!(matches!(err, ConnectionSourceError::Config { ref key, .. } if key == "url"));
    assert!(harness.handler.storage().is_empty());
    assert!(harness.registry.is_empty());
    assert_eq!(harness.driver.connects.load(Ordering::SeqCst), 0);
}

#[test]
fn callback_failure_is_wrapped_with_database() {
    let harness = Harness::new();
    let err = harness
        .handler
        .with_connection_source_named("reports", |_, source| {
            let mut conn = source.read_write_connection(None)?;
            let result = conn.execute("fail here");
            source.release_connection(conn)?;
            result
        })
        .unwrap_err();

    assert!(
        err.to_string()
            .contains("an error occurred when executing a statement on database 'reports'")
    );
    assert_eq!(live_connections(&harness.registry, "reports"), 0.0);
}

#[test]
fn concurrent_first_use_creates_one_source() {
    let harness = Harness::new();
    let barrier = Barrier::new(12);

    let sources: Vec<Arc<dyn ConnectionSource>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..12)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    harness.source("reports")
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(sources.iter().all(|s| Arc::ptr_eq(s, &sources[0])));
    assert_eq!(harness.handler.storage().len(), 1);
    assert_eq!(harness.events(), vec!["connect_start:reports", "connect_end:reports"]);
}

#[test]
fn concurrent_checkouts_balance() {
    let harness = Harness::new();
    let source = harness.source("default");
    let barrier = Barrier::new(8);

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                barrier.wait();
                for _ in 0..50 {
                    let conn = source.read_write_connection(None).unwrap();
                    source.release_connection(conn).unwrap();
                }
            });
        }
    });

    assert_eq!(live_connections(&harness.registry, "default"), 0.0);
}

#[test]
fn shared_data_source_is_released_on_close() {
    let harness = Harness::new();
    let shared: Arc<dyn ConnectionSource> = Arc::new(PooledConnectionSource::new(
        "jdbc:test:warehouse",
        Credentials::default(),
        harness.driver.clone(),
        PoolOptions::default(),
    ));
    harness.data_sources.register("warehouse", Arc::clone(&shared));

    let borrowed = harness.source("warehouse");
    let conn = borrowed.read_only_connection(None).unwrap();
    assert_eq!(live_connections(&harness.registry, "warehouse"), 1.0);
    borrowed.release_connection(conn).unwrap();
    assert_eq!(live_connections(&harness.registry, "warehouse"), 0.0);

    harness.handler.close_connection_source_named("warehouse").unwrap();
    assert!(harness.data_sources.is_empty());
    assert!(!shared.is_open());
}

#[test]
fn lifecycle_shutdown_closes_all() {
    let harness = Harness::new();
    let lifecycle = Lifecycle::for_handler(Arc::clone(&harness.handler));
    lifecycle.init().unwrap();

    harness.source("default");
    harness.source("reports");
    assert_eq!(harness.registry.len(), 3);

    lifecycle.shutdown().unwrap();
    assert!(harness.handler.storage().is_empty());
    assert!(harness.registry.is_empty());
}
