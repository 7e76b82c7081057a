//! Pooled connection source and driver registry.
//!
//! A [`PooledConnectionSource`] keeps a list of idle connections for one
//! driver URL. Connections are created through a [`Driver`] injected at
//! construction, which keeps the pool independent of any wire protocol.
//!
//! # Checkout
//!
//! ```text
//! read_write_connection()
//!   → idle connection available
//!       → idle past idle_timeout  → close, try the next one
//!       → test_before_get && !ping → close, try the next one
//!       → otherwise               → hand it out
//!   → no idle connection → Driver::connect() (outside the lock)
//! ```
//!
//! Released connections go back to the idle list until it holds
//! `max_connections_free` entries; surplus and closed connections are closed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dbsource_core::{ConnectionSource, DatabaseConnection, DatabaseOptions, SqlError, SqlResult};

/// Credentials passed to a driver on connect.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Factory for physical connections, one per backend protocol.
pub trait Driver: Send + Sync {
    /// Short backend identifier, reported as the source's database type.
    fn name(&self) -> &str;

    /// Whether this driver handles `url`.
    fn accepts(&self, url: &str) -> bool;

    /// Establish a new connection.
    fn connect(&self, url: &str, credentials: &Credentials)
    -> SqlResult<Box<dyn DatabaseConnection>>;
}

/// Ordered set of drivers; the first one accepting a URL wins.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: Vec<Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: add a driver.
    pub fn with_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.register(driver);
        self
    }

    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.push(driver);
    }

    /// Find the driver for `url`.
    pub fn find(&self, url: &str) -> SqlResult<Arc<dyn Driver>> {
        self.drivers
            .iter()
            .find(|d| d.accepts(url))
            .cloned()
            .ok_or_else(|| SqlError::NoDriver(url.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.drivers.iter().map(|d| d.name().to_string()).collect()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

/// Pool tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolOptions {
    /// Idle connections kept for reuse (default: 5).
    pub max_connections_free: usize,
    /// Idle connections older than this are closed instead of reused.
    pub idle_timeout: Option<Duration>,
    /// Ping idle connections before handing them out (default: false).
    pub test_before_get: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections_free: 5,
            idle_timeout: None,
            test_before_get: false,
        }
    }
}

impl From<&DatabaseOptions> for PoolOptions {
    fn from(options: &DatabaseOptions) -> Self {
        Self {
            max_connections_free: options.max_connections_free,
            idle_timeout: options.idle_timeout_ms.map(Duration::from_millis),
            test_before_get: options.test_before_get,
        }
    }
}

/// Pool-level statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections opened and not yet closed (in use + idle).
    pub open: usize,
    /// Connections handed out and not yet released.
    pub in_use: usize,
    /// Connections waiting in the idle list.
    pub idle: usize,
}

#[derive(Debug)]
struct IdleConnection {
    connection: Box<dyn DatabaseConnection>,
    idle_since: Instant,
}

/// Connection source pooling connections for one driver URL.
pub struct PooledConnectionSource {
    url: String,
    credentials: Credentials,
    driver: Arc<dyn Driver>,
    options: PoolOptions,
    idle: Mutex<Vec<IdleConnection>>,
    special: Mutex<Option<Box<dyn DatabaseConnection>>>,
    open_count: AtomicUsize,
    in_use: AtomicUsize,
    open: AtomicBool,
}

impl PooledConnectionSource {
    pub fn new(
        url: &str,
        credentials: Credentials,
        driver: Arc<dyn Driver>,
        options: PoolOptions,
    ) -> Self {
        Self {
            url: url.to_string(),
            credentials,
            driver,
            options,
            idle: Mutex::new(Vec::new()),
            special: Mutex::new(None),
            open_count: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
            open: AtomicBool::new(true),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Open one connection and put it straight into the idle list.
    ///
    /// Used to validate the URL and credentials while a source is built.
    pub fn initialize(&self) -> SqlResult<()> {
        let connection = self.checkout()?;
        self.checkin(connection)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            open: self.open_count.load(Ordering::Acquire),
            in_use: self.in_use.load(Ordering::Acquire),
            idle: self.lock_idle().len(),
        }
    }

    /// Close idle connections that exceeded the idle timeout. Returns the
    /// number of connections closed.
    pub fn reap_idle(&self) -> usize {
        let Some(idle_timeout) = self.options.idle_timeout else {
            return 0;
        };
        let expired: Vec<IdleConnection> = {
            let mut idle = self.lock_idle();
            let (expired, keep) = idle
                .drain(..)
                .partition(|c| c.idle_since.elapsed() >= idle_timeout);
            *idle = keep;
            expired
        };
        let reaped = expired.len();
        for c in expired {
            self.discard(c.connection);
        }
        if reaped > 0 {
            tracing::info!(url = %self.url, reaped, "reaped idle connections");
        }
        reaped
    }

    /// Log pool statistics at `tracing::info` level.
    pub fn log_stats(&self) {
        let stats = self.stats();
        tracing::info!(
            url = %self.url,
            open = stats.open,
            in_use = stats.in_use,
            idle = stats.idle,
            "pool statistics"
        );
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<IdleConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_special(&self) -> std::sync::MutexGuard<'_, Option<Box<dyn DatabaseConnection>>> {
        self.special.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn checkout(&self) -> SqlResult<Box<dyn DatabaseConnection>> {
        if !self.is_open() {
            return Err(SqlError::Closed(format!("connection source for {}", self.url)));
        }

        loop {
            let candidate = self.lock_idle().pop();
            let Some(mut candidate) = candidate else {
                break;
            };
            if self
                .options
                .idle_timeout
                .is_some_and(|timeout| candidate.idle_since.elapsed() >= timeout)
            {
                tracing::debug!(url = %self.url, "discarded expired idle connection");
                self.discard(candidate.connection);
                continue;
            }
            if self.options.test_before_get && !candidate.connection.ping() {
                tracing::debug!(url = %self.url, "discarded unhealthy idle connection");
                self.discard(candidate.connection);
                continue;
            }
            self.in_use.fetch_add(1, Ordering::AcqRel);
            tracing::debug!(url = %self.url, "reused idle connection from pool");
            return Ok(candidate.connection);
        }

        let connection = self.driver.connect(&self.url, &self.credentials)?;
        self.open_count.fetch_add(1, Ordering::AcqRel);
        self.in_use.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(url = %self.url, driver = self.driver.name(), "created new connection");
        Ok(connection)
    }

    fn checkin(&self, connection: Box<dyn DatabaseConnection>) -> SqlResult<()> {
        saturating_decrement(&self.in_use);

        if !self.is_open() || connection.is_closed() {
            self.discard(connection);
            return Ok(());
        }

        let mut idle = self.lock_idle();
        if idle.len() >= self.options.max_connections_free {
            drop(idle);
            tracing::debug!(url = %self.url, "idle list full, closing connection");
            return self.close_connection(connection);
        }
        idle.push(IdleConnection {
            connection,
            idle_since: Instant::now(),
        });
        tracing::debug!(url = %self.url, idle_count = idle.len(), "returned connection to pool");
        Ok(())
    }

    /// Close a connection the pool no longer tracks, ignoring close errors.
    fn discard(&self, connection: Box<dyn DatabaseConnection>) {
        if let Err(e) = self.close_connection(connection) {
            tracing::debug!(url = %self.url, error = %e, "error closing discarded connection");
        }
    }

    fn close_connection(&self, mut connection: Box<dyn DatabaseConnection>) -> SqlResult<()> {
        saturating_decrement(&self.open_count);
        if connection.is_closed() {
            return Ok(());
        }
        connection.close()
    }
}

fn saturating_decrement(counter: &AtomicUsize) {
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
}

impl ConnectionSource for PooledConnectionSource {
    fn read_only_connection(&self, _table: Option<&str>) -> SqlResult<Box<dyn DatabaseConnection>> {
        self.checkout()
    }

    fn read_write_connection(
        &self,
        _table: Option<&str>,
    ) -> SqlResult<Box<dyn DatabaseConnection>> {
        self.checkout()
    }

    fn special_connection(&self, _table: Option<&str>) -> Option<Box<dyn DatabaseConnection>> {
        self.lock_special().take()
    }

    fn save_special_connection(
        &self,
        connection: Box<dyn DatabaseConnection>,
    ) -> Option<Box<dyn DatabaseConnection>> {
        self.lock_special().replace(connection)
    }

    fn release_connection(&self, connection: Box<dyn DatabaseConnection>) -> SqlResult<()> {
        self.checkin(connection)
    }

    /// Close every idle connection and the saved special connection, and
    /// stop handing out new ones. Connections still in use are closed when
    /// they are released. Idempotent.
    fn close(&self) -> SqlResult<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let mut to_close: Vec<Box<dyn DatabaseConnection>> =
            self.lock_idle().drain(..).map(|c| c.connection).collect();
        if let Some(special) = self.lock_special().take() {
            saturating_decrement(&self.in_use);
            to_close.push(special);
        }

        let closed = to_close.len();
        let mut first_error = None;
        for connection in to_close {
            if let Err(e) = self.close_connection(connection) {
                tracing::warn!(url = %self.url, error = %e, "error closing pooled connection");
                first_error.get_or_insert(e);
            }
        }

        tracing::info!(url = %self.url, closed, "connection pool closed");
        first_error.map_or(Ok(()), Err)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn database_type(&self) -> &str {
        self.driver.name()
    }
}

impl std::fmt::Debug for PooledConnectionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnectionSource")
            .field("url", &self.url)
            .field("options", &self.options)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
