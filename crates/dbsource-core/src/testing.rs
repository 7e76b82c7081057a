//! Mock connections and sources shared by the unit tests of this crate.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::connection::{ConnectionSource, DatabaseConnection};
use crate::error::{SqlError, SqlResult};

#[derive(Debug)]
pub struct MockConnection {
    closed: Arc<AtomicBool>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl DatabaseConnection for MockConnection {
    fn execute(&mut self, statement: &str) -> SqlResult<u64> {
        if statement.starts_with("fail") {
            return Err(SqlError::Statement(statement.to_string()));
        }
        Ok(1)
    }

    fn ping(&mut self) -> bool {
        !self.closed.load(Ordering::Relaxed)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn close(&mut self) -> SqlResult<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// A source that records how often it issued and took back connections.
#[derive(Default)]
pub struct MockSource {
    pub issued: AtomicU64,
    pub released: AtomicU64,
    pub released_handles: AtomicU64,
    pub should_fail: AtomicBool,
    pub closed: AtomicBool,
    special: Mutex<Option<Box<dyn DatabaseConnection>>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&self) -> SqlResult<Box<dyn DatabaseConnection>> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(SqlError::Connect {
                url: "mock:".to_string(),
                message: "connection refused".to_string(),
            });
        }
        self.issued.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockConnection::new()))
    }
}

impl ConnectionSource for MockSource {
    fn read_only_connection(&self, _table: Option<&str>) -> SqlResult<Box<dyn DatabaseConnection>> {
        self.issue()
    }

    fn read_write_connection(
        &self,
        _table: Option<&str>,
    ) -> SqlResult<Box<dyn DatabaseConnection>> {
        self.issue()
    }

    fn special_connection(&self, _table: Option<&str>) -> Option<Box<dyn DatabaseConnection>> {
        self.special.lock().unwrap().take()
    }

    fn save_special_connection(
        &self,
        connection: Box<dyn DatabaseConnection>,
    ) -> Option<Box<dyn DatabaseConnection>> {
        self.special.lock().unwrap().replace(connection)
    }

    fn release_connection(&self, mut connection: Box<dyn DatabaseConnection>) -> SqlResult<()> {
        if connection.as_handle_mut().is_some() {
            self.released_handles.fetch_add(1, Ordering::Relaxed);
        }
        self.released.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) -> SqlResult<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Relaxed)
    }

    fn database_type(&self) -> &str {
        "mock"
    }
}
