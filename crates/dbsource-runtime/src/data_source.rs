//! Shared data sources owned outside the factory.
//!
//! A database configured with `data_source = "<name>"` borrows the source
//! registered here under `<name>` instead of building its own pool. Each
//! borrow is a [`BorrowedDataSource`]: closing it ends that borrow only. The
//! shared source is closed and removed when its last borrower is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use dbsource_core::{ConnectionSource, DatabaseConnection, SqlError, SqlResult};
use tracing::debug;

struct Entry {
    source: Arc<dyn ConnectionSource>,
    borrowers: usize,
}

/// Name → externally supplied connection source.
#[derive(Default)]
pub struct DataSourceStorage {
    sources: RwLock<HashMap<String, Entry>>,
}

impl DataSourceStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared source, returning the one it replaces.
    ///
    /// Borrowers of a replaced source keep using it; their releases no
    /// longer affect this name.
    pub fn register(
        &self,
        name: &str,
        source: Arc<dyn ConnectionSource>,
    ) -> Option<Arc<dyn ConnectionSource>> {
        debug!(data_source = %name, "data source registered");
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                name.to_string(),
                Entry {
                    source,
                    borrowers: 0,
                },
            )
            .map(|entry| entry.source)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ConnectionSource>> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|entry| Arc::clone(&entry.source))
    }

    /// Borrow the source registered under `name`.
    pub fn acquire(&self, name: &str) -> Option<Arc<BorrowedDataSource>> {
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        let entry = sources.get_mut(name)?;
        entry.borrowers += 1;
        debug!(data_source = %name, borrowers = entry.borrowers, "data source borrowed");
        Some(Arc::new(BorrowedDataSource {
            name: name.to_string(),
            shared: Arc::clone(&entry.source),
            closed: AtomicBool::new(false),
        }))
    }

    /// End `borrowed`. The last release closes the shared source and removes
    /// it from the storage.
    ///
    /// Returns `true` if the shared source was released.
    pub fn release(&self, borrowed: &BorrowedDataSource) -> SqlResult<bool> {
        let removed = {
            let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = sources
                .get_mut(&borrowed.name)
                .filter(|entry| Arc::ptr_eq(&entry.source, &borrowed.shared))
            else {
                return Ok(false);
            };
            entry.borrowers = entry.borrowers.saturating_sub(1);
            if entry.borrowers > 0 {
                debug!(
                    data_source = %borrowed.name,
                    borrowers = entry.borrowers,
                    "data source borrow ended"
                );
                return Ok(false);
            }
            sources.remove(&borrowed.name)
        };
        if let Some(entry) = removed {
            if entry.source.is_open() {
                entry.source.close()?;
            }
        }
        debug!(data_source = %borrowed.name, "data source released");
        Ok(true)
    }

    /// Number of live borrows of `name`.
    pub fn borrowers(&self, name: &str) -> usize {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map_or(0, |entry| entry.borrowers)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.sources.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for DataSourceStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceStorage")
            .field("names", &self.names())
            .finish()
    }
}

/// One borrower's view of a shared source.
///
/// Checkouts and releases go to the shared source. `close` only stops this
/// borrower from checking out; the shared source stays open for the others.
pub struct BorrowedDataSource {
    name: String,
    shared: Arc<dyn ConnectionSource>,
    closed: AtomicBool,
}

impl BorrowedDataSource {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn ensure_open(&self) -> SqlResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SqlError::Closed(format!("data source '{}'", self.name)));
        }
        Ok(())
    }
}

impl ConnectionSource for BorrowedDataSource {
    fn read_only_connection(&self, table: Option<&str>) -> SqlResult<Box<dyn DatabaseConnection>> {
        self.ensure_open()?;
        self.shared.read_only_connection(table)
    }

    fn read_write_connection(
        &self,
        table: Option<&str>,
    ) -> SqlResult<Box<dyn DatabaseConnection>> {
        self.ensure_open()?;
        self.shared.read_write_connection(table)
    }

    fn special_connection(&self, table: Option<&str>) -> Option<Box<dyn DatabaseConnection>> {
        self.ensure_open().ok()?;
        self.shared.special_connection(table)
    }

    fn save_special_connection(
        &self,
        connection: Box<dyn DatabaseConnection>,
    ) -> Option<Box<dyn DatabaseConnection>> {
        self.shared.save_special_connection(connection)
    }

    fn release_connection(&self, connection: Box<dyn DatabaseConnection>) -> SqlResult<()> {
        self.shared.release_connection(connection)
    }

    fn close(&self) -> SqlResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.shared.is_open()
    }

    fn database_type(&self) -> &str {
        self.shared.database_type()
    }
}

impl std::fmt::Debug for BorrowedDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BorrowedDataSource")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Credentials, Driver, PoolOptions, PooledConnectionSource};

    struct RefusingDriver;

    impl Driver for RefusingDriver {
        fn name(&self) -> &str {
            "refusing"
        }

        fn accepts(&self, _url: &str) -> bool {
            true
        }

        fn connect(
            &self,
            url: &str,
            _credentials: &Credentials,
        ) -> SqlResult<Box<dyn DatabaseConnection>> {
            Err(SqlError::Connect {
                url: url.to_string(),
                message: "refused".to_string(),
            })
        }
    }

    fn shared() -> Arc<dyn ConnectionSource> {
        Arc::new(PooledConnectionSource::new(
            "any:db",
            Credentials::default(),
            Arc::new(RefusingDriver),
            PoolOptions::default(),
        ))
    }

    #[test]
    fn register_and_get() {
        let storage = DataSourceStorage::new();
        assert!(storage.register("warehouse", shared()).is_none());
        assert!(storage.get("warehouse").is_some());
        assert!(storage.get("missing").is_none());
        assert_eq!(storage.names(), vec!["warehouse"]);
    }

    #[test]
    fn register_replaces_previous() {
        let storage = DataSourceStorage::new();
        storage.register("warehouse", shared());
        assert!(storage.register("warehouse", shared()).is_some());
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn last_release_closes_and_removes() {
        let storage = DataSourceStorage::new();
        let source = shared();
        storage.register("warehouse", source.clone());
        let borrowed = storage.acquire("warehouse").unwrap();

        assert!(storage.release(&borrowed).unwrap());
        assert!(!source.is_open());
        assert!(storage.is_empty());
        assert!(!storage.release(&borrowed).unwrap());
    }

    #[test]
    fn shared_source_outlives_earlier_borrowers() {
        let storage = DataSourceStorage::new();
        let source = shared();
        storage.register("warehouse", source.clone());
        let first = storage.acquire("warehouse").unwrap();
        let second = storage.acquire("warehouse").unwrap();
        assert_eq!(storage.borrowers("warehouse"), 2);

        first.close().unwrap();
        assert!(!storage.release(&first).unwrap());
        assert!(!first.is_open());
        assert!(second.is_open());
        assert!(source.is_open());
        assert_eq!(storage.borrowers("warehouse"), 1);

        assert!(storage.release(&second).unwrap());
        assert!(!source.is_open());
        assert!(storage.is_empty());
    }

    #[test]
    fn closed_borrow_refuses_checkouts() {
        let storage = DataSourceStorage::new();
        storage.register("warehouse", shared());
        let borrowed = storage.acquire("warehouse").unwrap();
        borrowed.close().unwrap();
        assert!(matches!(
            borrowed.read_write_connection(None),
            Err(SqlError::Closed(_))
        ));
    }

    #[test]
    fn release_after_replacement_leaves_new_source_alone() {
        let storage = DataSourceStorage::new();
        storage.register("warehouse", shared());
        let borrowed = storage.acquire("warehouse").unwrap();
        let replacement = shared();
        storage.register("warehouse", replacement.clone());

        assert!(!storage.release(&borrowed).unwrap());
        assert!(replacement.is_open());
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn acquire_of_unknown_name_is_none() {
        let storage = DataSourceStorage::new();
        assert!(storage.acquire("missing").is_none());
        assert_eq!(storage.borrowers("missing"), 0);
    }
}
