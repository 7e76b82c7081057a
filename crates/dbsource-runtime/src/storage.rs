//! ConnectionSourceStorage: the registry of active connection sources.
//!
//! Maps a logical database name to the one source currently active for it.
//! Creation goes through [`ConnectionSourceStorage::get_or_try_insert_with`],
//! which double-checks under a per-name mutex so that concurrent first use
//! of a name builds exactly one source.
//!
//! # Concurrency
//!
//! Lookups take the read side of an `RwLock` and never wait on a source
//! being built. Builders and closers of the *same* name serialise on that
//! name's mutex; different names never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use dbsource_core::ConnectionSource;
use dbsource_metrics::{Monitor, Sample};
use tracing::debug;

/// Thread-safe name → source map.
#[derive(Default)]
pub struct ConnectionSourceStorage {
    sources: RwLock<HashMap<String, Arc<dyn ConnectionSource>>>,
    name_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConnectionSourceStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ConnectionSource>> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Store `source` under `name`, returning the source it replaces.
    pub fn set(
        &self,
        name: &str,
        source: Arc<dyn ConnectionSource>,
    ) -> Option<Arc<dyn ConnectionSource>> {
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), source)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn ConnectionSource>> {
        let removed = self
            .sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if removed.is_some() {
            debug!(database = %name, "connection source evicted");
        }
        removed
    }

    /// Registered names, sorted.
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

    /// Return the source for `name`, building and storing it with `create`
    /// if absent. Only one caller per name runs `create` at a time; the
    /// others wait and then see its result. A failed `create` stores nothing.
    pub fn get_or_try_insert_with<E>(
        &self,
        name: &str,
        create: impl FnOnce() -> Result<Arc<dyn ConnectionSource>, E>,
    ) -> Result<Arc<dyn ConnectionSource>, E> {
        if let Some(source) = self.get(name) {
            return Ok(source);
        }

        self.with_name_lock(name, || {
            if let Some(source) = self.get(name) {
                return Ok(source);
            }
            let source = create()?;
            self.set(name, Arc::clone(&source));
            debug!(database = %name, "connection source stored");
            Ok(source)
        })
    }

    /// Run `f` while holding the mutex for `name`.
    ///
    /// The mutex is dropped from the lock table once no caller holds or
    /// waits on it.
    pub fn with_name_lock<R>(&self, name: &str, f: impl FnOnce() -> R) -> R {
        let lock = Arc::clone(self.lock_table().entry(name.to_string()).or_default());
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut locks = self.lock_table();
        // Clones are only taken under the table lock: two owners means the
        // table and this call.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(name);
        }
        result
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.name_locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ConnectionSourceStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSourceStorage")
            .field("names", &self.names())
            .finish_non_exhaustive()
    }
}

/// Exposes which connection sources are active.
pub struct StorageMonitor {
    application: String,
    storage: Weak<ConnectionSourceStorage>,
}

impl StorageMonitor {
    pub fn new(application: &str, storage: &Arc<ConnectionSourceStorage>) -> Self {
        Self {
            application: application.to_string(),
            storage: Arc::downgrade(storage),
        }
    }
}

impl Monitor for StorageMonitor {
    fn object_name(&self) -> String {
        format!(
            "dbsource:type=ConnectionSourceStorage,application={}",
            self.application
        )
    }

    fn samples(&self) -> Vec<Sample> {
        let Some(storage) = self.storage.upgrade() else {
            return Vec::new();
        };
        let names = storage.names();
        let mut samples = vec![
            Sample::gauge(
                "dbsource_sources_active",
                "Connection sources currently registered.",
                names.len() as f64,
            )
            .with_label("application", &self.application),
        ];
        samples.extend(names.iter().map(|name| {
            Sample::gauge(
                "dbsource_source_registered",
                "Registered connection sources by name.",
                1.0,
            )
            .with_label("application", &self.application)
            .with_label("database", name)
        }));
        samples
    }
}
