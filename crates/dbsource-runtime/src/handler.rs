//! ConnectionSourceHandler: the entry point application code talks to.
//!
//! Resolves a database name to its active source, creating it on first use,
//! and runs caller code against it. Closing a name destroys its source and
//! evicts it; the next use creates a fresh one.

use std::sync::Arc;

use dbsource_core::error::require_non_blank;
use dbsource_core::{ConnectionSource, ConnectionSourceError, KEY_DEFAULT, SourceResult, SqlResult};
use tracing::debug;

use crate::factory::ConnectionSourceFactory;
use crate::storage::ConnectionSourceStorage;

#[derive(Debug)]
pub struct ConnectionSourceHandler {
    factory: Arc<ConnectionSourceFactory>,
    storage: Arc<ConnectionSourceStorage>,
}

impl ConnectionSourceHandler {
    pub fn new(
        factory: Arc<ConnectionSourceFactory>,
        storage: Arc<ConnectionSourceStorage>,
    ) -> Self {
        Self { factory, storage }
    }

    pub fn factory(&self) -> &Arc<ConnectionSourceFactory> {
        &self.factory
    }

    pub fn storage(&self) -> &Arc<ConnectionSourceStorage> {
        &self.storage
    }

    /// Run `callback` against the default database.
    pub fn with_connection_source<R>(
        &self,
        callback: impl FnOnce(&str, &Arc<dyn ConnectionSource>) -> SqlResult<R>,
    ) -> SourceResult<R> {
        self.with_connection_source_named(KEY_DEFAULT, callback)
    }

    /// Run `callback` against the source for `name`, creating it if needed.
    ///
    /// A driver error returned by the callback is reported as
    /// [`ConnectionSourceError::Sql`] naming the database.
    pub fn with_connection_source_named<R>(
        &self,
        name: &str,
        callback: impl FnOnce(&str, &Arc<dyn ConnectionSource>) -> SqlResult<R>,
    ) -> SourceResult<R> {
        let name = require_non_blank(name)?;
        let source = self.resolve(name)?;
        debug!(database = %name, "executing statements on database");
        callback(name, &source).map_err(|e| ConnectionSourceError::sql(name, e))
    }

    /// Destroy and evict the default database's source, if active.
    pub fn close_connection_source(&self) -> SourceResult<()> {
        self.close_connection_source_named(KEY_DEFAULT)
    }

    /// Destroy and evict the source for `name`. Closing a name with no
    /// active source does nothing.
    ///
    /// The source is evicted even when destroying it fails.
    pub fn close_connection_source_named(&self, name: &str) -> SourceResult<()> {
        let name = require_non_blank(name)?;
        self.storage.with_name_lock(name, || {
            let Some(source) = self.storage.get(name) else {
                return Ok(());
            };
            let result = self.factory.destroy(name, &source);
            self.storage.remove(name);
            result
        })
    }

    fn resolve(&self, name: &str) -> SourceResult<Arc<dyn ConnectionSource>> {
        self.storage
            .get_or_try_insert_with(name, || self.factory.create(name))
    }
}
