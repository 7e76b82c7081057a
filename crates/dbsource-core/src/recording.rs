//! RecordingConnectionSource: live-connection counting decorator.
//!
//! Wraps any [`ConnectionSource`] and hands out [`ConnectionHandle`]s instead
//! of raw connections. The count of handles not yet returned is exposed via
//! [`RecordingConnectionSource::connection_count`] for leak monitoring.
//!
//! # Release paths
//!
//! ```text
//! handle.close()                    → delegate closed, count - 1
//! source.release_connection(handle) → delegate released to inner, count - 1
//! both, in either order             → count - 1 (the second one is a no-op)
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::connection::{ConnectionSource, DatabaseConnection};
use crate::error::SqlResult;
use crate::handle::{ConnectionHandle, LiveConnections};

/// Decorator that counts connections checked out of the wrapped source.
pub struct RecordingConnectionSource {
    delegate: Arc<dyn ConnectionSource>,
    live: Arc<LiveConnections>,
}

impl RecordingConnectionSource {
    pub fn new(delegate: Arc<dyn ConnectionSource>) -> Self {
        Self {
            delegate,
            live: Arc::new(LiveConnections::new()),
        }
    }

    /// Connections issued and not yet closed or released.
    pub fn connection_count(&self) -> usize {
        self.live.get()
    }

    /// The undecorated source.
    pub fn delegate(&self) -> &Arc<dyn ConnectionSource> {
        &self.delegate
    }

    /// Wrap a freshly issued connection. Existing handles pass through
    /// uncounted so a connection is never counted twice.
    fn wrap(&self, mut connection: Box<dyn DatabaseConnection>) -> Box<dyn DatabaseConnection> {
        if connection.as_handle_mut().is_some() {
            return connection;
        }
        let handle = ConnectionHandle::link(connection, &self.live);
        debug!(live = self.live.get(), "connection issued");
        Box::new(handle)
    }
}

impl ConnectionSource for RecordingConnectionSource {
    fn read_only_connection(&self, table: Option<&str>) -> SqlResult<Box<dyn DatabaseConnection>> {
        let connection = self.delegate.read_only_connection(table)?;
        Ok(self.wrap(connection))
    }

    fn read_write_connection(
        &self,
        table: Option<&str>,
    ) -> SqlResult<Box<dyn DatabaseConnection>> {
        let connection = self.delegate.read_write_connection(table)?;
        Ok(self.wrap(connection))
    }

    fn special_connection(&self, table: Option<&str>) -> Option<Box<dyn DatabaseConnection>> {
        self.delegate
            .special_connection(table)
            .map(|connection| self.wrap(connection))
    }

    fn save_special_connection(
        &self,
        connection: Box<dyn DatabaseConnection>,
    ) -> Option<Box<dyn DatabaseConnection>> {
        self.delegate.save_special_connection(connection)
    }

    /// Hand handles back to the inner source as their undecorated delegate,
    /// so the inner source never sees a connection type it did not create.
    fn release_connection(&self, mut connection: Box<dyn DatabaseConnection>) -> SqlResult<()> {
        let Some(handle) = connection.as_handle_mut() else {
            return self.delegate.release_connection(connection);
        };

        let result = match handle.take_delegate() {
            Some(delegate) => self.delegate.release_connection(delegate),
            None => Ok(()),
        };
        handle.unlink();
        debug!(live = self.live.get(), "connection released");
        result
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
