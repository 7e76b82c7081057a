//! Connection and connection-source traits.
//!
//! These are the seams every decorator and every backend plugs into. A
//! [`ConnectionSource`] hands out boxed [`DatabaseConnection`]s and takes them
//! back through [`ConnectionSource::release_connection`].
//!
//! ```text
//! MonitoredConnectionSource          (optional, registers with a metrics sink)
//!   → RecordingConnectionSource      (live-connection counting)
//!     → PooledConnectionSource       (idle list + driver)
//!       → Box<dyn DatabaseConnection>
//! ```

use std::fmt;

use crate::error::SqlResult;
use crate::handle::ConnectionHandle;

/// One physical connection to a database.
pub trait DatabaseConnection: Send + fmt::Debug {
    /// Execute a statement, returning the number of affected rows.
    fn execute(&mut self, statement: &str) -> SqlResult<u64>;

    /// Health-check ping. Returns `true` if the connection is alive.
    fn ping(&mut self) -> bool;

    /// Whether the connection has been closed.
    fn is_closed(&self) -> bool;

    /// Close the underlying transport.
    fn close(&mut self) -> SqlResult<()>;

    /// The tracked handle behind this connection, if it is one.
    ///
    /// Only [`ConnectionHandle`] overrides this.
    fn as_handle_mut(&mut self) -> Option<&mut ConnectionHandle> {
        None
    }
}

/// A provider of pooled connections for one logical database.
///
/// `table` is a hint some backends use to route connections; pools that do
/// not care ignore it.
pub trait ConnectionSource: Send + Sync {
    /// Check out a connection for read-only work.
    fn read_only_connection(&self, table: Option<&str>) -> SqlResult<Box<dyn DatabaseConnection>>;

    /// Check out a connection for read-write work.
    fn read_write_connection(&self, table: Option<&str>) -> SqlResult<Box<dyn DatabaseConnection>>;

    /// Take the saved special (transaction-bound) connection, if any.
    fn special_connection(&self, table: Option<&str>) -> Option<Box<dyn DatabaseConnection>>;

    /// Park a checked-out connection as the special connection.
    ///
    /// A previously saved connection is handed back to the caller, who still
    /// owes the source a release for it.
    fn save_special_connection(
        &self,
        connection: Box<dyn DatabaseConnection>,
    ) -> Option<Box<dyn DatabaseConnection>>;

    /// Return a connection previously obtained from this source.
    fn release_connection(&self, connection: Box<dyn DatabaseConnection>) -> SqlResult<()>;

    /// Close the source and every idle connection it holds.
    fn close(&self) -> SqlResult<()>;

    /// Whether the source still accepts checkouts.
    fn is_open(&self) -> bool;

    /// Short backend identifier (e.g. the driver name).
    fn database_type(&self) -> &str;
}

impl fmt::Debug for dyn ConnectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSource")
            .field("database_type", &self.database_type())
            .field("open", &self.is_open())
            .finish()
    }
}
