//! Error types for connection sources.

use thiserror::Error;

/// Result type alias for driver-level operations.
pub type SqlResult<T> = Result<T, SqlError>;

/// Result type alias for connection-source lifecycle operations.
pub type SourceResult<T> = Result<T, ConnectionSourceError>;

/// Low-level failure reported by a driver, a pool, or a connection.
#[derive(Debug, Error)]
pub enum SqlError {
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} is closed")]
    Closed(String),

    #[error("no driver accepts url '{0}'")]
    NoDriver(String),

    #[error("statement failed: {0}")]
    Statement(String),

    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by the factory, the handler and the lifecycle.
#[derive(Debug, Error)]
pub enum ConnectionSourceError {
    #[error("argument 'databaseName' must not be blank")]
    BlankName,

    #[error("configuration for {database}.{key} is invalid: {message}")]
    Config {
        database: String,
        key: String,
        message: String,
    },

    #[error("an error occurred when executing a statement on database '{database}'")]
    Sql {
        database: String,
        #[source]
        source: SqlError,
    },

    #[error("bootstrap hook failed for database '{database}': {message}")]
    Hook { database: String, message: String },

    #[error("monitoring failed for database '{database}': {message}")]
    Metrics { database: String, message: String },
}

impl ConnectionSourceError {
    /// Build a configuration error for `database.key`.
    pub fn config(database: &str, key: &str, message: impl Into<String>) -> Self {
        Self::Config {
            database: database.to_string(),
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Wrap a driver failure with the database it happened on.
    pub fn sql(database: &str, source: SqlError) -> Self {
        Self::Sql {
            database: database.to_string(),
            source,
        }
    }

    /// The database this error refers to, if any.
    pub fn database(&self) -> Option<&str> {
        match self {
            Self::BlankName => None,
            Self::Config { database, .. }
            | Self::Sql { database, .. }
            | Self::Hook { database, .. }
            | Self::Metrics { database, .. } => Some(database),
        }
    }
}

/// Reject blank database names.
pub fn require_non_blank(name: &str) -> SourceResult<&str> {
    if name.trim().is_empty() {
        return Err(ConnectionSourceError::BlankName);
    }
    Ok(name)
}
