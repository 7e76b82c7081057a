//! dbsource-core: connection-source building blocks.
//!
//! - **connection**: the [`DatabaseConnection`] and [`ConnectionSource`] traits
//! - **handle**: [`ConnectionHandle`] and the [`LiveConnections`] counter
//! - **recording**: [`RecordingConnectionSource`], the counting decorator
//! - **config**: TOML configuration tree, per-database narrowing, typed options
//! - **error**: driver-level and lifecycle-level error types

pub mod config;
pub mod connection;
pub mod error;
pub mod handle;
pub mod recording;

#[cfg(test)]
mod testing;

pub use config::{ConfigMap, ConfigTree, DatabaseOptions, KEY_DEFAULT};
pub use connection::{ConnectionSource, DatabaseConnection};
pub use error::{ConnectionSourceError, SourceResult, SqlError, SqlResult};
pub use handle::{ConnectionHandle, LiveConnections};
pub use recording::RecordingConnectionSource;
