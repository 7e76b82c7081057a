//! dbsource-runtime: connection-source lifecycle.
//!
//! # Architecture
//!
//! ```text
//! Lifecycle ── startup / shutdown
//!   └── ConnectionSourceHandler ── with_connection_source(name, callback)
//!         ├── ConnectionSourceStorage   name → active source
//!         └── ConnectionSourceFactory   create / destroy
//!               ├── DriverRegistry → PooledConnectionSource
//!               ├── DataSourceStorage (shared sources)
//!               ├── EventBus (ConnectStart … DisconnectEnd)
//!               ├── ConnectionSourceBootstrap hooks
//!               └── MetricsSink
//! ```
//!
//! A created source is `Monitored(Recording(Pooled | shared))`; the monitored
//! layer is skipped when `monitoring = false`.

pub mod bootstrap;
pub mod data_source;
pub mod events;
pub mod factory;
pub mod handler;
pub mod lifecycle;
pub mod pool;
pub mod storage;

pub use bootstrap::ConnectionSourceBootstrap;
pub use data_source::{BorrowedDataSource, DataSourceStorage};
pub use events::{ConnectionSourceEvent, EventBus, EventListener, EventListeners};
pub use factory::ConnectionSourceFactory;
pub use handler::ConnectionSourceHandler;
pub use lifecycle::Lifecycle;
pub use pool::{Credentials, Driver, DriverRegistry, PoolOptions, PoolStats, PooledConnectionSource};
pub use storage::{ConnectionSourceStorage, StorageMonitor};
