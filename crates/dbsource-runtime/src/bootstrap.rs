//! Hooks run against every connection source the factory builds.

use std::sync::Arc;

use dbsource_core::ConnectionSource;

/// Per-source setup and teardown.
///
/// `init` runs after the source is built and before `ConnectEnd` is
/// published; `destroy` runs first thing after `DisconnectStart`. Hooks run
/// in registration order. A hook whose `init` succeeded always sees a
/// matching `destroy`, including when a later hook fails the create.
pub trait ConnectionSourceBootstrap: Send + Sync {
    fn init(&self, name: &str, source: &Arc<dyn ConnectionSource>) -> anyhow::Result<()>;

    fn destroy(&self, name: &str, source: &Arc<dyn ConnectionSource>) -> anyhow::Result<()>;
}
