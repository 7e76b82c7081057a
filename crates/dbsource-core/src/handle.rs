//! Connection handles and the live-connection counter they report to.
//!
//! Every connection issued by a [`RecordingConnectionSource`] is wrapped in a
//! [`ConnectionHandle`]. The handle keeps a non-owning back-reference to the
//! source's [`LiveConnections`] counter and decrements it exactly once,
//! whether the connection comes back through `close()` or through
//! `release_connection()`.
//!
//! [`RecordingConnectionSource`]: crate::recording::RecordingConnectionSource

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tracing::warn;

use crate::connection::DatabaseConnection;
use crate::error::{SqlError, SqlResult};

/// Number of connections currently checked out of one source.
#[derive(Debug, Default)]
pub struct LiveConnections {
    count: AtomicUsize,
}

impl LiveConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one issued connection. Returns the new count.
    pub fn increment(&self) -> usize {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Record one returned connection. Returns the new count.
    ///
    /// Never goes below zero; a decrement at zero is logged and ignored.
    pub fn decrement(&self) -> usize {
        match self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => {
                warn!("connection released more often than it was issued");
                0
            }
        }
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

/// A checked-out connection linked to the counter of the source that issued it.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// The undecorated connection. `None` once closed or handed back.
    delegate: Option<Box<dyn DatabaseConnection>>,
    /// Counter of the issuing source. Weak: the handle never keeps a source alive.
    owner: Weak<LiveConnections>,
    /// Cleared on the first decrement.
    linked: bool,
}

impl ConnectionHandle {
    /// Wrap `delegate` and count it against `owner`.
    pub fn link(delegate: Box<dyn DatabaseConnection>, owner: &Arc<LiveConnections>) -> Self {
        owner.increment();
        Self {
            delegate: Some(delegate),
            owner: Arc::downgrade(owner),
            linked: true,
        }
    }

    /// Decrement the owner's count without closing the delegate.
    ///
    /// Only the first call (or the first `close()`) decrements.
    pub fn unlink(&mut self) {
        if !self.linked {
            return;
        }
        self.linked = false;
        if let Some(owner) = self.owner.upgrade() {
            owner.decrement();
        }
    }

    /// Whether this handle still counts as a live connection.
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Hand back the undecorated connection, leaving the handle empty.
    pub fn take_delegate(&mut self) -> Option<Box<dyn DatabaseConnection>> {
        self.delegate.take()
    }

    fn delegate_mut(&mut self) -> SqlResult<&mut Box<dyn DatabaseConnection>> {
        match self.delegate.as_mut() {
            Some(delegate) if self.linked => Ok(delegate),
            _ => Err(SqlError::Closed("connection handle".to_string())),
        }
    }
}

impl DatabaseConnection for ConnectionHandle {
    fn execute(&mut self, statement: &str) -> SqlResult<u64> {
        self.delegate_mut()?.execute(statement)
    }

    fn ping(&mut self) -> bool {
        self.delegate_mut().is_ok_and(|d| d.ping())
    }

    fn is_closed(&self) -> bool {
        !self.linked || self.delegate.as_ref().is_none_or(|d| d.is_closed())
    }

    /// Close the delegate, then unlink. The count drops even if the
    /// delegate fails to close.
    ///
    /// The closed delegate stays in the handle so a later release can still
    /// hand it back to the pool that issued it.
    fn close(&mut self) -> SqlResult<()> {
        let result = match self.delegate.as_mut() {
            Some(delegate) if !delegate.is_closed() => delegate.close(),
            _ => Ok(()),
        };
        self.unlink();
        result
    }

    fn as_handle_mut(&mut self) -> Option<&mut ConnectionHandle> {
        Some(self)
    }
}
