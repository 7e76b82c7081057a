//! Lifecycle events published by the factory.
//!
//! Every create publishes `ConnectStart` and, on success, `ConnectEnd`.
//! Every destroy publishes `DisconnectStart` and `DisconnectEnd`, even if a
//! step in between failed. Listeners run synchronously on the calling
//! thread, in subscription order.

use std::sync::{Arc, PoisonError, RwLock};

use dbsource_core::{ConfigMap, ConnectionSource};
use tracing::debug;

#[derive(Debug, Clone)]
pub enum ConnectionSourceEvent {
    ConnectStart {
        name: String,
        config: ConfigMap,
    },
    ConnectEnd {
        name: String,
        config: ConfigMap,
        source: Arc<dyn ConnectionSource>,
    },
    DisconnectStart {
        name: String,
        config: ConfigMap,
        source: Arc<dyn ConnectionSource>,
    },
    DisconnectEnd {
        name: String,
        config: ConfigMap,
    },
}

impl ConnectionSourceEvent {
    /// Database the event is about.
    pub fn name(&self) -> &str {
        match self {
            Self::ConnectStart { name, .. }
            | Self::ConnectEnd { name, .. }
            | Self::DisconnectStart { name, .. }
            | Self::DisconnectEnd { name, .. } => name,
        }
    }

    pub fn config(&self) -> &ConfigMap {
        match self {
            Self::ConnectStart { config, .. }
            | Self::ConnectEnd { config, .. }
            | Self::DisconnectStart { config, .. }
            | Self::DisconnectEnd { config, .. } => config,
        }
    }

    /// The source, for the events that carry one.
    pub fn source(&self) -> Option<&Arc<dyn ConnectionSource>> {
        match self {
            Self::ConnectEnd { source, .. } | Self::DisconnectStart { source, .. } => Some(source),
            Self::ConnectStart { .. } | Self::DisconnectEnd { .. } => None,
        }
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectStart { .. } => "connect_start",
            Self::ConnectEnd { .. } => "connect_end",
            Self::DisconnectStart { .. } => "disconnect_start",
            Self::DisconnectEnd { .. } => "disconnect_end",
        }
    }
}

/// Destination for lifecycle events.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: &ConnectionSourceEvent);
}

/// Callback invoked for every published event.
pub type EventListener = Arc<dyn Fn(&ConnectionSourceEvent) + Send + Sync>;

/// [`EventBus`] fanning events out to subscribed callbacks.
#[derive(Default)]
pub struct EventListeners {
    listeners: RwLock<Vec<EventListener>>,
}

impl EventListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: EventListener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventBus for EventListeners {
    fn publish(&self, event: &ConnectionSourceEvent) {
        debug!(database = %event.name(), event = event.kind(), "publishing lifecycle event");
        // Snapshot so a listener may subscribe without deadlocking.
        let listeners: Vec<EventListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(event);
        }
    }
}

impl std::fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListeners")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn start(name: &str) -> ConnectionSourceEvent {
        ConnectionSourceEvent::ConnectStart {
            name: name.to_string(),
            config: ConfigMap::new(),
        }
    }

    #[test]
    fn accessors() {
        let event = start("reports");
        assert_eq!(event.name(), "reports");
        assert_eq!(event.kind(), "connect_start");
        assert!(event.config().is_empty());
        assert!(event.source().is_none());
    }

    #[test]
    fn listeners_run_in_subscription_order() {
        let bus = EventListeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(Arc::new(move |event: &ConnectionSourceEvent| {
                seen.lock().unwrap().push(format!("{tag}:{}", event.name()));
            }));
        }

        bus.publish(&start("default"));
        assert_eq!(*seen.lock().unwrap(), vec!["first:default", "second:default"]);
        assert_eq!(bus.len(), 2);
    }

    #[test]
    fn publish_without_listeners_is_a_noop() {
        let bus = EventListeners::new();
        assert!(bus.is_empty());
        bus.publish(&start("default"));
    }

    #[test]
    fn listener_may_subscribe_during_publish() {
        let bus = Arc::new(EventListeners::new());
        let inner = Arc::clone(&bus);
        bus.subscribe(Arc::new(move |_: &ConnectionSourceEvent| {
            inner.subscribe(Arc::new(|_: &ConnectionSourceEvent| {}));
        }));
        bus.publish(&start("default"));
        assert_eq!(bus.len(), 2);
    }
}
