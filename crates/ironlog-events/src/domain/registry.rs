//! Subscriptions of handlers to event types.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::handler::EventHandler;

/// Which handlers receive which event types.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    subscriptions: HashMap<String, Vec<String>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `handler` to `event_type`. A handler may be subscribed to
    /// several types; subscribing it twice to one type has no effect.
    #[must_use]
    pub fn subscribe(mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        let name = handler.name().to_owned();
        let subscribers = self.subscriptions.entry(event_type.into()).or_default();
        if !subscribers.contains(&name) {
            subscribers.push(name.clone());
        }
        self.handlers.insert(name, handler);
        self
    }

    /// Handlers subscribed to `event_type`, in subscription order.
    #[must_use]
    pub fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        self.subscriptions
            .get(event_type)
            .into_iter()
            .flatten()
            .filter_map(|name| self.handlers.get(name).cloned())
            .collect()
    }

    /// Looks a handler up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(name).cloned()
    }
}
