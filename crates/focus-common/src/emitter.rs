//! Synchronous event emitter.
//!
//! Listener dispatch happens inline on the emitting thread so that the
//! order observed by every listener matches the order events were
//! produced. Callers that need async handling bounce the event onto
//! their own queue from inside the listener.

use std::sync::Arc;

use parking_lot::RwLock;

/// Registered listener callback for events of type `E`.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A synchronous multi-listener event emitter.
///
/// Listeners are registered under a name so they can be removed later.
/// `emit` invokes every listener inline, in registration order.
pub struct EventEmitter<E> {
    listeners: RwLock<Vec<(String, Listener<E>)>>,
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventEmitter<E> {
    pub fn new() -> Self {
        Self { listeners: RwLock::new(Vec::new()) }
    }

    /// Register a listener under `name`, replacing any previous listener
    /// with the same name.
    pub fn subscribe<F>(&self, name: &str, listener: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write();
        listeners.retain(|(n, _)| n != name);
        listeners.push((name.to_string(), Arc::new(listener)));
    }

    /// Remove the listener registered under `name`. Returns whether one
    /// was removed.
    pub fn unsubscribe(&self, name: &str) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(n, _)| n != name);
        listeners.len() != before
    }

    /// Dispatch `event` to every listener, synchronously and in
    /// registration order.
    pub fn emit(&self, event: &E) {
        let listeners: Vec<Listener<E>> =
            self.listeners.read().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl<E> std::fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
