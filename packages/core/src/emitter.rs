//! Publish/subscribe primitive keyed by event channel.
//!
//! Listeners are plain closures registered under a channel key. Delivery
//! is synchronous: [`EventEmitter::emit`] snapshots the listeners of a
//! channel under the lock, releases it, and then invokes each one. A
//! listener may therefore register, remove, or emit from inside its own
//! invocation without deadlocking.
//!
//! A panicking listener is caught and logged; the remaining listeners
//! still receive the event and the caller of `emit` never sees the panic.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared listener callback.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Identity of one registration, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Build an id from a backend-assigned number.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

struct Entry<T> {
    id: ListenerId,
    once: bool,
    listener: Listener<T>,
}

struct Registry<K, T> {
    next_id: u64,
    channels: HashMap<K, Vec<Entry<T>>>,
}

/// Synchronous event emitter with durable and one-shot listeners.
pub struct EventEmitter<K, T> {
    registry: Mutex<Registry<K, T>>,
}

impl<K, T> EventEmitter<K, T>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                next_id: 0,
                channels: HashMap::new(),
            }),
        }
    }

    /// Register a listener that stays until removed.
    pub fn on<F>(&self, channel: K, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.register(channel, Arc::new(listener), false)
    }

    /// Register a listener that is invoked for at most one event.
    pub fn once<F>(&self, channel: K, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.register(channel, Arc::new(listener), true)
    }

    /// Register an already shared listener.
    pub fn on_shared(&self, channel: K, listener: Listener<T>) -> ListenerId {
        self.register(channel, listener, false)
    }

    /// Remove one registration. Unknown ids are ignored.
    pub fn off(&self, channel: &K, id: ListenerId) {
        let mut registry = self.lock();
        if let Some(entries) = registry.channels.get_mut(channel) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                registry.channels.remove(channel);
            }
        }
    }

    /// Deliver `payload` to every listener registered on `channel`.
    ///
    /// Returns the number of listeners that were invoked, including any
    /// that panicked.
    pub fn emit(&self, channel: &K, payload: &T) -> usize {
        let listeners = {
            let mut registry = self.lock();
            let Some(entries) = registry.channels.get_mut(channel) else {
                return 0;
            };
            let snapshot: Vec<Listener<T>> =
                entries.iter().map(|entry| entry.listener.clone()).collect();
            // One-shot listeners leave the registry before anyone is invoked,
            // so a concurrent emit can never deliver to them a second time.
            entries.retain(|entry| !entry.once);
            if entries.is_empty() {
                registry.channels.remove(channel);
            }
            snapshot
        };

        for listener in &listeners {
            invoke_isolated(listener.as_ref(), payload, channel);
        }
        listeners.len()
    }

    /// Remove every listener on `channel`, or on all channels when `None`.
    pub fn remove_all_listeners(&self, channel: Option<&K>) {
        let mut registry = self.lock();
        match channel {
            Some(channel) => {
                registry.channels.remove(channel);
            }
            None => registry.channels.clear(),
        }
    }

    /// Number of listeners currently registered on `channel`.
    pub fn listener_count(&self, channel: &K) -> usize {
        self.lock().channels.get(channel).map_or(0, Vec::len)
    }

    fn register(&self, channel: K, listener: Listener<T>, once: bool) -> ListenerId {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry
            .channels
            .entry(channel)
            .or_default()
            .push(Entry { id, once, listener });
        id
    }

    fn lock(&self) -> MutexGuard<'_, Registry<K, T>> {
        crate::lock_unpoisoned(&self.registry)
    }
}

impl<K, T> Default for EventEmitter<K, T>
where
    K: Eq + Hash + Clone + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Invoke `listener`, catching and logging a panic instead of unwinding.
///
/// Returns `false` when the listener panicked.
pub(crate) fn invoke_isolated<T: ?Sized>(
    listener: &(dyn Fn(&T) + Send + Sync),
    payload: &T,
    channel: &dyn Debug,
) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| listener(payload))) {
        Ok(()) => true,
        Err(panic) => {
            tracing::warn!(
                channel = ?channel,
                "Error in event listener: {}",
                panic_message(panic.as_ref())
            );
            false
        }
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
