//! Listener fan-out with stable unsubscribe handles.
//!
//! Every event stream in Sonoshade (analysis frames, generation progress,
//! orchestrator state) is an explicit set of registered callbacks. Delivery is
//! synchronous and follows registration order, so the order in which a producer
//! emits is exactly the order every listener observes.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Table<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// A registry of callbacks for one event stream.
pub struct Listeners<T> {
    table: Arc<Mutex<Table<T>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Listeners<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(Table {
                next_id: 1,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a callback. The returned handle removes it again.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut table = self.table.lock();
            let id = table.next_id;
            table.next_id += 1;
            table.entries.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Table<T>>> = Arc::downgrade(&self.table);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(table) = weak.upgrade() {
                    table.lock().entries.retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    /// Deliver `event` to every listener in registration order.
    ///
    /// The table lock is released before callbacks run, so a callback may
    /// subscribe or unsubscribe without deadlocking.
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<Callback<T>> = self
            .table
            .lock()
            .entries
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for callback in snapshot {
            callback(event);
        }
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// True if nobody is listening
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every listener
    pub fn clear(&self) {
        self.table.lock().entries.clear();
    }
}

/// Handle returned by [`Listeners::subscribe`].
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[must_use = "keep the handle to be able to unsubscribe"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Unregister the listener. Safe to call after the registry is gone.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
