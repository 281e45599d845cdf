// Event bus
//
// Fan-out of debuggee events to listeners. Publishing iterates over a snapshot
// of the listener list, so listeners may subscribe or unsubscribe (even from
// inside a callback) while an event is being delivered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listeners<E> {
    next_id: AtomicU64,
    entries: RwLock<Vec<(u64, Listener<E>)>>,
}

pub struct EventBus<E> {
    listeners: Arc<Listeners<E>>,
}

impl<E: 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Listeners {
                next_id: AtomicU64::new(1),
                entries: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a listener; it stays registered until the returned handle is dropped
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.listeners.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut entries) = self.listeners.entries.write() {
            entries.push((id, Arc::new(listener)));
        }

        let weak: Weak<Listeners<E>> = Arc::downgrade(&self.listeners);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(listeners) = weak.upgrade() {
                    if let Ok(mut entries) = listeners.entries.write() {
                        entries.retain(|(entry_id, _)| *entry_id != id);
                    }
                }
            })),
        }
    }

    pub fn publish(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = match self.listeners.entries.read() {
            Ok(entries) => entries.iter().map(|(_, l)| l.clone()).collect(),
            Err(_) => return,
        };

        for listener in snapshot {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}

impl<E: 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Unsubscribes when dropped
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// A group of subscriptions released together
#[derive(Debug, Default)]
pub struct SubscriptionBag {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    pub fn unsubscribe_all(&mut self) {
        self.subscriptions.clear();
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
