//! Event infrastructure for revocable subscriptions.
//!
//! `EventBus<E>` fans an event out to every live subscriber. Realtime channels
//! use one to deliver incoming document snapshots; dropping the returned
//! `Subscription` revokes the handler so it never runs against a torn-down
//! session.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Something a `Subscription` can detach itself from.
pub trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: usize);
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or call `cancel`) to unsubscribe.
pub struct Subscription {
    bus: Weak<dyn Unsubscribe>,
    id: usize,
}

impl Subscription {
    /// Unsubscribe now. Equivalent to dropping the handle.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

type Callback<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Event bus for publishing events to subscribers.
///
/// Thread-safe. Wrap in `Arc` to enable subscriptions.
pub struct EventBus<E> {
    callbacks: RwLock<Vec<(usize, Callback<E>)>>,
    next_id: AtomicUsize,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl<E: Clone + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    ///
    /// Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(self: &Arc<Self>, callback: impl Fn(E) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));

        let bus: Weak<dyn Unsubscribe> = Arc::downgrade(self) as Weak<dyn Unsubscribe>;
        Subscription { bus, id }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: E) {
        // Clone the callback list so a callback may subscribe or unsubscribe.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl<E: 'static> Unsubscribe for EventBus<E> {
    fn unsubscribe(&self, id: usize) {
        // emit only holds the read lock while cloning the list, never while a callback runs.
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(i, _)| *i != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(Document) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        (count, move |_| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        })
    }

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let (count, cb) = counter();
        let _sub = bus.subscribe(cb);

        bus.emit(Document::persisted("doc1", "hello"));

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let (count, cb) = counter();

        {
            let _sub = bus.subscribe(cb);
            bus.emit(Document::new());
            assert_eq!(count.load(Ordering::Relaxed), 1);
        }

        bus.emit(Document::new());
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_cancel_is_partial() {
        let bus = Arc::new(EventBus::new());
        let (count1, cb1) = counter();
        let (count2, cb2) = counter();

        let sub1 = bus.subscribe(cb1);
        let _sub2 = bus.subscribe(cb2);

        bus.emit(Document::new());
        sub1.cancel();
        bus.emit(Document::new());

        assert_eq!(count1.load(Ordering::Relaxed), 1);
        assert_eq!(count2.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_subscription_outlives_bus() {
        let bus = Arc::new(EventBus::<Document>::new());
        let sub = bus.subscribe(|_| {});
        drop(bus);
        // Upgrade fails, drop is a no-op
        drop(sub);
    }

    #[test]
    fn test_callback_may_unsubscribe_during_emit() {
        let bus = Arc::new(EventBus::<Document>::new());
        let slot: Arc<std::sync::Mutex<Option<Subscription>>> = Arc::new(std::sync::Mutex::new(None));

        let slot_clone = Arc::clone(&slot);
        let sub = bus.subscribe(move |_| {
            slot_clone.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        bus.emit(Document::new());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_drop_during_concurrent_emit_always_unsubscribes() {
        use std::sync::atomic::AtomicBool;
        use std::thread;

        let bus = Arc::new(EventBus::<Document>::new());
        let stop = Arc::new(AtomicBool::new(false));

        let emitters: Vec<_> = (0..4)
            .map(|_| {
                let bus = Arc::clone(&bus);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        bus.emit(Document::new());
                    }
                })
            })
            .collect();

        for _ in 0..2000 {
            let sub = bus.subscribe(|_| {});
            drop(sub);
        }

        stop.store(true, Ordering::Relaxed);
        for emitter in emitters {
            emitter.join().unwrap();
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_callback_may_subscribe_during_emit() {
        let bus = Arc::new(EventBus::<Document>::new());
        let subs = Arc::new(std::sync::Mutex::new(Vec::new()));

        let bus_clone = Arc::clone(&bus);
        let subs_clone = Arc::clone(&subs);
        let _sub = bus.subscribe(move |_| {
            let inner = bus_clone.subscribe(|_| {});
            subs_clone.lock().unwrap().push(inner);
        });

        bus.emit(Document::new());
        assert_eq!(bus.subscriber_count(), 2);
    }
}
