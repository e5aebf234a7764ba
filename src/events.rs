// src/events.rs - Typed synchronous event fan-out
//
// Delivery is synchronous and at-most-once per listener: publish() calls every
// listener registered at the moment of dispatch. Listeners added afterwards do
// not see earlier events, so consumers subscribe before the triggering action
// can happen and re-derive state from storage rather than from payloads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::channel::{self, Receiver};
use parking_lot::RwLock;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct BusInner<T> {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(u64, Listener<T>)>>,
}

pub struct EventBus<T> {
    inner: Arc<BusInner<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new() -> Self {
        EventBus {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(1),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a callback. The listener stays registered until the returned
    /// `Subscription` is dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().push((id, Arc::new(listener)));

        let weak: Weak<BusInner<T>> = Arc::downgrade(&self.inner);
        Subscription {
            id,
            unsubscribe: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.listeners.write().retain(|(lid, _)| *lid != id);
                }
            })),
        }
    }

    /// Register a channel-backed listener, for consumers that poll.
    pub fn subscribe_channel(&self) -> (Subscription, Receiver<T>) {
        let (tx, rx) = channel::unbounded();
        let subscription = self.subscribe(move |event: &T| {
            // receiver gone means the consumer is being torn down
            let _ = tx.send(event.clone());
        });
        (subscription, rx)
    }

    /// Deliver `event` to every current listener. Returns how many were called.
    pub fn publish(&self, event: &T) -> usize {
        // snapshot so listeners may subscribe/unsubscribe while being called
        let listeners: Vec<Listener<T>> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in &listeners {
            listener(event);
        }

        listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }
}

/// Handle for a registered listener; dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Keep the listener registered for the lifetime of the bus.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_publish_reaches_current_listeners_once() {
        let bus: EventBus<String> = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        let _sub = bus.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.publish(&"a".to_string()), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let bus: EventBus<u32> = EventBus::new();
        bus.publish(&1);

        let (_sub, rx) = bus.subscribe_channel();
        bus.publish(&2);

        let received: Vec<u32> = rx.try_iter().collect();
        assert_eq!(received, vec![2]);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let bus: EventBus<u32> = EventBus::new();
        let sub = bus.subscribe(|_| {});
        assert_eq!(bus.listener_count(), 1);

        drop(sub);
        assert_eq!(bus.listener_count(), 0);
        assert_eq!(bus.publish(&7), 0);
    }

    #[test]
    fn test_detached_listener_stays() {
        let bus: EventBus<u32> = EventBus::new();
        bus.subscribe(|_| {}).detach();
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn test_listener_may_subscribe_during_publish() {
        let bus: EventBus<u32> = EventBus::new();
        let inner_bus = bus.clone();
        let _sub = bus.subscribe(move |_| {
            inner_bus.subscribe(|_| {}).detach();
        });

        bus.publish(&1);
        assert_eq!(bus.listener_count(), 2);
    }
}
