//! Listener lists with explicit subscription tokens.
//!
//! A subscriber keeps the [`SubscriptionToken`] returned by
//! [`Listeners::subscribe`] and hands it back to [`Listeners::unsubscribe`]
//! when it is destroyed. Nothing is dropped implicitly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Proof of a subscription. Not `Clone`, so each subscription is released
/// at most once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A list of callbacks for events of type `E`.
pub struct Listeners<E> {
    next: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback<E>)>>,
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionToken
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, Arc::new(callback)));
        SubscriptionToken(id)
    }

    /// Returns false if the token was already released from this list.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subs = self.subscribers.lock();
        let before = subs.len();
        subs.retain(|(id, _)| *id != token.0);
        subs.len() != before
    }

    /// Deliver `event` to every current subscriber. Callbacks run without
    /// the list lock held, so they may subscribe or unsubscribe.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in snapshot {
            cb(event);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_reaches_all_subscribers() {
        let listeners: Listeners<u32> = Listeners::new();
        let total = Arc::new(AtomicU64::new(0));
        for _ in 0..3 {
            let total = Arc::clone(&total);
            let _ = listeners.subscribe(move |v| {
                total.fetch_add(*v as u64, Ordering::Relaxed);
            });
        }
        listeners.emit(&5);
        assert_eq!(total.load(Ordering::Relaxed), 15);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let listeners: Listeners<()> = Listeners::new();
        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);
        let token = listeners.subscribe(move |_| {
            h.fetch_add(1, Ordering::Relaxed);
        });
        listeners.emit(&());
        assert!(listeners.unsubscribe(token));
        listeners.emit(&());
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn unsubscribe_unknown_token_is_false() {
        let a: Listeners<()> = Listeners::new();
        let b: Listeners<()> = Listeners::new();
        let _keep = a.subscribe(|_| {});
        let token = b.subscribe(|_| {});
        let stray = SubscriptionToken(99);
        assert!(!a.unsubscribe(stray));
        assert!(b.unsubscribe(token));
    }

    #[test]
    fn callback_may_subscribe_during_emit() {
        let listeners: Arc<Listeners<()>> = Arc::new(Listeners::new());
        let inner = Arc::clone(&listeners);
        let _token = listeners.subscribe(move |_| {
            let _ = inner.subscribe(|_| {});
        });
        listeners.emit(&());
        assert_eq!(listeners.len(), 2);
    }
}
