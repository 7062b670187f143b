//! Subscriptions
//!
//! A subscriber is a callback that receives the consolidated state and a
//! [`Context`] each time a notification burst is flushed. Global
//! subscribers hear every burst; key-filtered subscribers only hear bursts
//! whose notify list touches one of their keys.
//!
//! Callbacks always run outside the store lock, so they may write back to
//! the store. Such writes start a new burst rather than extending the one
//! being delivered.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::sync::oneshot;
use tracing::debug;

use super::engine::Inner;
use super::status::Context;
use super::{Key, State, Store, Value};

/// Key of a listener in the store's listener map.
///
/// Drawn from a process-wide counter, so ids never repeat across stores.
/// Unsubscribing removes the entry for the id; a second removal finds
/// nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

static NEXT_SUBSCRIBER: AtomicU64 = AtomicU64::new(0);

impl SubscriberId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIBER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Callback invoked with the consolidated state on every delivered burst.
pub type Callback<K, V> = Arc<dyn Fn(&State<K, V>, &Context<K>) + Send + Sync>;

pub(crate) struct Listener<K, V> {
    pub(crate) callback: Callback<K, V>,
    /// `None` for global listeners.
    keys: Option<SmallVec<[K; 4]>>,
}

impl<K, V> Listener<K, V>
where
    K: Key,
{
    /// Whether this listener should hear a burst with this notify list.
    pub(crate) fn wants(&self, changed: &IndexSet<K>) -> bool {
        match &self.keys {
            None => true,
            Some(keys) => keys.iter().any(|key| changed.contains(key)),
        }
    }
}

/// Handle returned by [`Store::subscribe`].
///
/// Dropping the handle leaves the subscriber registered; call
/// [`unsubscribe`](Self::unsubscribe) or convert it with
/// [`guard`](Self::guard).
pub struct Subscription<K, V>
where
    K: Key,
    V: Value,
{
    store: Weak<Inner<K, V>>,
    id: SubscriberId,
}

impl<K, V> Subscription<K, V>
where
    K: Key,
    V: Value,
{
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove the subscriber. Returns whether it was still registered.
    pub fn unsubscribe(&self) -> bool {
        let Some(inner) = self.store.upgrade() else {
            return false;
        };
        let removed = inner.slots.lock().listeners.shift_remove(&self.id).is_some();
        removed
    }

    /// Unsubscribe automatically when the returned guard is dropped.
    pub fn guard(self) -> SubscriptionGuard<K, V> {
        SubscriptionGuard { subscription: self }
    }
}

/// Unsubscribes when dropped.
pub struct SubscriptionGuard<K, V>
where
    K: Key,
    V: Value,
{
    subscription: Subscription<K, V>,
}

impl<K, V> SubscriptionGuard<K, V>
where
    K: Key,
    V: Value,
{
    pub fn id(&self) -> SubscriberId {
        self.subscription.id
    }
}

impl<K, V> Drop for SubscriptionGuard<K, V>
where
    K: Key,
    V: Value,
{
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

impl<K, V> Store<K, V>
where
    K: Key,
    V: Value,
{
    /// Subscribe to every notification burst.
    ///
    /// With `immediate`, the callback also runs once right away with the
    /// current state and an empty notify list.
    pub fn subscribe<F>(&self, callback: F, immediate: bool) -> Subscription<K, V>
    where
        F: Fn(&State<K, V>, &Context<K>) + Send + Sync + 'static,
    {
        self.add_listener(Arc::new(callback), None, immediate)
    }

    /// Subscribe to bursts whose notify list contains one of `keys`.
    ///
    /// Derived keys count as changed whenever one of their sources does.
    pub fn subscribe_keys<F, I>(&self, keys: I, callback: F, immediate: bool) -> Subscription<K, V>
    where
        F: Fn(&State<K, V>, &Context<K>) + Send + Sync + 'static,
        I: IntoIterator<Item = K>,
    {
        let keys = keys.into_iter().collect();
        self.add_listener(Arc::new(callback), Some(keys), immediate)
    }

    fn add_listener(
        &self,
        callback: Callback<K, V>,
        keys: Option<SmallVec<[K; 4]>>,
        immediate: bool,
    ) -> Subscription<K, V> {
        let id = SubscriberId::next();
        let count = {
            let mut slots = self.inner.slots.lock();
            slots.listeners.insert(
                id,
                Listener {
                    callback: Arc::clone(&callback),
                    keys,
                },
            );
            slots.listeners.len()
        };

        debug!(store = %self.name(), subscriber = ?id, subscribers = count, "subscribed");

        if immediate {
            let (state, ctx) = self.read(IndexSet::new());
            callback(&state, &ctx);
        }

        Subscription {
            store: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.slots.lock().listeners.len()
    }

    /// Resolve with the consolidated state once none of `keys` is loading.
    ///
    /// Resolves immediately when nothing is loading. The internal
    /// subscription is removed once the future completes or is dropped.
    pub fn until_loaded(&self, keys: &[K]) -> impl Future<Output = State<K, V>> + Send + 'static {
        let keys: SmallVec<[K; 4]> = keys.iter().cloned().collect();
        let (tx, rx) = oneshot::channel();
        let sender = Mutex::new(Some(tx));

        let subscription = self.subscribe(
            move |state, ctx| {
                if keys.iter().any(|key| ctx.is_loading(key)) {
                    return;
                }
                if let Some(tx) = sender.lock().take() {
                    let _ = tx.send(state.clone());
                }
            },
            true,
        );

        let guard = subscription.guard();
        let store = self.clone();
        async move {
            let state = rx.await;
            drop(guard);
            match state {
                Ok(state) => state,
                // The listener only goes away with the store itself.
                Err(_) => store.get_state(),
            }
        }
    }
}
