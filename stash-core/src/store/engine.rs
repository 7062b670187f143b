//! Store Engine
//!
//! The [`Store`] owns the authoritative state, the per-key metadata, the
//! subscriber set and the notification flag. It is a cheap handle around
//! shared inner state, so clones address the same store.
//!
//! # How Notification Works
//!
//! 1. Every mutation updates the maps under the lock and records the keys it
//!    touched in the burst's `changed` set.
//!
//! 2. It then requests a notification. The first request in a burst flips
//!    `notify_scheduled` and hands a flush to the scheduler; later requests
//!    see the flag and return.
//!
//! 3. When the flush runs, it clears the flag, widens `changed` through the
//!    getter registry, snapshots state and subscribers, and calls every
//!    interested subscriber outside the lock.
//!
//! Subscribers therefore observe only the final state of a burst, and a
//! subscriber added before the flush runs still hears it.
//!
//! # Thread Safety
//!
//! Each read-modify-write sequence, together with its notification request,
//! runs under one `parking_lot::Mutex`. User code (getters, subscribers,
//! teardowns) is only ever called after the lock is released.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::getter::evaluate;
use super::slots::Slots;
use super::status::{Context, Status};
use super::{Key, State, Value};
use crate::config::{FlushMode, StoreConfig};
use crate::error::KeyError;
use crate::schedule::{ManualScheduler, Schedule, Task, TokioScheduler};

pub(crate) struct Inner<K, V>
where
    K: Key,
    V: Value,
{
    pub(crate) slots: Mutex<Slots<K, V>>,
    scheduler: Arc<dyn Schedule>,
    config: StoreConfig,
}

/// A keyed reactive state container.
///
/// # Example
///
/// ```rust,ignore
/// let store = Store::new([("count", 0)]);
///
/// store.subscribe(|state, _ctx| println!("count = {:?}", state.get("count")), false);
///
/// store.set_state([("count", 1)]);
/// store.set_state([("count", 2)]);
/// // One notification, observing count = 2
/// ```
pub struct Store<K, V>
where
    K: Key,
    V: Value,
{
    pub(crate) inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for Store<K, V>
where
    K: Key,
    V: Value,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Store<K, V>
where
    K: Key,
    V: Value,
{
    /// Create a store seeded with `initial`, using the default configuration.
    ///
    /// Every initial key is known, idle and not live.
    pub fn new<I>(initial: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        Self::with_config(initial, StoreConfig::default())
    }

    /// Create a store with an explicit configuration.
    pub fn with_config<I>(initial: I, config: StoreConfig) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let scheduler: Arc<dyn Schedule> = match config.flush {
            FlushMode::Tokio => Arc::new(TokioScheduler::new()),
            FlushMode::Manual => Arc::new(ManualScheduler::new()),
        };
        Self::with_scheduler(initial, config, scheduler)
    }

    /// Create a store driven by a caller-supplied scheduler.
    ///
    /// `config.flush` is ignored.
    pub fn with_scheduler<I>(initial: I, config: StoreConfig, scheduler: Arc<dyn Schedule>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let initial: State<K, V> = initial.into_iter().collect();
        debug!(
            store = config.name.as_deref().unwrap_or("store"),
            keys = initial.len(),
            "created store"
        );

        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(Slots::new(initial)),
                scheduler,
                config,
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub(crate) fn name(&self) -> &str {
        self.inner.config.name.as_deref().unwrap_or("store")
    }

    /// Current value of `key`, evaluating its getter if one is registered.
    pub fn get(&self, key: &K) -> Option<V> {
        let (raw, getters) = {
            let slots = self.inner.slots.lock();
            if !slots.getters.contains(key) {
                return slots.state.get(key).cloned();
            }
            (slots.state.clone(), slots.getters.snapshot())
        };
        evaluate(raw, &getters).shift_remove(key)
    }

    /// The consolidated state, with every getter evaluated.
    pub fn get_state(&self) -> State<K, V> {
        let (raw, getters) = {
            let slots = self.inner.slots.lock();
            (slots.state.clone(), slots.getters.snapshot())
        };
        evaluate(raw, &getters)
    }

    /// Metadata view of every key, with an empty notify list.
    pub fn context(&self) -> Context<K> {
        self.inner.slots.lock().context(IndexSet::new())
    }

    /// Status record for one key.
    ///
    /// Metadata and value are read under one lock, so both come from the
    /// same write. A getter is evaluated after the lock is released.
    pub fn status(&self, key: &K) -> Status<V> {
        let (mut status, derived) = {
            let slots = self.inner.slots.lock();
            let status = Status {
                known: slots.known.contains(key),
                loading: slots.loading.contains(key),
                live: slots.live.contains(key),
                error: slots.errors.get(key).cloned(),
                value: slots.state.get(key).cloned(),
            };
            let derived = slots
                .getters
                .contains(key)
                .then(|| (slots.state.clone(), slots.getters.snapshot()));
            (status, derived)
        };

        if let Some((raw, getters)) = derived {
            status.value = evaluate(raw, &getters).shift_remove(key);
        }
        status
    }

    /// True iff every key is known.
    pub fn known(&self, keys: &[K]) -> bool {
        let slots = self.inner.slots.lock();
        keys.iter().all(|key| slots.known.contains(key))
    }

    /// True iff any key is loading.
    pub fn loading(&self, keys: &[K]) -> bool {
        let slots = self.inner.slots.lock();
        keys.iter().any(|key| slots.loading.contains(key))
    }

    /// True iff no key is loading.
    pub fn loaded(&self, keys: &[K]) -> bool {
        !self.loading(keys)
    }

    /// True iff any key is bound to an active stream.
    pub fn live(&self, keys: &[K]) -> bool {
        let slots = self.inner.slots.lock();
        keys.iter().any(|key| slots.live.contains(key))
    }

    /// First error found among `keys`, in the order given.
    pub fn error(&self, keys: &[K]) -> Option<KeyError> {
        let slots = self.inner.slots.lock();
        keys.iter().find_map(|key| slots.errors.get(key).cloned())
    }

    /// Consolidated state and context, computed outside the lock.
    pub(crate) fn read(&self, changed: IndexSet<K>) -> (State<K, V>, Context<K>) {
        let (raw, getters, ctx) = {
            let slots = self.inner.slots.lock();
            (
                slots.state.clone(),
                slots.getters.snapshot(),
                slots.context(changed),
            )
        };
        (evaluate(raw, &getters), ctx)
    }

    /// Ask for a flush at the end of the current burst.
    pub(crate) fn request_notify(&self) {
        {
            let mut slots = self.inner.slots.lock();
            if slots.notify_scheduled {
                trace!(store = %self.name(), "notification already scheduled");
                return;
            }
            slots.notify_scheduled = true;
        }

        let inner = Arc::downgrade(&self.inner);
        self.inner.scheduler.schedule_flush(Box::new(move || {
            if let Some(inner) = inner.upgrade() {
                Store { inner }.flush_now();
            }
        }));
    }

    /// Deliver a pending notification immediately.
    ///
    /// Does nothing when no notification is scheduled. The flush already
    /// queued on the scheduler then finds nothing to do.
    pub fn flush_now(&self) {
        let (raw, getters, ctx, listeners) = {
            let mut slots = self.inner.slots.lock();
            if !slots.notify_scheduled {
                return;
            }
            slots.notify_scheduled = false;

            let changed = std::mem::take(&mut slots.changed);
            let changed = slots.getters.widen(changed);
            let listeners: Vec<_> = slots
                .listeners
                .values()
                .filter(|listener| listener.wants(&changed))
                .map(|listener| Arc::clone(&listener.callback))
                .collect();

            (
                slots.state.clone(),
                slots.getters.snapshot(),
                slots.context(changed),
                listeners,
            )
        };

        debug!(
            store = %self.name(),
            changed = ctx.changed().len(),
            subscribers = listeners.len(),
            "flushing notification"
        );

        let state = evaluate(raw, &getters);
        for callback in listeners {
            callback(&state, &ctx);
        }
    }

    /// Drain work parked on a manual or runtime-less scheduler.
    pub fn run_pending(&self) -> usize {
        self.inner.scheduler.run_pending()
    }

    pub(crate) fn spawn(&self, task: Task) {
        self.inner.scheduler.spawn(task);
    }
}

impl<K, V> fmt::Debug for Store<K, V>
where
    K: Key,
    V: Value,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.inner.slots.lock();
        f.debug_struct("Store")
            .field("name", &self.name())
            .field("known", &slots.known)
            .field("loading", &slots.loading)
            .field("live", &slots.live)
            .field("subscribers", &slots.listeners.len())
            .field("notify_scheduled", &slots.notify_scheduled)
            .finish()
    }
}
