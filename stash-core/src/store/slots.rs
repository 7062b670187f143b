//! Internal per-key bookkeeping.
//!
//! Every field here is guarded by the store's mutex. Methods only mutate
//! maps; they never call back into user code, so none of them can re-enter
//! the store while the lock is held.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use super::getter::GetterRegistry;
use super::status::Context;
use super::subscription::{Listener, SubscriberId};
use super::{Key, State, Value};
use crate::error::KeyError;

/// Detaches a stream from its key. Runs at most once, outside the lock.
pub(crate) type Teardown = Box<dyn FnOnce() + Send>;

pub(crate) struct Slots<K, V>
where
    K: Key,
    V: Value,
{
    pub(crate) state: State<K, V>,
    pub(crate) known: IndexSet<K>,
    pub(crate) loading: IndexSet<K>,
    pub(crate) live: IndexSet<K>,
    pub(crate) errors: HashMap<K, KeyError>,
    pub(crate) disconnect: HashMap<K, Teardown>,
    /// Write generation per key. Never removed, so a stale deferred write
    /// cannot match a counter that restarted.
    generations: HashMap<K, u64>,
    pub(crate) getters: GetterRegistry<K, V>,
    pub(crate) listeners: IndexMap<SubscriberId, Listener<K, V>>,
    /// Keys written since the last flush.
    pub(crate) changed: IndexSet<K>,
    pub(crate) notify_scheduled: bool,
}

impl<K, V> Slots<K, V>
where
    K: Key,
    V: Value,
{
    pub(crate) fn new(initial: State<K, V>) -> Self {
        Self {
            known: initial.keys().cloned().collect(),
            state: initial,
            loading: IndexSet::new(),
            live: IndexSet::new(),
            errors: HashMap::new(),
            disconnect: HashMap::new(),
            generations: HashMap::new(),
            getters: GetterRegistry::new(),
            listeners: IndexMap::new(),
            changed: IndexSet::new(),
            notify_scheduled: false,
        }
    }

    /// Start a new write on `key`.
    ///
    /// Supersedes whatever owned the key before: the attached stream is
    /// detached, a registered getter is dropped, and the generation moves
    /// on so in-flight deferred results are discarded when they settle.
    pub(crate) fn begin_write(&mut self, key: &K) -> (Option<Teardown>, u64) {
        let teardown = self.detach(key);
        self.getters.remove(key);
        let generation = self.bump(key);
        (teardown, generation)
    }

    /// Take the key's stream teardown and clear its live flag.
    pub(crate) fn detach(&mut self, key: &K) -> Option<Teardown> {
        self.live.shift_remove(key);
        self.disconnect.remove(key)
    }

    pub(crate) fn bump(&mut self, key: &K) -> u64 {
        let generation = self.generations.entry(key.clone()).or_insert(0);
        *generation += 1;
        *generation
    }

    pub(crate) fn is_current(&self, key: &K, generation: u64) -> bool {
        self.generations.get(key).copied().unwrap_or(0) == generation
    }

    /// Store a successfully written value.
    pub(crate) fn assign(&mut self, key: K, value: V) {
        self.known.insert(key.clone());
        self.loading.shift_remove(&key);
        self.errors.remove(&key);
        self.changed.insert(key.clone());
        self.state.insert(key, value);
    }

    /// Forget everything about `key` except its generation.
    pub(crate) fn remove(&mut self, key: &K) {
        self.known.shift_remove(key);
        self.state.shift_remove(key);
        self.loading.shift_remove(key);
        self.errors.remove(key);
        self.changed.insert(key.clone());
    }

    pub(crate) fn context(&self, changed: IndexSet<K>) -> Context<K> {
        Context {
            known: self.known.clone(),
            loading: self.loading.clone(),
            live: self.live.clone(),
            errors: self.errors.clone(),
            changed,
        }
    }
}
