//! Getter Registry
//!
//! A getter turns a key into a derived value: reading the key evaluates a
//! pure function of the current state instead of returning a stored value.
//!
//! # Fan-out
//!
//! Getters are never re-run to detect change. Instead each getter declares
//! the source keys it reads, and a write to any source puts the derived key
//! on the burst's notify list too. Derived keys are always treated as
//! "possibly changed".
//!
//! Widening walks dependents breadth-first, so a getter that names another
//! getter as a source is notified as well.
//!
//! # Evaluation Order
//!
//! Getters are evaluated after the getters they read, and each result is
//! written into the state before the next getter runs. A getter built on
//! another getter therefore sees its derived value, not a missing key.
//! Within a dependency cycle, the getter reached first sees whatever the
//! state holds for the others at that point.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use tracing::debug;

use super::{Key, State, Store, Value};

/// Pure function computing a derived key from the raw state.
pub type Compute<K, V> = Arc<dyn Fn(&State<K, V>) -> V + Send + Sync>;

pub(crate) type Sources<K> = SmallVec<[K; 4]>;

/// Derived keys and the edges from their sources.
pub(crate) struct GetterRegistry<K, V>
where
    K: Key,
{
    getters: IndexMap<K, Compute<K, V>>,
    /// Derived key -> keys it reads.
    sources: HashMap<K, Sources<K>>,
    /// Source key -> derived keys to notify alongside it.
    dependents: HashMap<K, Sources<K>>,
}

impl<K, V> GetterRegistry<K, V>
where
    K: Key,
    V: Value,
{
    pub(crate) fn new() -> Self {
        Self {
            getters: IndexMap::new(),
            sources: HashMap::new(),
            dependents: HashMap::new(),
        }
    }

    /// Register `key` as derived, replacing any earlier getter and its edges.
    pub(crate) fn register(&mut self, key: K, compute: Compute<K, V>, sources: Sources<K>) {
        self.remove(&key);

        for source in &sources {
            let dependents = self.dependents.entry(source.clone()).or_default();
            if !dependents.contains(&key) {
                dependents.push(key.clone());
            }
        }

        self.sources.insert(key.clone(), sources);
        self.getters.insert(key, compute);
    }

    /// Drop the getter for `key`. Returns whether one was registered.
    pub(crate) fn remove(&mut self, key: &K) -> bool {
        let removed = self.getters.shift_remove(key).is_some();

        if let Some(sources) = self.sources.remove(key) {
            for source in &sources {
                if let Some(dependents) = self.dependents.get_mut(source) {
                    dependents.retain(|dependent| dependent != key);
                    if dependents.is_empty() {
                        self.dependents.remove(source);
                    }
                }
            }
        }

        removed
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.getters.contains_key(key)
    }

    pub(crate) fn dependents_of(&self, key: &K) -> &[K] {
        self.dependents.get(key).map(|d| d.as_slice()).unwrap_or(&[])
    }

    /// Extend a set of changed keys with every key derived from them.
    pub(crate) fn widen(&self, mut changed: IndexSet<K>) -> IndexSet<K> {
        let mut queue: VecDeque<K> = changed.iter().cloned().collect();

        while let Some(key) = queue.pop_front() {
            for dependent in self.dependents_of(&key) {
                if changed.insert(dependent.clone()) {
                    queue.push_back(dependent.clone());
                }
            }
        }

        changed
    }

    /// Cheap copy of the registered getters in evaluation order, for use
    /// outside the lock.
    pub(crate) fn snapshot(&self) -> Vec<(K, Compute<K, V>)> {
        let mut ordered = Vec::with_capacity(self.getters.len());
        let mut visited = HashSet::new();
        for key in self.getters.keys() {
            self.visit(key, &mut visited, &mut ordered);
        }
        ordered
    }

    /// Post-order walk: a getter lands after every getter it reads.
    fn visit(&self, key: &K, visited: &mut HashSet<K>, ordered: &mut Vec<(K, Compute<K, V>)>) {
        if !visited.insert(key.clone()) {
            return;
        }

        if let Some(sources) = self.sources.get(key) {
            for source in sources {
                if self.getters.contains_key(source) {
                    self.visit(source, visited, ordered);
                }
            }
        }

        if let Some(compute) = self.getters.get(key) {
            ordered.push((key.clone(), Arc::clone(compute)));
        }
    }
}

/// Overlay getter results onto a raw state snapshot.
///
/// `getters` must be in [`GetterRegistry::snapshot`] order. Each result is
/// inserted before the next getter runs.
pub(crate) fn evaluate<K, V>(mut state: State<K, V>, getters: &[(K, Compute<K, V>)]) -> State<K, V>
where
    K: Key,
    V: Value,
{
    for (key, compute) in getters {
        let value = compute(&state);
        state.insert(key.clone(), value);
    }
    state
}

impl<K, V> Store<K, V>
where
    K: Key,
    V: Value,
{
    /// Register `key` as a derived value computed from the current state.
    ///
    /// Writes to any key in `depends_on` also notify listeners of `key`.
    /// Registering tears down any stream on `key`, withdraws its stored
    /// value and error, and marks it known. A later `set` on `key` removes
    /// the getter again.
    pub fn getter<F, I>(&self, key: K, compute: F, depends_on: I)
    where
        F: Fn(&State<K, V>) -> V + Send + Sync + 'static,
        I: IntoIterator<Item = K>,
    {
        let sources: Sources<K> = depends_on.into_iter().collect();

        let teardown = {
            let mut slots = self.inner.slots.lock();
            let (teardown, _) = slots.begin_write(&key);
            slots.state.shift_remove(&key);
            slots.loading.shift_remove(&key);
            slots.errors.remove(&key);
            slots.known.insert(key.clone());
            slots.changed.insert(key.clone());
            slots.getters.register(key.clone(), Arc::new(compute), sources.clone());
            teardown
        };

        debug!(store = %self.name(), key = ?key, sources = ?sources, "registered getter");

        if let Some(teardown) = teardown {
            teardown();
        }
        self.request_notify();
    }
}
