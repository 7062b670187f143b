//! Per-key status metadata.
//!
//! Subscribers receive the consolidated state plus a [`Context`] describing
//! what the store knows about each key. [`Status`] is the same information
//! narrowed to a single key.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use indexmap::IndexSet;

use crate::error::KeyError;

/// Snapshot of one key's metadata and value.
#[derive(Debug, Clone)]
pub struct Status<V> {
    /// The key has been assigned, whether or not a value is present.
    pub known: bool,

    /// A deferred write is in flight, or a stream has not delivered yet.
    pub loading: bool,

    /// The key is bound to an active stream.
    pub live: bool,

    /// Last failure, cleared by the next successful write.
    pub error: Option<KeyError>,

    /// Current value, getter-aware.
    pub value: Option<V>,
}

impl<V> Default for Status<V> {
    fn default() -> Self {
        Self {
            known: false,
            loading: false,
            live: false,
            error: None,
            value: None,
        }
    }
}

impl<V> Status<V> {
    /// Known, not loading, and without an error.
    pub fn is_ready(&self) -> bool {
        self.known && !self.loading && self.error.is_none()
    }
}

/// Read-only view of the store's metadata handed to subscribers.
#[derive(Debug, Clone)]
pub struct Context<K> {
    pub(crate) known: IndexSet<K>,
    pub(crate) loading: IndexSet<K>,
    pub(crate) live: IndexSet<K>,
    pub(crate) errors: HashMap<K, KeyError>,
    pub(crate) changed: IndexSet<K>,
}

impl<K> Context<K>
where
    K: Clone + Eq + Hash + Debug,
{
    pub fn is_known(&self, key: &K) -> bool {
        self.known.contains(key)
    }

    pub fn is_loading(&self, key: &K) -> bool {
        self.loading.contains(key)
    }

    pub fn is_live(&self, key: &K) -> bool {
        self.live.contains(key)
    }

    pub fn error(&self, key: &K) -> Option<&KeyError> {
        self.errors.get(key)
    }

    /// All keys currently known.
    pub fn known(&self) -> impl Iterator<Item = &K> {
        self.known.iter()
    }

    /// Keys written during the burst being delivered, widened by the
    /// getters that derive from them.
    ///
    /// Empty for the immediate call made by `subscribe`.
    pub fn changed(&self) -> &IndexSet<K> {
        &self.changed
    }

    /// Whether `key` belongs to this burst's notify list.
    pub fn has_changed(&self, key: &K) -> bool {
        self.changed.contains(key)
    }

    /// Status for one key, paired with an already resolved value.
    pub fn status<V>(&self, key: &K, value: Option<V>) -> Status<V> {
        Status {
            known: self.is_known(key),
            loading: self.is_loading(key),
            live: self.is_live(key),
            error: self.error(key).cloned(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::box_error;

    fn context() -> Context<&'static str> {
        Context {
            known: ["a", "b"].into_iter().collect(),
            loading: ["b"].into_iter().collect(),
            live: IndexSet::new(),
            errors: HashMap::from([("a", KeyError::Rejected(box_error("nope")))]),
            changed: ["a"].into_iter().collect(),
        }
    }

    #[test]
    fn context_answers_per_key_queries() {
        let ctx = context();

        assert!(ctx.is_known(&"a"));
        assert!(!ctx.is_known(&"c"));
        assert!(ctx.is_loading(&"b"));
        assert!(!ctx.is_live(&"a"));
        assert!(ctx.error(&"a").is_some());
        assert!(ctx.has_changed(&"a"));
        assert!(!ctx.has_changed(&"b"));
    }

    #[test]
    fn status_is_ready_only_when_settled_cleanly() {
        let ctx = context();

        let failed = ctx.status(&"a", None::<i32>);
        assert!(!failed.is_ready());

        let pending = ctx.status(&"b", None::<i32>);
        assert!(pending.loading);
        assert!(!pending.is_ready());

        let unknown: Status<i32> = Status::default();
        assert!(!unknown.is_ready());

        let ready = Status {
            known: true,
            value: Some(1),
            ..Status::default()
        };
        assert!(ready.is_ready());
    }
}
