//! Keyed Reactive Store
//!
//! This module implements the store: a single mutable keyed state whose
//! values arrive directly, from a deferred computation, or from a stream,
//! and whose subscribers receive one consolidated notification per burst.
//!
//! # Concepts
//!
//! ## Keys and Status
//!
//! Each key carries a value plus metadata: whether it is known, loading,
//! live (bound to a stream) and its last error. See [`Status`].
//!
//! ## Writes
//!
//! [`Store::set_state`], [`Store::set`] and [`Store::unset`] mutate keys.
//! [`Input`] names how a value arrives. Newer writes always supersede older
//! ones on the same key: streams are detached and stale deferred results
//! are dropped.
//!
//! ## Observers
//!
//! [`Store::observer`] returns a push handle for a single key. Streams
//! passed to `set` are pumped through one.
//!
//! ## Getters
//!
//! [`Store::getter`] derives a key from the rest of the state and widens
//! notifications from its sources to the derived key.
//!
//! ## Notifications
//!
//! Mutations request a flush from the store's
//! [`Schedule`](crate::schedule::Schedule). All requests before the flush
//! runs collapse into one broadcast of the final state.

mod engine;
mod getter;
mod observer;
mod slots;
mod status;
mod subscription;
mod writer;

use std::fmt::Debug;
use std::hash::Hash;

use indexmap::IndexMap;

pub use engine::Store;
pub use getter::Compute;
pub use observer::{Observer, ObserverOptions, Transform};
pub use status::{Context, Status};
pub use subscription::{Callback, SubscriberId, Subscription, SubscriptionGuard};
pub use writer::{Completion, Input, WriteOutcome};

/// Consolidated key -> value mapping, in insertion order.
pub type State<K, V> = IndexMap<K, V>;

/// Bounds every store key satisfies.
pub trait Key: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> Key for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Bounds every store value satisfies.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + Send + Sync + 'static {}
