//! Stash Core
//!
//! This crate provides a small reactive state container: one keyed store
//! whose values may be written directly, settle later from a future, or
//! stream in from a long-lived source. Subscribers receive the consolidated
//! state plus per-key metadata (known, loading, live, error), coalesced
//! into one notification per burst of mutations.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `store`: the store, its writers, observers, getters and subscriptions
//! - `schedule`: flush scheduling on tokio or a manually drained queue
//! - `config`: construction-time options
//! - `error`: per-key and configuration errors
//!
//! # Example
//!
//! ```rust,ignore
//! use stash_core::{Input, Store};
//!
//! let store = Store::new([("user", String::from("anonymous"))]);
//!
//! store.subscribe(|state, ctx| {
//!     if ctx.is_loading(&"profile") {
//!         println!("loading profile...");
//!     } else {
//!         println!("profile: {:?}", state.get("profile"));
//!     }
//! }, false);
//!
//! // Marks `profile` loading now; the fetched value lands in a later burst.
//! store.set("profile", Input::deferred(fetch_profile()));
//! ```

pub mod config;
pub mod error;
pub mod schedule;
pub mod store;

pub use config::{FlushMode, StoreConfig};
pub use error::{box_error, BoxError, KeyError, StoreError};
pub use schedule::{ManualScheduler, Schedule, TokioScheduler};
pub use store::{
    Completion, Context, Input, Key, Observer, ObserverOptions, State, Status, Store,
    Subscription, SubscriptionGuard, Value, WriteOutcome,
};
