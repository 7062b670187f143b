//! Store Configuration
//!
//! A store is configured once at construction. The configuration can be
//! built in code or deserialized from JSON; every field has a default, so
//! partial documents are accepted.
//!
//! ```rust,ignore
//! let config = StoreConfig::from_json(r#"{ "withdraw_on_pending": false }"#)?;
//! let store = Store::with_config([("user", None)], config);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Which scheduler drives notification flushes and spawned writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Flush on the ambient current-thread tokio runtime, once the current
    /// task yields. Multi-thread runtimes park flushes for `run_pending`.
    #[default]
    Tokio,

    /// Queue flushes and tasks until [`Store::run_pending`](crate::Store::run_pending)
    /// is called.
    Manual,
}

/// Construction-time options for a [`Store`](crate::Store).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Clear a key's value while a deferred write for it is pending.
    ///
    /// When false, the previous value stays visible with `loading = true`.
    pub withdraw_on_pending: bool,

    /// Scheduler used for notification flushes.
    pub flush: FlushMode,

    /// Optional name attached to the store's log events.
    pub name: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            withdraw_on_pending: true,
            flush: FlushMode::Tokio,
            name: None,
        }
    }
}

impl StoreConfig {
    /// Parse a configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Use the manual scheduler.
    pub fn manual(mut self) -> Self {
        self.flush = FlushMode::Manual;
        self
    }

    /// Set the name attached to log events.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
