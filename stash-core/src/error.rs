//! Error Types
//!
//! Store operations never fail synchronously. A failed write degrades to a
//! per-key [`KeyError`] that subscribers read from the status record, and
//! the store itself stays usable.
//!
//! [`StoreError`] covers the few fallible paths around the store, such as
//! parsing a [`StoreConfig`](crate::StoreConfig).

use std::error::Error;
use std::sync::Arc;

use thiserror::Error;

/// Shared, clonable error value carried inside a [`KeyError`].
pub type BoxError = Arc<dyn Error + Send + Sync>;

/// Convert anything that can become a boxed error into a [`BoxError`].
///
/// Accepts concrete error types as well as `&str` and `String` messages.
pub fn box_error<E>(err: E) -> BoxError
where
    E: Into<Box<dyn Error + Send + Sync>>,
{
    Arc::from(err.into())
}

/// The last failure recorded for a key.
#[derive(Debug, Clone, Error)]
pub enum KeyError {
    /// A deferred write settled with an error.
    #[error("deferred write rejected: {0}")]
    Rejected(BoxError),

    /// An attached stream emitted an error event.
    #[error("stream failed: {0}")]
    Stream(BoxError),

    /// A stream transform rejected an emitted value.
    #[error("stream transform failed: {0}")]
    Transform(BoxError),
}

impl KeyError {
    /// The underlying cause, as passed in by the failing source.
    pub fn reason(&self) -> &(dyn Error + Send + Sync + 'static) {
        match self {
            KeyError::Rejected(err) | KeyError::Stream(err) | KeyError::Transform(err) => {
                err.as_ref()
            }
        }
    }
}

/// Errors raised outside the store's write paths.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A store configuration could not be parsed.
    #[error("invalid store configuration: {0}")]
    Config(#[from] serde_json::Error),
}
