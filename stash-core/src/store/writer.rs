//! Key Writer
//!
//! Writes move a key through `Idle -> Pending -> {Settled, Failed}`:
//!
//! - A literal write settles immediately.
//! - A deferred write marks the key loading, withdraws its value (unless
//!   configured otherwise) and spawns the future on the store's scheduler.
//!   The result lands later as its own burst.
//! - A stream write attaches an [`Observer`](super::Observer) and pumps the
//!   stream into it.
//!
//! Every write supersedes the previous owner of the key. Attached streams
//! are torn down synchronously, and deferred results are version-checked
//! against the key's write generation when they settle, so a slow future
//! can never overwrite a newer value.

use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, Stream, StreamExt};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::observer::ObserverOptions;
use super::{Key, Store, Value};
use crate::error::{box_error, BoxError, KeyError};

/// A value to write, tagged with how it arrives.
pub enum Input<V> {
    /// Available now.
    Literal(V),

    /// Settles once, later.
    Deferred(BoxFuture<'static, Result<V, BoxError>>),

    /// Emits zero or more values, then completes or fails.
    Stream(BoxStream<'static, Result<V, BoxError>>),
}

impl<V> Input<V>
where
    V: Send + 'static,
{
    /// Wrap a future whose error converts into a boxed error.
    pub fn deferred<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Input::Deferred(future.map(|result| result.map_err(box_error)).boxed())
    }

    /// Wrap a stream whose error converts into a boxed error.
    pub fn stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<V, E>> + Send + 'static,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Input::Stream(stream.map(|item| item.map_err(box_error)).boxed())
    }
}

/// How a write ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The value was written.
    Applied,

    /// The deferred write failed; the key now carries the error.
    Failed,

    /// A newer write owned the key by the time the result arrived, so the
    /// result was discarded.
    Superseded,

    /// The deferred task was dropped before it settled.
    Abandoned,
}

enum CompletionState {
    Ready(Option<WriteOutcome>),
    Waiting(oneshot::Receiver<WriteOutcome>),
    Never,
}

/// Resolves when the write started by [`Store::set`] completes.
///
/// Literal writes are complete immediately and deferred writes complete
/// when they settle. Stream writes never complete.
pub struct Completion {
    state: CompletionState,
}

impl Completion {
    fn ready(outcome: WriteOutcome) -> Self {
        Self {
            state: CompletionState::Ready(Some(outcome)),
        }
    }

    fn waiting(rx: oneshot::Receiver<WriteOutcome>) -> Self {
        Self {
            state: CompletionState::Waiting(rx),
        }
    }

    fn never() -> Self {
        Self {
            state: CompletionState::Never,
        }
    }
}

impl Future for Completion {
    type Output = WriteOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<WriteOutcome> {
        match &mut self.get_mut().state {
            CompletionState::Ready(outcome) => match outcome.take() {
                Some(outcome) => Poll::Ready(outcome),
                None => Poll::Pending,
            },
            CompletionState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|result| result.unwrap_or(WriteOutcome::Abandoned)),
            CompletionState::Never => Poll::Pending,
        }
    }
}

impl<K, V> Store<K, V>
where
    K: Key,
    V: Value,
{
    /// Assign literal values to several keys in one step.
    ///
    /// Each key becomes known, idle and not live, its error is cleared and
    /// any stream or getter on it is detached. One notification covers the
    /// whole merge.
    pub fn set_state<I>(&self, merge: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut teardowns = Vec::new();
        let mut written = 0usize;

        {
            let mut slots = self.inner.slots.lock();
            for (key, value) in merge {
                let (teardown, _) = slots.begin_write(&key);
                teardowns.extend(teardown);
                slots.assign(key, value);
                written += 1;
            }
        }

        if written == 0 {
            return;
        }

        debug!(store = %self.name(), keys = written, detached = teardowns.len(), "set state");

        for teardown in teardowns {
            teardown();
        }
        self.request_notify();
    }

    /// Write one key from a literal, deferred or streaming source.
    pub fn set(&self, key: K, input: Input<V>) -> Completion {
        match input {
            Input::Literal(value) => {
                self.set_state([(key, value)]);
                Completion::ready(WriteOutcome::Applied)
            }
            Input::Deferred(future) => self.set_deferred(key, future),
            Input::Stream(stream) => {
                self.attach_stream(key, stream, ObserverOptions::default());
                Completion::never()
            }
        }
    }

    /// Attach a stream whose values pass through `options` first.
    pub fn set_stream<S, E>(&self, key: K, stream: S, options: ObserverOptions<V>)
    where
        S: Stream<Item = Result<V, E>> + Send + 'static,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let stream = stream.map(|item| item.map_err(box_error)).boxed();
        self.attach_stream(key, stream, options);
    }

    fn set_deferred(&self, key: K, future: BoxFuture<'static, Result<V, BoxError>>) -> Completion {
        let withdraw = self.config().withdraw_on_pending;

        let (teardown, generation) = {
            let mut slots = self.inner.slots.lock();
            let (teardown, generation) = slots.begin_write(&key);
            if withdraw {
                slots.state.shift_remove(&key);
            }
            slots.errors.remove(&key);
            slots.known.insert(key.clone());
            slots.loading.insert(key.clone());
            slots.changed.insert(key.clone());
            (teardown, generation)
        };

        debug!(store = %self.name(), key = ?key, generation, "deferred write pending");

        if let Some(teardown) = teardown {
            teardown();
        }
        self.request_notify();

        // The task holds the store weakly so a parked task cannot keep it alive.
        let (tx, rx) = oneshot::channel();
        let inner = Arc::downgrade(&self.inner);
        self.spawn(
            async move {
                let result = future.await;
                if let Some(inner) = inner.upgrade() {
                    let outcome = Store { inner }.settle(key, generation, result);
                    let _ = tx.send(outcome);
                }
            }
            .boxed(),
        );

        Completion::waiting(rx)
    }

    /// Apply a deferred result if its write is still the newest for the key.
    fn settle(&self, key: K, generation: u64, result: Result<V, BoxError>) -> WriteOutcome {
        let outcome = {
            let mut slots = self.inner.slots.lock();
            if !slots.is_current(&key, generation) {
                None
            } else {
                slots.loading.shift_remove(&key);
                slots.changed.insert(key.clone());
                Some(match result {
                    Ok(value) => {
                        slots.errors.remove(&key);
                        slots.state.insert(key.clone(), value);
                        WriteOutcome::Applied
                    }
                    Err(err) => {
                        slots.state.shift_remove(&key);
                        slots.errors.insert(key.clone(), KeyError::Rejected(err));
                        WriteOutcome::Failed
                    }
                })
            }
        };

        match outcome {
            Some(outcome) => {
                debug!(store = %self.name(), key = ?key, generation, ?outcome, "deferred write settled");
                self.request_notify();
                outcome
            }
            None => {
                warn!(store = %self.name(), key = ?key, generation, "discarding stale deferred result");
                WriteOutcome::Superseded
            }
        }
    }

    /// Remove keys entirely, tearing down their streams and getters.
    ///
    /// Pending deferred writes on these keys are discarded when they settle.
    pub fn unset(&self, keys: &[K]) {
        let mut teardowns = Vec::new();

        {
            let mut slots = self.inner.slots.lock();
            for key in keys {
                let (teardown, _) = slots.begin_write(key);
                teardowns.extend(teardown);
                slots.remove(key);
            }
        }

        if keys.is_empty() {
            return;
        }

        debug!(store = %self.name(), keys = ?keys, detached = teardowns.len(), "unset");

        for teardown in teardowns {
            teardown();
        }
        self.request_notify();
    }
}
