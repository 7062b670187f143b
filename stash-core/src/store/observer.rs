//! Stream Observers
//!
//! An [`Observer`] binds a push source to one key. Its `next`, `error` and
//! `complete` calls become store mutations:
//!
//! - Construction marks the key loading and live.
//! - `next` writes the (optionally transformed) value and clears loading.
//! - `error` withdraws the value, records the error and ends the binding.
//! - `complete` ends the binding and keeps the last value.
//!
//! After `error` or `complete` the observer is closed, and every later call
//! is silently ignored. Sources are free to signal completion defensively.
//!
//! # Teardown
//!
//! Each observer registers a teardown on its key. A superseding write or an
//! `unset` runs it exactly once; it closes the observer and, for streams
//! attached through [`Store::set`], aborts the task pumping the stream.

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::{AbortHandle, Abortable};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tracing::{debug, trace};

use super::engine::Inner;
use super::{Key, Store, Value};
use crate::error::{box_error, BoxError, KeyError};

/// Fallible mapping applied to every value a stream emits.
pub type Transform<V> = Arc<dyn Fn(V) -> Result<V, BoxError> + Send + Sync>;

/// Options for [`Store::observer`] and [`Store::set_stream`].
pub struct ObserverOptions<V> {
    transform: Option<Transform<V>>,
}

impl<V> Default for ObserverOptions<V> {
    fn default() -> Self {
        Self { transform: None }
    }
}

impl<V> Clone for ObserverOptions<V> {
    fn clone(&self) -> Self {
        Self {
            transform: self.transform.clone(),
        }
    }
}

impl<V> ObserverOptions<V>
where
    V: Value,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Map each value before it is written. An `Err` fails the stream.
    pub fn transform<F, E>(mut self, transform: F) -> Self
    where
        F: Fn(V) -> Result<V, E> + Send + Sync + 'static,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        self.transform = Some(Arc::new(move |value: V| transform(value).map_err(box_error)));
        self
    }
}

/// Push handle bound to one key of a store.
pub struct Observer<K, V>
where
    K: Key,
    V: Value,
{
    store: Weak<Inner<K, V>>,
    key: K,
    generation: u64,
    closed: Arc<AtomicBool>,
    transform: Option<Transform<V>>,
}

impl<K, V> Observer<K, V>
where
    K: Key,
    V: Value,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Whether the observer has ended or been detached.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Deliver a value.
    pub fn next(&self, value: V) {
        if self.is_closed() {
            trace!(key = ?self.key, "ignoring value on closed observer");
            return;
        }

        let value = match &self.transform {
            Some(transform) => match transform(value) {
                Ok(value) => value,
                Err(err) => return self.fail(KeyError::Transform(err)),
            },
            None => value,
        };

        let accepted = self
            .store()
            .map(|store| store.stream_next(&self.key, self.generation, value))
            .unwrap_or(false);

        if !accepted {
            self.closed.store(true, Ordering::Release);
        }
    }

    /// Fail the stream. Terminal.
    pub fn error<E>(&self, err: E)
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        self.fail(KeyError::Stream(box_error(err)));
    }

    /// End the stream, keeping the last value. Terminal.
    pub fn complete(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(store) = self.store() {
            store.stream_end(&self.key, self.generation, None);
        }
    }

    fn fail(&self, err: KeyError) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(store) = self.store() {
            store.stream_end(&self.key, self.generation, Some(err));
        }
    }

    fn store(&self) -> Option<Store<K, V>> {
        self.store.upgrade().map(|inner| Store { inner })
    }
}

impl<K, V> Store<K, V>
where
    K: Key,
    V: Value,
{
    /// Bind a push source to `key`.
    ///
    /// Any stream already attached to the key is torn down first.
    pub fn observer(&self, key: K, options: ObserverOptions<V>) -> Observer<K, V> {
        self.observe(key, options, None)
    }

    fn observe(
        &self,
        key: K,
        options: ObserverOptions<V>,
        abort: Option<AbortHandle>,
    ) -> Observer<K, V> {
        let closed = Arc::new(AtomicBool::new(false));

        let (teardown, generation) = {
            let mut slots = self.inner.slots.lock();
            let (teardown, generation) = slots.begin_write(&key);
            slots.errors.remove(&key);
            slots.known.insert(key.clone());
            slots.loading.insert(key.clone());
            slots.live.insert(key.clone());
            slots.changed.insert(key.clone());

            let flag = Arc::clone(&closed);
            slots.disconnect.insert(
                key.clone(),
                Box::new(move || {
                    flag.store(true, Ordering::Release);
                    if let Some(abort) = abort {
                        abort.abort();
                    }
                }),
            );
            (teardown, generation)
        };

        debug!(store = %self.name(), key = ?key, generation, "attached observer");

        if let Some(teardown) = teardown {
            teardown();
        }
        self.request_notify();

        Observer {
            store: Arc::downgrade(&self.inner),
            key,
            generation,
            closed,
            transform: options.transform,
        }
    }

    /// Pump `stream` into a fresh observer on the store's scheduler.
    pub(crate) fn attach_stream(
        &self,
        key: K,
        mut stream: BoxStream<'static, Result<V, BoxError>>,
        options: ObserverOptions<V>,
    ) {
        let (abort, registration) = AbortHandle::new_pair();
        let observer = self.observe(key, options, Some(abort));

        let pump = async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(value) => observer.next(value),
                    Err(err) => observer.fail(KeyError::Stream(err)),
                }
                if observer.is_closed() {
                    return;
                }
            }
            observer.complete();
        };

        self.spawn(Box::pin(async move {
            let _ = Abortable::new(pump, registration).await;
        }));
    }

    /// Write a streamed value. Returns false once the observer is stale.
    fn stream_next(&self, key: &K, generation: u64, value: V) -> bool {
        {
            let mut slots = self.inner.slots.lock();
            if !slots.is_current(key, generation) {
                return false;
            }
            slots.loading.shift_remove(key);
            slots.errors.remove(key);
            slots.changed.insert(key.clone());
            slots.state.insert(key.clone(), value);
        }

        trace!(store = %self.name(), key = ?key, "stream value");
        self.request_notify();
        true
    }

    /// Close a stream binding, optionally recording its failure.
    fn stream_end(&self, key: &K, generation: u64, error: Option<KeyError>) {
        let teardown = {
            let mut slots = self.inner.slots.lock();
            if !slots.is_current(key, generation) {
                return;
            }
            slots.loading.shift_remove(key);
            slots.changed.insert(key.clone());
            if let Some(error) = &error {
                slots.state.shift_remove(key);
                slots.errors.insert(key.clone(), error.clone());
            }
            slots.detach(key)
        };

        debug!(
            store = %self.name(),
            key = ?key,
            failed = error.is_some(),
            "stream ended"
        );

        // The source has already finished, so the teardown is not run.
        drop(teardown);
        self.request_notify();
    }
}
