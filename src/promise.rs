//! One-shot hand-off of a result to a blocked thread.

use std::{mem, sync::Arc, time::Duration};

use crate::{
    sync::{Condvar, Mutex},
    Error,
};

/// Creates a connected pair of [`Promise`] and [`PromiseHandle`].
pub fn promise<T>() -> (Promise<T>, PromiseHandle<T>) {
    let inner = Arc::new(PromiseInner {
        state: Mutex::new(PromiseState::Empty),
        condvar: Condvar::new(),
    });
    (
        Promise {
            inner: inner.clone(),
            fulfilled: false,
        },
        PromiseHandle { inner },
    )
}

enum PromiseState<T> {
    Empty,
    Fulfilled(T),
    Dropped,
    Taken,
}

struct PromiseInner<T> {
    state: Mutex<PromiseState<T>>,
    condvar: Condvar,
}

/// An empty slot that can be filled with a `T`, fulfilling the promise.
///
/// Dropping a [`Promise`] without fulfilling it wakes the connected [`PromiseHandle`] with
/// [`Error::Disconnected`], so a request whose continuation was lost never leaves a caller hanging.
pub struct Promise<T> {
    inner: Arc<PromiseInner<T>>,
    fulfilled: bool,
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if self.fulfilled {
            return;
        }

        *self.inner.state.lock() = PromiseState::Dropped;
        self.inner.condvar.notify_all();
    }
}

impl<T> Promise<T> {
    /// Fulfills the promise with a value, consuming it.
    ///
    /// Never blocks. If the connected [`PromiseHandle`] is gone (for example after it timed out),
    /// `value` is dropped.
    pub fn fulfill(mut self, value: T) {
        *self.inner.state.lock() = PromiseState::Fulfilled(value);
        self.inner.condvar.notify_all();
        self.fulfilled = true;
    }
}

/// A handle connected to a [`Promise`] that will eventually resolve to a value of type `T`.
pub struct PromiseHandle<T> {
    inner: Arc<PromiseInner<T>>,
}

impl<T> PromiseHandle<T> {
    /// Blocks the calling thread until the connected [`Promise`] is fulfilled or dropped.
    pub fn block(self) -> Result<T, Error> {
        let state = self.inner.state.lock();
        let mut state = self
            .inner
            .condvar
            .wait_while(state, |state| matches!(state, PromiseState::Empty));
        Self::take(&mut state)
    }

    /// Like [`PromiseHandle::block`], but gives up with [`Error::Timeout`] after `timeout`.
    pub fn block_timeout(self, timeout: Duration) -> Result<T, Error> {
        let state = self.inner.state.lock();
        let (mut state, timed_out) =
            self.inner
                .condvar
                .wait_timeout_while(state, timeout, |state| matches!(state, PromiseState::Empty));
        if timed_out {
            return Err(Error::Timeout);
        }
        Self::take(&mut state)
    }

    fn take(state: &mut PromiseState<T>) -> Result<T, Error> {
        match mem::replace(state, PromiseState::Taken) {
            PromiseState::Fulfilled(value) => Ok(value),
            PromiseState::Empty | PromiseState::Dropped | PromiseState::Taken => Err(Error::Disconnected),
        }
    }

    /// Tests whether a call to [`PromiseHandle::block`] will block or return immediately.
    pub fn will_block(&self) -> bool {
        matches!(*self.inner.state.lock(), PromiseState::Empty)
    }
}
