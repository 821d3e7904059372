//! Future handles returned by the asynchronous request API.
//!
//! A [`ResultFuture`] can be awaited, waited on from a thread outside of any runtime, or given a
//! completion callback. It is completed by its [`ResultPromise`], usually from an event loop
//! thread.
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// An owned dynamically typed [`Future`] for use in cases where you can't
/// statically type your result or need to add some indirection.
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, T>;

type Callback<T> = Box<dyn FnOnce(Result<T>) + Send>;

struct State<T> {
    result: Option<Result<T>>,
    callback: Option<Callback<T>>,
    callback_registered: bool,
    wakers: Vec<Waker>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    completed: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates a connected promise/future pair.
pub fn result_channel<T: Clone + Send + 'static>() -> (ResultPromise<T>, ResultFuture<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            result: None,
            callback: None,
            callback_registered: false,
            wakers: vec![],
        }),
        completed: Condvar::new(),
    });

    (
        ResultPromise {
            shared: Some(shared.clone()),
        },
        ResultFuture { shared },
    )
}

/// Handle to a result which will be available in the future.
pub struct ResultFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ResultFuture<T> {
    fn clone(&self) -> Self {
        ResultFuture {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> ResultFuture<T> {
    /// Creates an already completed future.
    pub fn ready(result: Result<T>) -> Self {
        let (promise, future) = result_channel();
        promise.set(result);
        future
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.shared.lock().result.is_some()
    }

    /// Blocks the current thread until the result is available. Must not be called from an
    /// event loop thread, since that thread is the one completing the result.
    pub fn wait(&self) -> Result<T> {
        let mut state = self.shared.lock();
        loop {
            if let Some(result) = &state.result {
                return result.clone();
            }

            state = self
                .shared
                .completed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout`, returning `None`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if let Some(result) = &state.result {
                return Some(result.clone());
            }

            let remaining = deadline.checked_duration_since(Instant::now())?;
            state = self
                .shared
                .completed
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Registers a callback invoked once the result is available. If it already is, the
    /// callback runs immediately on the calling thread. Only one callback can be registered;
    /// returns `false` when one already was.
    pub fn on_complete<F>(&self, callback: F) -> bool
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let mut state = self.shared.lock();
        if state.callback_registered {
            return false;
        }

        state.callback_registered = true;

        match &state.result {
            Some(result) => {
                let result = result.clone();
                drop(state);
                callback(result);
            }
            None => state.callback = Some(Box::new(callback)),
        }

        true
    }
}

impl<T: Clone + Send + 'static> Future for ResultFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.lock();
        match &state.result {
            Some(result) => Poll::Ready(result.clone()),
            None => {
                if !state.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    state.wakers.push(cx.waker().clone());
                }

                Poll::Pending
            }
        }
    }
}

/// Completing side of a [`ResultFuture`]. Dropping it without setting a result completes the
/// future with [`Error::Canceled`].
pub struct ResultPromise<T: Clone> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T: Clone> ResultPromise<T> {
    /// Completes the future, notifying waiters and running the callback, if any.
    pub fn set(mut self, result: Result<T>) {
        self.complete(result);
    }

    fn complete(&mut self, result: Result<T>) {
        let Some(shared) = self.shared.take() else {
            return;
        };

        let (callback, wakers, callback_result) = {
            let mut state = shared.lock();
            let callback = state.callback.take();
            let callback_result = callback.as_ref().map(|_| result.clone());

            state.result = Some(result);
            (callback, std::mem::take(&mut state.wakers), callback_result)
        };

        shared.completed.notify_all();

        for waker in wakers {
            waker.wake();
        }

        if let (Some(callback), Some(result)) = (callback, callback_result) {
            callback(result);
        }
    }
}

impl<T: Clone> Drop for ResultPromise<T> {
    fn drop(&mut self) {
        if self.shared.is_some() {
            self.complete(Err(Error::Canceled));
        }
    }
}
