//! Single-shot deferred result, modeled on the source library's callback
//! future: `succeed`/`fail` are terminal, and callbacks registered after
//! resolution fire immediately with the stored outcome. Also implements
//! `Future` directly so callers that prefer plain `.await` (the idiomatic
//! Rust path used throughout `cluster.rs`/`store.rs`) don't need to touch
//! the callback API at all.

use crate::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

type Outcome<T> = Result<T, Error>;

enum State<T> {
    Pending {
        wakers: Vec<Waker>,
        on_success: Vec<Box<dyn FnOnce(&T) + Send>>,
        on_failure: Vec<Box<dyn FnOnce(&Error) + Send>>,
    },
    Done(Outcome<T>),
}

struct Inner<T> {
    state: Mutex<State<T>>,
}

/// The write half: resolves the deferred result exactly once.
pub struct Resolver<T> {
    inner: Arc<Inner<T>>,
}

/// The read half: awaitable, and supports callback registration.
#[derive(Clone)]
pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

/// Create a linked resolver/deferred pair.
pub fn channel<T: Clone + Send + 'static>() -> (Resolver<T>, Deferred<T>) {
    let inner = Arc::new(Inner {
        state: Mutex::new(State::Pending {
            wakers: Vec::new(),
            on_success: Vec::new(),
            on_failure: Vec::new(),
        }),
    });
    (
        Resolver { inner: inner.clone() },
        Deferred { inner },
    )
}

impl<T: Clone + Send + 'static> Resolver<T> {
    /// Resolve with a success value. A second call is a no-op — the
    /// primitive is single-shot by construction.
    pub fn succeed(self, value: T) {
        self.resolve(Ok(value));
    }

    /// Resolve with a failure.
    pub fn fail(self, err: Error) {
        self.resolve(Err(err));
    }

    fn resolve(self, outcome: Outcome<T>) {
        let mut guard = self.inner.state.lock().unwrap();
        if matches!(*guard, State::Done(_)) {
            return;
        }
        let prev = std::mem::replace(&mut *guard, State::Done(outcome.clone()));
        drop(guard);
        if let State::Pending { wakers, on_success, on_failure } = prev {
            match &outcome {
                Ok(v) => {
                    for cb in on_success {
                        cb(v);
                    }
                }
                Err(e) => {
                    for cb in on_failure {
                        cb(e);
                    }
                }
            }
            for w in wakers {
                w.wake();
            }
        }
    }
}

impl<T: Clone + Send + 'static> Deferred<T> {
    /// Register a success callback. Fires synchronously and immediately
    /// if the result is already resolved.
    pub fn on_success(&self, cb: impl FnOnce(&T) + Send + 'static) {
        let mut guard = self.inner.state.lock().unwrap();
        match &mut *guard {
            State::Done(Ok(v)) => {
                let v = v.clone();
                drop(guard);
                cb(&v);
            }
            State::Done(Err(_)) => {}
            State::Pending { on_success, .. } => on_success.push(Box::new(cb)),
        }
    }

    /// Register a failure callback. Fires synchronously and immediately
    /// if the result is already resolved.
    pub fn on_failure(&self, cb: impl FnOnce(&Error) + Send + 'static) {
        let mut guard = self.inner.state.lock().unwrap();
        match &mut *guard {
            State::Done(Err(e)) => {
                let e = e.clone();
                drop(guard);
                cb(&e);
            }
            State::Done(Ok(_)) => {}
            State::Pending { on_failure, .. } => on_failure.push(Box::new(cb)),
        }
    }

    /// Non-blocking peek at the outcome, if already resolved.
    pub fn peek(&self) -> Option<Outcome<T>> {
        match &*self.inner.state.lock().unwrap() {
            State::Done(outcome) => Some(outcome.clone()),
            State::Pending { .. } => None,
        }
    }
}

impl<T: Clone + Send + 'static> Future for Deferred<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut guard = self.inner.state.lock().unwrap();
        match &mut *guard {
            State::Done(outcome) => Poll::Ready(outcome.clone()),
            State::Pending { wakers, .. } => {
                wakers.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
