//! Host futures
//!
//! A `HostFuture` is a thread-safe, single-assignment completion cell. It can be
//! observed by callback, by blocking wait, or by `.await`. Cancellation is a
//! settlement like any other (`HostError::Cancelled`), and additionally runs
//! the producer's canceller hook so the producing side can stop its work.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{HostError, HostResult};
use crate::value::HostValue;

type Callback = Box<dyn FnOnce(&HostResult<HostValue>) + Send>;
type Canceller = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Default)]
struct FutureState {
    outcome: Option<HostResult<HostValue>>,
    callbacks: Vec<Callback>,
    wakers: Vec<Waker>,
    canceller: Option<Canceller>,
}

struct FutureInner {
    state: Mutex<FutureState>,
    ready: Condvar,
}

#[derive(Clone)]
pub struct HostFuture {
    inner: Arc<FutureInner>,
}

impl HostFuture {
    /// Create a pending future
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FutureInner {
                state: Mutex::new(FutureState::default()),
                ready: Condvar::new(),
            }),
        }
    }

    pub fn completed(value: HostValue) -> Self {
        let future = Self::new();
        future.complete(value);
        future
    }

    pub fn failed(error: HostError) -> Self {
        let future = Self::new();
        future.fail(error);
        future
    }

    /// Complete with a value; `false` if already settled
    pub fn complete(&self, value: HostValue) -> bool {
        self.settle(Ok(value))
    }

    /// Fail with an error; `false` if already settled
    pub fn fail(&self, error: HostError) -> bool {
        self.settle(Err(error))
    }

    /// Cancel a pending future and run the producer's canceller
    pub fn cancel(&self) -> bool {
        let canceller = {
            let mut state = self.inner.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.canceller.take()
        };
        if !self.settle(Err(HostError::Cancelled)) {
            return false;
        }
        if let Some(canceller) = canceller {
            canceller();
        }
        true
    }

    /// Install the hook run when a consumer cancels
    pub fn set_canceller<F>(&self, canceller: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.outcome.is_none() {
            state.canceller = Some(Box::new(canceller));
        }
    }

    fn settle(&self, outcome: HostResult<HostValue>) -> bool {
        let (callbacks, wakers) = {
            let mut state = self.inner.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            state.canceller = None;
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.wakers),
            )
        };
        self.inner.ready.notify_all();
        for waker in wakers {
            waker.wake();
        }
        for callback in callbacks {
            callback(&outcome);
        }
        true
    }

    /// Run `callback` once settled; immediately if already settled
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&HostResult<HostValue>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.inner.state.lock();
            match &state.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    state.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&outcome);
    }

    pub fn status(&self) -> FutureStatus {
        match &self.inner.state.lock().outcome {
            None => FutureStatus::Pending,
            Some(Ok(_)) => FutureStatus::Completed,
            Some(Err(HostError::Cancelled)) => FutureStatus::Cancelled,
            Some(Err(_)) => FutureStatus::Failed,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status() == FutureStatus::Pending
    }

    /// The outcome, if settled
    pub fn result(&self) -> Option<HostResult<HostValue>> {
        self.inner.state.lock().outcome.clone()
    }

    /// Block the current thread until settled
    pub fn wait(&self) -> HostResult<HostValue> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            self.inner.ready.wait(&mut state);
        }
    }

    /// Block up to `timeout`; `None` if still pending
    pub fn wait_timeout(&self, timeout: Duration) -> Option<HostResult<HostValue>> {
        let mut state = self.inner.state.lock();
        if state.outcome.is_none() {
            self.inner.ready.wait_for(&mut state, timeout);
        }
        state.outcome.clone()
    }

    pub fn ptr_eq(&self, other: &HostFuture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for HostFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostFuture({:?})", self.status())
    }
}

impl Future for HostFuture {
    type Output = HostResult<HostValue>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.state.lock();
        match &state.outcome {
            Some(outcome) => Poll::Ready(outcome.clone()),
            None => {
                if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    state.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}
