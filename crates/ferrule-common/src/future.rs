//! Completion handle shared by everyone interested in one invocation.
//!
//! An [`InvokeFuture`] is completed exactly once, by whichever of the
//! response path, the timeout scanner or a connection-loss sweep gets there
//! first. Callers can block on it ([`InvokeFuture::get_result`]), attach a
//! [`Listener`], or `.await` it.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::protocol::error::{FerruleError, Result, TimeoutKind};

/// Completion callback. Exactly one of the two methods is called, once.
///
/// Callbacks run on whichever thread completed the future (often a network
/// I/O task) and must not block. Panics are caught and logged.
pub trait Listener<T>: Send + Sync {
    fn complete(&self, value: &T);
    fn failure(&self, error: &FerruleError);
}

/// Adapts a closure over `&Result<T>` into a [`Listener`].
pub struct FnListener<F>(pub F);

impl<T, F> Listener<T> for FnListener<F>
where
    F: Fn(&Result<T>) + Send + Sync,
    T: Clone,
{
    fn complete(&self, value: &T) {
        (self.0)(&Ok(value.clone()))
    }

    fn failure(&self, error: &FerruleError) {
        (self.0)(&Err(error.clone()))
    }
}

struct State<T> {
    outcome: Option<Result<T>>,
    listeners: Vec<Box<dyn Listener<T>>>,
    wakers: Vec<Waker>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    done: Condvar,
}

/// Cloneable handle over a single-assignment result slot.
pub struct InvokeFuture<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for InvokeFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> InvokeFuture<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    outcome: None,
                    listeners: Vec::new(),
                    wakers: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// An already-successful future.
    pub fn completed(value: T) -> Self {
        let future = Self::new();
        future.complete(value);
        future
    }

    /// An already-failed future.
    pub fn failed(error: FerruleError) -> Self {
        let future = Self::new();
        future.fail(error);
        future
    }

    /// Completes with a value. Returns `false` if already completed.
    pub fn complete(&self, value: T) -> bool {
        self.set(Ok(value))
    }

    /// Completes with an error. Returns `false` if already completed.
    pub fn fail(&self, error: FerruleError) -> bool {
        self.set(Err(error))
    }

    /// Completes with `outcome` unless someone already did.
    pub fn set(&self, outcome: Result<T>) -> bool {
        let (listeners, wakers) = {
            let mut state = self.inner.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            (
                std::mem::take(&mut state.listeners),
                std::mem::take(&mut state.wakers),
            )
        };

        for listener in listeners {
            notify_listener(listener.as_ref(), &outcome);
        }
        self.inner.done.notify_all();
        for waker in wakers {
            waker.wake();
        }
        true
    }

    pub fn is_done(&self) -> bool {
        self.inner.state.lock().outcome.is_some()
    }

    /// The outcome if already completed, without blocking.
    pub fn try_result(&self) -> Option<Result<T>> {
        self.inner.state.lock().outcome.clone()
    }

    /// Blocks until completion or until `timeout` elapses.
    ///
    /// Wakeups are re-checked against both the outcome and the wall clock, so
    /// spurious or early wakeups never return a wrong answer. Giving up
    /// yields a [`TimeoutKind::Wait`] error and leaves the future pending.
    pub fn get_result(&self, timeout: Duration) -> Result<T> {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            if Instant::now() >= deadline {
                return Err(FerruleError::Timeout {
                    kind: TimeoutKind::Wait,
                    millis: start.elapsed().as_millis() as u64,
                });
            }
            self.inner.done.wait_until(&mut state, deadline);
        }
    }

    /// Registers a completion callback.
    ///
    /// If the future is already complete the listener runs immediately on
    /// the calling thread.
    pub fn add_listener(&self, listener: impl Listener<T> + 'static) {
        let outcome = {
            let mut state = self.inner.state.lock();
            match &state.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    state.listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        notify_listener(&listener, &outcome);
    }
}

impl<T: Clone + Send + 'static> Default for InvokeFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn notify_listener<T>(listener: &dyn Listener<T>, outcome: &Result<T>) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| match outcome {
        Ok(value) => listener.complete(value),
        Err(error) => listener.failure(error),
    }));
    if result.is_err() {
        tracing::error!("invocation listener panicked; panic contained");
    }
}

impl<T: Clone + Send + 'static> Future for InvokeFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.state.lock();
        if let Some(outcome) = &state.outcome {
            return Poll::Ready(outcome.clone());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T> fmt::Debug for InvokeFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let done = self.inner.state.lock().outcome.is_some();
        f.debug_struct("InvokeFuture").field("done", &done).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct Counting {
        ok: Arc<AtomicUsize>,
        err: Arc<AtomicUsize>,
    }

    impl Listener<u32> for Counting {
        fn complete(&self, _value: &u32) {
            self.ok.fetch_add(1, Ordering::SeqCst);
        }

        fn failure(&self, _error: &FerruleError) {
            self.err.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_first_completion_wins() {
        let future = InvokeFuture::new();
        assert!(future.complete(1u32));
        assert!(!future.complete(2));
        assert!(!future.fail(FerruleError::Closed(1)));
        assert_eq!(future.try_result().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_get_result_wakes_on_completion() {
        let future = InvokeFuture::<u32>::new();
        let completer = future.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(9);
        });
        assert_eq!(future.get_result(Duration::from_secs(5)).unwrap(), 9);
        handle.join().unwrap();
    }

    #[test]
    fn test_get_result_times_out_by_wall_clock() {
        let future = InvokeFuture::<u32>::new();
        let start = Instant::now();
        let err = future.get_result(Duration::from_millis(30)).unwrap_err();
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(matches!(
            err,
            FerruleError::Timeout {
                kind: TimeoutKind::Wait,
                ..
            }
        ));
        assert!(!future.is_done());
    }

    #[test]
    fn test_listener_before_and_after_completion() {
        let ok = Arc::new(AtomicUsize::new(0));
        let err = Arc::new(AtomicUsize::new(0));

        let future = InvokeFuture::<u32>::new();
        future.add_listener(Counting {
            ok: ok.clone(),
            err: err.clone(),
        });
        assert_eq!(ok.load(Ordering::SeqCst), 0);

        future.complete(3);
        assert_eq!(ok.load(Ordering::SeqCst), 1);

        // Attached late: delivered synchronously.
        future.add_listener(Counting {
            ok: ok.clone(),
            err: err.clone(),
        });
        assert_eq!(ok.load(Ordering::SeqCst), 2);
        assert_eq!(err.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_listener_is_contained() {
        let future = InvokeFuture::<u32>::new();
        future.add_listener(FnListener(|_: &Result<u32>| panic!("listener bug")));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        future.add_listener(FnListener(move |r: &Result<u32>| {
            assert!(r.is_err());
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(future.fail(FerruleError::Closed(3)));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_await_completion() {
        let future = InvokeFuture::<String>::new();
        let completer = future.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            completer.complete("done".to_string());
        });
        assert_eq!(future.await.unwrap(), "done");
    }
}
