use std::{
    fmt,
    future::Future as StdFuture,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use crate::{
    executor::{default_executor, Executor},
    state::CompletionState,
    Error, Outcome,
};

/// The read side of a value that becomes available asynchronously.
///
/// A `Future` never blocks on its own: work is attached to it with
/// [`on_complete`](Future::on_complete) and the combinators, and runs on the
/// executor of the promise once there is an outcome. Clones observe the same
/// outcome.
///
/// In async code a `Future` can also be `.await`ed directly.
///
/// # Examples
///
/// ```
/// use promise_flow::Future;
/// use futures::executor::block_on;
///
/// let doubled = Future::successful(21).map(|n| n * 2);
/// assert_eq!(block_on(doubled).unwrap(), 42);
/// ```
pub struct Future<T> {
    state: Arc<CompletionState<T>>,
}

impl<T> Future<T> {
    pub(crate) fn from_state(state: Arc<CompletionState<T>>) -> Self {
        Self { state }
    }

    pub(crate) fn executor(&self) -> Arc<dyn Executor> {
        self.state.executor().clone()
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }
}

impl<T: Clone + Send + Sync + 'static> Future<T> {
    /// An already succeeded future on the default executor.
    pub fn successful(value: T) -> Self {
        Self::completed_on(Ok(value), default_executor())
    }

    /// An already failed future on the default executor.
    pub fn failed(err: Error) -> Self {
        Self::completed_on(Err(err), default_executor())
    }

    pub fn completed_on(outcome: Outcome<T>, executor: Arc<dyn Executor>) -> Self {
        Self::from_state(Arc::new(CompletionState::completed(outcome, executor)))
    }

    /// Runs `continuation` with the outcome of this future, exactly once.
    ///
    /// The continuation always goes through the executor, even when the
    /// future has already completed; it is never called from inside
    /// `on_complete` itself.
    pub fn on_complete<F>(&self, continuation: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        self.state.on_complete(Box::new(continuation));
    }

    pub fn on_success<F>(&self, continuation: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.on_complete(move |outcome| {
            if let Ok(value) = outcome {
                continuation(value)
            }
        });
    }

    pub fn on_failure<F>(&self, continuation: F)
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.on_complete(move |outcome| {
            if let Err(err) = outcome {
                continuation(err)
            }
        });
    }

    /// The outcome, if the future has completed.
    pub fn peek(&self) -> Option<Outcome<T>> {
        self.state.peek()
    }

    /// Blocks the calling thread until the future completes.
    ///
    /// This is for top-level driver code. Calling it from inside a
    /// continuation can starve or deadlock the executor that is supposed to
    /// complete the future.
    pub fn wait(&self) -> Outcome<T> {
        self.state.wait()
    }

    /// Like [`wait`](Future::wait), giving up with `None` after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        self.state.wait_timeout(timeout)
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> StdFuture for Future<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.state.poll_outcome(cx.waker()) {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Future({:?})", self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{executor::ManualExecutor, Promise};
    use futures::executor::block_on;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::channel,
    };
    use std::thread;

    #[test]
    fn late_registration_runs_once_asynchronously() {
        let exec = ManualExecutor::new();
        let future = Future::completed_on(Ok(42), exec.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = channel();
        let counter = calls.clone();
        future.on_complete(move |outcome| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(outcome.unwrap()).unwrap();
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        exec.run_until_idle();
        assert_eq!(rx.try_recv().unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        exec.run_until_idle();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_registration_on_pool() {
        let future = Future::successful(42);
        let (tx, rx) = channel();
        future.on_complete(move |outcome| tx.send(outcome.unwrap()).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn success_and_failure_filters() {
        let exec = ManualExecutor::new();
        let ok = Future::completed_on(Ok(1), exec.clone());
        let failed = Future::<i32>::completed_on(Err(Error::msg("bad")), exec.clone());
        let (tx, rx) = channel();
        let (tx2, tx3, tx4) = (tx.clone(), tx.clone(), tx.clone());
        ok.on_success(move |v| tx.send(format!("ok {v}")).unwrap());
        ok.on_failure(move |e| tx2.send(format!("err {e}")).unwrap());
        failed.on_success(move |v| tx3.send(format!("ok {v}")).unwrap());
        failed.on_failure(move |e| tx4.send(format!("err {e}")).unwrap());
        exec.run_until_idle();
        let got: Vec<String> = rx.try_iter().collect();
        assert_eq!(got, vec!["ok 1".to_owned(), "err bad".to_owned()]);
    }

    #[test]
    fn await_resolves_from_another_thread() {
        let promise = Promise::new();
        let future = promise.future();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.succeed(String::from("🍓")).unwrap();
        });
        let consumer = thread::spawn(move || block_on(async { future.await }));
        producer.join().expect("The producer thread has panicked");
        let value = consumer.join().expect("The consumer thread has panicked");
        assert_eq!(value.unwrap(), "🍓");
    }

    #[test]
    fn awaiting_twice_sees_same_outcome() {
        let promise = Promise::<u8>::new();
        let a = promise.future();
        let b = a.clone();
        promise.fail(Error::msg("reject!!")).unwrap();
        let first = block_on(a).unwrap_err();
        let second = block_on(b).unwrap_err();
        assert_eq!(first.to_string(), second.to_string());
    }

    #[test]
    fn wait_timeout_on_pending() {
        let promise = Promise::<u8>::new();
        assert!(promise.future().wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn debug_output() {
        let exec = ManualExecutor::new();
        let future = Future::completed_on(Ok(5), exec);
        assert_eq!(format!("{future:?}"), "Future(Succeeded(5))");
    }
}
