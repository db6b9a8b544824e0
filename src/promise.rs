use std::{fmt, sync::Arc};

use crate::{
    executor::{default_executor, Executor},
    future::Future,
    state::CompletionState,
    AlreadyCompleted, Error, Outcome,
};

/// The write side of a [`Future`].
///
/// Clones of a `Promise` complete the same future and may race each other
/// from different threads; the first completion wins and every later one
/// gets [`AlreadyCompleted`]. If the last clone is dropped while the future
/// is still pending, the future fails with [`Error::PromiseDropped`].
///
/// # Examples
///
/// ```
/// use promise_flow::{AlreadyCompleted, Promise};
///
/// let promise = Promise::new();
/// let future = promise.future();
///
/// promise.succeed("🍓").unwrap();
/// assert_eq!(promise.succeed("🍌"), Err(AlreadyCompleted));
/// assert_eq!(future.wait().unwrap(), "🍓");
/// ```
pub struct Promise<T: Clone + Send + Sync + 'static> {
    completer: Arc<Completer<T>>,
}

struct Completer<T: Clone + Send + Sync + 'static> {
    state: Arc<CompletionState<T>>,
}

impl<T: Clone + Send + Sync + 'static> Drop for Completer<T> {
    /// If this is an unresolved promise, fail its future.
    fn drop(&mut self) {
        if !self.state.is_completed()
            && self.state.complete(Err(Error::PromiseDropped)).is_ok()
        {
            log::trace!("promise dropped while pending");
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// A pending promise whose continuations run on [`default_executor`].
    pub fn new() -> Self {
        Self::with_executor(default_executor())
    }

    /// A pending promise whose continuations run on `executor`.
    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        Self {
            completer: Arc::new(Completer {
                state: Arc::new(CompletionState::pending(executor)),
            }),
        }
    }

    /// The future completed by this promise. Every call returns a view of the
    /// same state.
    pub fn future(&self) -> Future<T> {
        Future::from_state(self.completer.state.clone())
    }

    pub fn succeed(&self, value: T) -> Result<(), AlreadyCompleted> {
        self.complete(Ok(value))
    }

    pub fn fail(&self, err: Error) -> Result<(), AlreadyCompleted> {
        self.complete(Err(err))
    }

    pub fn complete(&self, outcome: Outcome<T>) -> Result<(), AlreadyCompleted> {
        self.completer.state.complete(outcome)
    }

    /// Completes this promise with whatever `future` ends with.
    ///
    /// The forwarding happens in a continuation, so losing a race against
    /// another completer is only logged.
    pub fn complete_with(&self, future: &Future<T>) {
        let promise = self.clone();
        future.on_complete(move |outcome| {
            if promise.complete(outcome).is_err() {
                log::trace!("forwarded outcome lost the completion race");
            }
        });
    }

    pub fn is_completed(&self) -> bool {
        self.completer.state.is_completed()
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            completer: self.completer.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + fmt::Debug + 'static> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Promise({:?})", self.completer.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ManualExecutor;
    use std::thread;

    #[test]
    fn succeed_then_fail_is_rejected() {
        let promise = Promise::with_executor(ManualExecutor::new());
        let future = promise.future();
        promise.succeed(1).unwrap();
        assert_eq!(promise.fail(Error::msg("too late")), Err(AlreadyCompleted));
        assert_eq!(promise.succeed(2), Err(AlreadyCompleted));
        assert_eq!(future.peek().unwrap().unwrap(), 1);
    }

    #[test]
    fn fail_then_succeed_is_rejected() {
        let promise = Promise::with_executor(ManualExecutor::new());
        promise.fail(Error::msg("nope")).unwrap();
        assert_eq!(promise.succeed(3), Err(AlreadyCompleted));
        let err = promise.future().peek().unwrap().unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn futures_share_state() {
        let promise = Promise::with_executor(ManualExecutor::new());
        let a = promise.future();
        let b = promise.future();
        assert!(!a.is_completed());
        promise.succeed("x".to_owned()).unwrap();
        assert_eq!(a.peek().unwrap().unwrap(), "x");
        assert_eq!(b.peek().unwrap().unwrap(), "x");
    }

    #[test]
    fn dropped_promise_fails_future() {
        let promise = Promise::<String>::with_executor(ManualExecutor::new());
        let future = promise.future();
        let clone = promise.clone();
        drop(promise);
        assert!(!future.is_completed());
        drop(clone);
        assert!(matches!(future.wait(), Err(Error::PromiseDropped)));
    }

    #[test]
    fn dropping_completed_promise_keeps_outcome() {
        let promise = Promise::with_executor(ManualExecutor::new());
        let future = promise.future();
        promise.succeed(10).unwrap();
        drop(promise);
        assert_eq!(future.wait().unwrap(), 10);
    }

    #[test]
    fn racing_clones_have_one_winner() {
        let promise = Promise::with_executor(ManualExecutor::new());
        let future = promise.future();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let promise = promise.clone();
                thread::spawn(move || promise.succeed(i).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("The completer thread has panicked"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!((0..4).contains(&future.wait().unwrap()));
    }

    #[test]
    fn complete_with_forwards_outcome() {
        let exec = ManualExecutor::new();
        let source = Promise::with_executor(exec.clone());
        let target = Promise::with_executor(exec.clone());
        target.complete_with(&source.future());
        source.succeed(8).unwrap();
        exec.run_until_idle();
        assert_eq!(target.future().peek().unwrap().unwrap(), 8);
    }

    #[test]
    fn promise_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Promise<String>>();
    }
}
