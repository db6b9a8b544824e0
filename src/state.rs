use std::{
    fmt,
    mem,
    sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError},
    task::Waker,
    time::{Duration, Instant},
};

use crate::{executor::Executor, AlreadyCompleted, Outcome};

pub(crate) type Continuation<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

enum Waiters<T> {
    Open {
        continuations: Vec<Continuation<T>>,
        // Wakers of tasks polling the future through `.await`.
        wakers: Vec<Waker>,
    },
    Drained,
}

/// The cell shared by a promise and its futures.
///
/// `outcome` is written exactly once; `OnceLock::set` is the race every
/// completer takes part in and only one wins. `waiters` is locked only to
/// register or drain, never while user code runs.
pub(crate) struct CompletionState<T> {
    outcome: OnceLock<Outcome<T>>,
    waiters: Mutex<Waiters<T>>,
    drained: Condvar,
    executor: Arc<dyn Executor>,
}

impl<T> CompletionState<T> {
    pub(crate) fn pending(executor: Arc<dyn Executor>) -> Self {
        Self {
            outcome: OnceLock::new(),
            waiters: Mutex::new(Waiters::Open {
                continuations: Vec::new(),
                wakers: Vec::new(),
            }),
            drained: Condvar::new(),
            executor,
        }
    }

    pub(crate) fn completed(outcome: Outcome<T>, executor: Arc<dyn Executor>) -> Self {
        Self {
            outcome: OnceLock::from(outcome),
            waiters: Mutex::new(Waiters::Drained),
            drained: Condvar::new(),
            executor,
        }
    }

    pub(crate) fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.outcome.get().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Waiters<T>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> CompletionState<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn peek(&self) -> Option<Outcome<T>> {
        self.outcome.get().cloned()
    }

    /// Moves the state to its terminal outcome and schedules everything that
    /// was waiting for it.
    pub(crate) fn complete(&self, outcome: Outcome<T>) -> Result<(), AlreadyCompleted> {
        self.outcome.set(outcome).map_err(|_| AlreadyCompleted)?;

        let waiters = mem::replace(&mut *self.lock(), Waiters::Drained);
        self.drained.notify_all();

        if let Waiters::Open {
            continuations,
            wakers,
        } = waiters
        {
            for waker in wakers {
                waker.wake();
            }
            for continuation in continuations {
                self.dispatch(continuation);
            }
        }
        Ok(())
    }

    /// Runs `continuation` with the outcome once there is one, always by way
    /// of the executor.
    pub(crate) fn on_complete(&self, continuation: Continuation<T>) {
        {
            let mut waiters = self.lock();
            if let Waiters::Open { continuations, .. } = &mut *waiters {
                continuations.push(continuation);
                return;
            }
        }
        self.dispatch(continuation);
    }

    /// Returns the outcome if there is one, otherwise remembers `waker`.
    pub(crate) fn poll_outcome(&self, waker: &Waker) -> Option<Outcome<T>> {
        let mut waiters = self.lock();
        match &mut *waiters {
            Waiters::Open { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(waker)) {
                    wakers.push(waker.clone());
                }
                None
            }
            Waiters::Drained => self.peek(),
        }
    }

    pub(crate) fn wait(&self) -> Outcome<T> {
        let mut waiters = self.lock();
        while let Waiters::Open { .. } = &*waiters {
            waiters = self
                .drained
                .wait(waiters)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(waiters);
        self.terminal()
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.wait());
        };
        let mut waiters = self.lock();
        while let Waiters::Open { .. } = &*waiters {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            waiters = self
                .drained
                .wait_timeout(waiters, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        drop(waiters);
        Some(self.terminal())
    }

    fn terminal(&self) -> Outcome<T> {
        match self.peek() {
            Some(outcome) => outcome,
            // `Drained` is only ever stored after `outcome` has been set.
            None => unreachable!("drained completion state without an outcome"),
        }
    }

    fn dispatch(&self, continuation: Continuation<T>) {
        let outcome = self.terminal();
        self.executor
            .schedule(Box::new(move || continuation(outcome)));
    }
}

impl<T: fmt::Debug> fmt::Debug for CompletionState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome.get() {
            Some(Ok(value)) => write!(f, "Succeeded({value:?})"),
            Some(Err(err)) => write!(f, "Failed({err})"),
            None => f.write_str("Pending"),
        }
    }
}
