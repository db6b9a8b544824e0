//! Composition of futures.
//!
//! Every combinator allocates a fresh [`Promise`] on the executor of its
//! source, registers a continuation on the source, and hands back the new
//! promise's future. Nothing here blocks.
//!
//! Failures pass through untouched until [`Future::recover`] or
//! [`Future::recover_with`] intercepts them. A transformation that panics, or
//! that returns `Err` from [`Future::try_map`], fails the produced future
//! instead of unwinding into the executor.
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex, PoisonError},
};

use crate::{executor::default_executor, future::Future, promise::Promise, Error, Outcome};

fn evaluate<S>(f: impl FnOnce() -> S) -> Outcome<S> {
    catch_unwind(AssertUnwindSafe(f)).map_err(Error::from_panic)
}

/// Completes a promise that other continuations may already have completed.
fn settle<S: Clone + Send + Sync + 'static>(promise: &Promise<S>, outcome: Outcome<S>) {
    if promise.complete(outcome).is_err() {
        log::trace!("combinator outcome lost the completion race");
    }
}

impl<T> Future<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn derived<S: Clone + Send + Sync + 'static>(&self) -> Promise<S> {
        Promise::with_executor(self.executor())
    }

    /// Transforms the value of this future once it succeeds.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_flow::Future;
    ///
    /// let len = Future::successful("strawberry").map(str::len);
    /// assert_eq!(len.wait().unwrap(), 10);
    /// ```
    pub fn map<S, F>(&self, f: F) -> Future<S>
    where
        S: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> S + Send + 'static,
    {
        let promise = self.derived();
        let future = promise.future();
        self.on_complete(move |outcome| {
            let mapped = outcome.and_then(|value| evaluate(move || f(value)));
            settle(&promise, mapped);
        });
        future
    }

    /// Like [`map`](Future::map) for transformations that can fail; an `Err`
    /// fails the produced future with [`Error::Evaluation`].
    pub fn try_map<S, E, F>(&self, f: F) -> Future<S>
    where
        S: Clone + Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce(T) -> Result<S, E> + Send + 'static,
    {
        let promise = self.derived();
        let future = promise.future();
        self.on_complete(move |outcome| {
            let mapped = outcome
                .and_then(|value| evaluate(move || f(value)))
                .and_then(|result| result.map_err(Error::evaluation));
            settle(&promise, mapped);
        });
        future
    }

    /// Chains an asynchronous step onto this future.
    ///
    /// If this future fails, `f` is never called and the produced future
    /// fails with the same error. Otherwise the produced future completes
    /// with whatever the future returned by `f` completes with.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_flow::Future;
    ///
    /// let next = Future::successful(5).flat_map(|x| Future::successful(x + 1));
    /// assert_eq!(next.wait().unwrap(), 6);
    /// ```
    pub fn flat_map<S, F>(&self, f: F) -> Future<S>
    where
        S: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Future<S> + Send + 'static,
    {
        let promise = self.derived();
        let future = promise.future();
        self.on_complete(move |outcome| match outcome {
            Ok(value) => match evaluate(move || f(value)) {
                Ok(inner) => promise.complete_with(&inner),
                Err(err) => settle(&promise, Err(err)),
            },
            Err(err) => settle(&promise, Err(err)),
        });
        future
    }

    /// Turns a failure into a value; successes pass through unchanged.
    pub fn recover<F>(&self, f: F) -> Future<T>
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        let promise = self.derived();
        let future = promise.future();
        self.on_complete(move |outcome| {
            let recovered = match outcome {
                Ok(value) => Ok(value),
                Err(err) => evaluate(move || f(err)),
            };
            settle(&promise, recovered);
        });
        future
    }

    /// Turns a failure into another asynchronous attempt.
    pub fn recover_with<F>(&self, f: F) -> Future<T>
    where
        F: FnOnce(Error) -> Future<T> + Send + 'static,
    {
        let promise = self.derived();
        let future = promise.future();
        self.on_complete(move |outcome| match outcome {
            Ok(value) => settle(&promise, Ok(value)),
            Err(err) => match evaluate(move || f(err)) {
                Ok(retry) => promise.complete_with(&retry),
                Err(err) => settle(&promise, Err(err)),
            },
        });
        future
    }

    /// Pairs the values of two futures, failing as soon as either fails.
    pub fn zip<U>(&self, other: &Future<U>) -> Future<(T, U)>
    where
        U: Clone + Send + Sync + 'static,
    {
        let promise = self.derived();
        let future = promise.future();
        let right = other.clone();
        promise.complete_with(&self.flat_map(move |left| right.map(move |r| (left, r))));
        other.on_failure(move |err| settle(&promise, Err(err)));
        future
    }
}

impl<T> Future<Future<T>>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn flatten(&self) -> Future<T> {
        self.flat_map(|inner| inner)
    }
}

struct Gather<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
}

impl<T> Gather<T> {
    /// Stores the value for `index`; returns all values once none is missing.
    fn fill(&mut self, index: usize, value: T) -> Option<Vec<T>> {
        if self.slots[index].replace(value).is_none() {
            self.remaining -= 1;
        }
        if self.remaining > 0 {
            return None;
        }
        self.slots.iter_mut().map(Option::take).collect()
    }
}

/// Waits for every future and collects their values in input order.
///
/// The result fails with the first failure observed among the inputs,
/// without waiting for the rest and without exposing partial results. An
/// empty input succeeds with an empty `Vec`.
///
/// The result runs on the executor of the first input, or on the default
/// executor when there is none.
///
/// # Examples
///
/// ```
/// use promise_flow::{sequence, Future};
///
/// let all = sequence(vec![Future::successful("a"), Future::successful("b")]);
/// assert_eq!(all.wait().unwrap(), vec!["a", "b"]);
/// ```
pub fn sequence<T, I>(futures: I) -> Future<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = Future<T>>,
{
    let futures: Vec<Future<T>> = futures.into_iter().collect();
    let executor = futures
        .first()
        .map(Future::executor)
        .unwrap_or_else(default_executor);
    let promise = Promise::with_executor(executor);
    let result = promise.future();

    if futures.is_empty() {
        settle(&promise, Ok(Vec::new()));
        return result;
    }

    let gather = Arc::new(Mutex::new(Gather {
        slots: vec![None; futures.len()],
        remaining: futures.len(),
    }));
    for (index, future) in futures.into_iter().enumerate() {
        let promise = promise.clone();
        let gather = gather.clone();
        future.on_complete(move |outcome| match outcome {
            Ok(value) => {
                if promise.is_completed() {
                    return;
                }
                let values = gather
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .fill(index, value);
                if let Some(values) = values {
                    settle(&promise, Ok(values));
                }
            }
            Err(err) => settle(&promise, Err(err)),
        });
    }
    result
}

/// Starts one future per item with `f` and sequences them.
pub fn traverse<I, T, F>(items: I, f: F) -> Future<Vec<T>>
where
    I: IntoIterator,
    T: Clone + Send + Sync + 'static,
    F: FnMut(I::Item) -> Future<T>,
{
    sequence(items.into_iter().map(f))
}
