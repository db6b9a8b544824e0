//! Bridging callback-style APIs into futures.
use std::sync::Arc;

use crate::{
    executor::{default_executor, Executor},
    future::Future,
    promise::Promise,
    Error,
};

/// Success handler handed to a callback-style API.
pub type OnSuccess<T> = Box<dyn FnOnce(T) + Send + 'static>;
/// Failure handler handed to a callback-style API.
pub type OnError = Box<dyn FnOnce(Error) + Send + 'static>;

/// Wraps an API that reports through an `(on_success, on_error)` pair of
/// callbacks into one that returns a [`Future`].
///
/// `start` is called right away with the two handlers. Whichever handler is
/// called first decides the outcome; later calls are ignored. If both
/// handlers are dropped without being called, the future fails with
/// [`Error::PromiseDropped`].
///
/// # Examples
///
/// ```
/// use promise_flow::from_callbacks;
/// use std::thread;
///
/// fn fetch(url: &str, on_ok: impl FnOnce(String) + Send + 'static) {
///     let body = format!("<html>{url}</html>");
///     thread::spawn(move || on_ok(body));
/// }
///
/// let body = from_callbacks(|on_ok, _on_err| fetch("a.example", on_ok));
/// assert_eq!(body.wait().unwrap(), "<html>a.example</html>");
/// ```
pub fn from_callbacks<T, F>(start: F) -> Future<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(OnSuccess<T>, OnError),
{
    from_callbacks_on(default_executor(), start)
}

/// [`from_callbacks`] with continuations running on `executor`.
pub fn from_callbacks_on<T, F>(executor: Arc<dyn Executor>, start: F) -> Future<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(OnSuccess<T>, OnError),
{
    let promise = Promise::with_executor(executor);
    let future = promise.future();
    let on_error = promise.clone();
    start(
        Box::new(move |value| {
            if promise.succeed(value).is_err() {
                log::trace!("success callback ignored; outcome already decided");
            }
        }),
        Box::new(move |err| {
            if on_error.fail(err).is_err() {
                log::trace!("error callback ignored; outcome already decided");
            }
        }),
    );
    future
}
