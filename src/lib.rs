//! Futures and promises driven by continuations instead of polling.
//!
//! A [`Promise`] is the write side of a value that becomes available later; a
//! [`Future`] is the read side. Producers complete the promise from whatever
//! thread their work finishes on, and consumers compose futures with
//! [`Future::map`], [`Future::flat_map`], [`Future::recover`] and [`sequence`]
//! without nesting callbacks or sharing counters.
//!
//! Continuations never run inline with the code that registers them or with
//! the code that completes the promise. They are handed to an [`Executor`],
//! by default a process-wide [`ThreadPool`].
//!
//! # Examples
//!
//! ```
//! use promise_flow::{sequence, Promise};
//! use std::thread;
//!
//! let lengths: Vec<_> = ["alpha", "beta", "gamma"]
//!     .into_iter()
//!     .map(|word| {
//!         let promise = Promise::new();
//!         let future = promise.future();
//!         thread::spawn(move || promise.succeed(word.len()).unwrap());
//!         future.map(|len| len * 2)
//!     })
//!     .collect();
//!
//! assert_eq!(sequence(lengths).wait().unwrap(), vec![10, 8, 10]);
//! ```
use std::sync::Arc;

pub mod adapt;
pub mod combinators;
pub mod executor;
pub mod future;
pub mod promise;
mod state;

pub use adapt::{from_callbacks, from_callbacks_on};
pub use combinators::{sequence, traverse};
pub use executor::{default_executor, Executor, ManualExecutor, Task, ThreadPool, ThreadPoolBuilder};
pub use future::Future;
pub use promise::Promise;

/// Terminal result of a future: `Ok` when it succeeded, `Err` when it failed.
pub type Outcome<T> = Result<T, Error>;

type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Why a future failed.
///
/// Errors are values inside a pipeline: they travel unchanged through `map`,
/// `flat_map` and `sequence` until something recovers from them. Cloning is
/// cheap, every continuation of a failed future observes the same error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Failure reported by the producer of the value.
    #[error(transparent)]
    Domain(SharedError),
    /// A transformation passed to a combinator reported an error.
    #[error("transformation failed: {0}")]
    Evaluation(SharedError),
    /// A transformation passed to a combinator panicked.
    #[error("transformation panicked: {0}")]
    Panicked(String),
    /// Every handle to the promise was dropped before it was completed.
    #[error("promise dropped before completion")]
    PromiseDropped,
}

impl Error {
    /// A domain error wrapping the producer's own error type.
    pub fn domain<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Domain(Arc::new(err))
    }

    /// A domain error carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        let boxed: Box<dyn std::error::Error + Send + Sync> = message.into().into();
        Error::Domain(Arc::from(boxed))
    }

    pub fn evaluation<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Evaluation(Arc::new(err))
    }

    /// Builds a `Panicked` error from a payload caught by `catch_unwind`.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Error::Panicked(panic_message(payload.as_ref()))
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// A promise was completed a second time.
///
/// This is a programming error on the producer side and is returned to the
/// caller of [`Promise::succeed`] or [`Promise::fail`]; the outcome already
/// recorded is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("promise already completed")]
pub struct AlreadyCompleted;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_displays_its_message() {
        assert_eq!(Error::msg("connection reset").to_string(), "connection reset");
    }

    #[test]
    fn domain_keeps_source_message() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer hung up");
        let err = Error::domain(io);
        assert!(matches!(err, Error::Domain(_)));
        assert_eq!(err.to_string(), "peer hung up");
    }

    #[test]
    fn evaluation_wraps_source() {
        let err = Error::evaluation(std::fmt::Error);
        assert!(matches!(err, Error::Evaluation(_)));
        assert!(err.to_string().starts_with("transformation failed"));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = Error::from_panic(Box::new("boom"));
        assert_eq!(err.to_string(), "transformation panicked: boom");
        let err = Error::from_panic(Box::new(String::from("bang")));
        assert_eq!(err.to_string(), "transformation panicked: bang");
        let err = Error::from_panic(Box::new(7_u8));
        assert_eq!(err.to_string(), "transformation panicked: non-string panic payload");
    }

    #[test]
    fn errors_clone_share_source() {
        let err = Error::msg("x");
        let copy = err.clone();
        match (err, copy) {
            (Error::Domain(a), Error::Domain(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => panic!("expected domain errors"),
        }
    }
}
