//! Error taxonomy shared by the loop, promises, and coroutines.
//!
//! Backends report failures as [`std::io::Error`] and are converted at the
//! seam; everything above the poller speaks [`Error`]. The enum is `Clone`
//! because a single rejection reason fans out to every continuation that
//! subscribed to the rejected promise.

use std::os::unix::io::RawFd;

/// Errors produced by the runtime.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Programmer mistake: invalid generator step, double arming,
    /// resolving an awaitable with itself, and similar misuse.
    #[error("logic error: {0}")]
    Logic(String),

    /// A watcher was used after `free`.
    #[error("watcher used after free")]
    Freed,

    /// The file descriptor is already registered with this manager.
    #[error("file descriptor {0} is already registered")]
    Busy(RawFd),

    /// `run` was invoked while the loop is running, or the default loop
    /// was replaced while running.
    #[error("event loop is already running")]
    AlreadyRunning,

    /// The requested capability is not available on this loop.
    #[error("not supported: {0}")]
    Unsupported(&'static str),

    /// An awaitable was cancelled.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A timeout adapter fired before the upstream awaitable settled.
    #[error("operation timed out")]
    Timeout,

    /// Every input of `any` rejected; carries the reasons in input order.
    #[error("all awaitables rejected ({} reasons)", .0.len())]
    MultiReason(Vec<Error>),

    /// Backend-reported failure.
    #[error("runtime failure: {0}")]
    Runtime(String),

    /// A `done` chain ended in a rejection nobody handled.
    #[error("uncaught rejection: {0}")]
    Uncaught(Box<Error>),
}

impl Error {
    /// Default cancellation reason.
    pub(crate) fn cancelled() -> Self {
        Error::Cancelled("awaitable cancelled".into())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Runtime(err.to_string())
    }
}
