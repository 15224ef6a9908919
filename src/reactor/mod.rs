//! Pluggable I/O readiness backends.
//!
//! The event loop talks to the operating system through the [`Poller`]
//! trait: register interest in a descriptor, wait for readiness with an
//! optional timeout, and re-create kernel state after a `fork`. Three
//! level-triggered implementations exist:
//!
//! - `epoll` on Linux
//! - `kqueue` on the BSDs and macOS
//! - `poll(2)` everywhere else, and on request for tests
//!
//! [`default_poller`] picks the accelerated backend for the platform and
//! falls back to the portable one.

mod event;
#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
))]
mod kqueue;
mod poll;

pub use event::{Event, Interest};
pub use poll::PollBackend;

pub(crate) use event::{set_cloexec, set_nonblocking};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use epoll::EpollBackend;
#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
))]
pub use kqueue::KqueueBackend;

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Readiness backend capability.
///
/// Registrations are level triggered and keyed by descriptor; the loop
/// keeps the merged read/write interest per descriptor and calls
/// [`modify`](Poller::modify) when it changes. `reinit` must drop every
/// piece of kernel state and start fresh; the loop re-registers armed
/// descriptors afterwards, so inherited registrations from a parent
/// process never leak into the child.
pub trait Poller {
    fn add(&mut self, fd: RawFd, interest: Interest) -> io::Result<()>;

    fn modify(&mut self, fd: RawFd, interest: Interest) -> io::Result<()>;

    fn remove(&mut self, fd: RawFd) -> io::Result<()>;

    /// Waits for readiness, appending to `events`. `None` blocks until an
    /// event arrives; `Some(Duration::ZERO)` polls without blocking. An
    /// interrupted wait returns `Ok` with no events.
    fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()>;

    fn reinit(&mut self) -> io::Result<()>;
}

/// Builds the preferred backend for this platform.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn default_poller() -> io::Result<Box<dyn Poller>> {
    Ok(Box::new(EpollBackend::new()?))
}

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
))]
pub(crate) fn default_poller() -> io::Result<Box<dyn Poller>> {
    Ok(Box::new(KqueueBackend::new()?))
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
pub(crate) fn default_poller() -> io::Result<Box<dyn Poller>> {
    Ok(Box::new(PollBackend::new()))
}

/// Converts a poll timeout to the millisecond argument `epoll_wait` and
/// `poll(2)` expect, rounding up so short waits do not spin.
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(t) => {
            let mut ms = t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
            if Duration::from_millis(ms as u64) < t {
                ms = ms.saturating_add(1);
            }
            ms
        }
    }
}
