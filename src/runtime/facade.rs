//! Free-function facade over the default loop.
//!
//! Collaborating layers (stream and socket objects, promise adapters,
//! coroutines) reach the loop through these accessors instead of
//! threading a handle everywhere. Each call forwards to
//! [`context::current`](crate::runtime::context::current).
//!
//! `poll`-for-readable and the write-side counterpart are named
//! [`readable`] and [`writable`] here; `await` is reserved in Rust.

use crate::error::Error;
use crate::runtime::context;
use crate::runtime::immediate::Immediate;
use crate::runtime::io::IoWatcher;
use crate::runtime::signal::Signal;
use crate::runtime::timer::Timer;

use libc::c_int;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

/// Creates a read-mode watcher for `fd` on the default loop.
pub fn readable(
    fd: RawFd,
    callback: impl FnMut(RawFd, bool) + 'static,
) -> Result<Rc<IoWatcher>, Error> {
    context::current().readable(fd, callback)
}

/// Creates a write-mode watcher for `fd` on the default loop.
pub fn writable(
    fd: RawFd,
    callback: impl FnMut(RawFd, bool) + 'static,
) -> Result<Rc<IoWatcher>, Error> {
    context::current().writable(fd, callback)
}

/// Creates and arms a one-shot timer on the default loop.
pub fn timer(interval: Duration, callback: impl FnMut() + 'static) -> Rc<Timer> {
    context::current().timer(interval, callback)
}

/// Creates and arms a periodic timer on the default loop.
pub fn periodic(interval: Duration, callback: impl FnMut() + 'static) -> Rc<Timer> {
    context::current().periodic(interval, callback)
}

/// Schedules `callback` to run when the loop is otherwise idle.
pub fn immediate(callback: impl FnOnce() + 'static) -> Rc<Immediate> {
    context::current().immediate(callback)
}

/// Creates a watcher for a UNIX signal on the default loop.
pub fn signal(signo: c_int, callback: impl FnMut(c_int) + 'static) -> Result<Rc<Signal>, Error> {
    context::current().signal(signo, callback)
}

/// Enqueues a deferred callback for the next tick.
pub fn queue(callback: impl FnOnce() + 'static) {
    context::current().queue(callback);
}

/// Sets the per-tick deferred budget, returning the previous value.
pub fn max_queue_depth(depth: usize) -> usize {
    context::current().max_queue_depth(depth)
}

/// Performs exactly one tick of the default loop.
pub fn tick(blocking: bool) -> Result<(), Error> {
    context::current().tick(blocking)
}

/// Runs the default loop until it is empty or stopped.
pub fn run() -> Result<(), Error> {
    context::current().run()
}

/// Runs the default loop with `init` queued before the first tick.
pub fn run_with(init: impl FnOnce() + 'static) -> Result<(), Error> {
    context::current().run_with(init)
}

/// Stops the default loop after the current tick.
pub fn stop() {
    context::current().stop();
}

pub fn is_running() -> bool {
    context::current().is_running()
}

pub fn is_empty() -> bool {
    context::current().is_empty()
}

/// Force-frees every watcher on the default loop.
pub fn clear() {
    context::current().clear();
}

/// Re-creates backend state after a `fork`.
pub fn re_init() -> Result<(), Error> {
    context::current().re_init()
}

pub fn signal_handling_enabled() -> bool {
    context::current().signal_handling_enabled()
}
