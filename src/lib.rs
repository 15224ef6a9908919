//! Single-threaded event loop with promise chaining and generator-style
//! coroutines.
//!
//! This crate multiplexes I/O readiness, timers, UNIX signals, idle
//! callbacks, and cross-task coordination over one OS thread. Long
//! flows are written as straight-line generator state machines that
//! suspend on awaitables; the runtime drives them cooperatively.
//!
//! # Architecture
//!
//! - **LoopHandle**: the event loop — watcher managers, deferred queue,
//!   and the tick pipeline over a pluggable poller backend
//! - **Promise**: single-assignment awaitable with deferred
//!   continuations, cancellation propagation, and delay/timeout adapters
//! - **Coroutine**: driver turning a [`Generator`] into an awaitable
//! - **facade**: free functions forwarding to the thread's default loop
//! - **reactor**: `epoll`/`kqueue` backends and the portable `poll(2)`
//!   fallback behind the [`Poller`](reactor::Poller) trait
//! - **LoopBuilder**: fluent builder for loop instantiation

mod coroutine;
mod error;
mod promise;
pub mod reactor;
mod runtime;

pub use coroutine::{Coroutine, GenStep, Generator, Yielded};
pub use error::Error;
pub use promise::{all, any, choose, iterate, map, reduce, retry, settle};
pub use promise::{Outcome, Promise, Resolver};
pub use runtime::{context, facade, Immediate, IoWatcher, LoopBuilder, LoopHandle, Signal, Timer};
