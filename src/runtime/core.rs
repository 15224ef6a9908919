//! The event loop: watcher managers, the deferred queue, and the tick
//! pipeline over a pluggable poller backend.
//!
//! A tick runs in a fixed order: drain the deferred queue (bounded by the
//! queue depth), dispatch signals delivered since the previous tick, fire
//! due timers, poll for I/O readiness, then run immediates if nothing
//! else happened. Uncaught promise rejections collected during the tick
//! are surfaced at the end, either to the registered sink or as the
//! tick's error.

use crate::error::Error;
use crate::reactor::{default_poller, Event, Interest, Poller};
use crate::runtime::immediate::{Immediate, ImmediateManager};
use crate::runtime::io::{IoManager, IoWatcher};
use crate::runtime::queue::DeferredQueue;
use crate::runtime::signal::{Signal, SignalManager};
use crate::runtime::timer::{Timer, TimerManager};

use libc::c_int;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

type ErrorSink = Box<dyn FnMut(Error)>;

pub(crate) struct EventLoop {
    poller: RefCell<Box<dyn Poller>>,
    events: RefCell<Vec<Event>>,
    pub(crate) read_io: IoManager,
    pub(crate) write_io: IoManager,
    timers: TimerManager,
    immediates: ImmediateManager,
    signals: Option<SignalManager>,
    pub(crate) deferred: DeferredQueue,
    running: Cell<bool>,
    stopped: Cell<bool>,
    uncaught: RefCell<VecDeque<Error>>,
    error_sink: RefCell<Option<ErrorSink>>,
}

impl EventLoop {
    pub(crate) fn timers(&self) -> &TimerManager {
        &self.timers
    }

    /// Merged poller interest for `fd` across both I/O managers.
    fn io_interest(&self, fd: RawFd) -> Interest {
        let mut interest = Interest::empty();

        if self.read_io.get(fd).is_some_and(|w| w.pending.get()) {
            interest |= Interest::READ;
        }
        if self.write_io.get(fd).is_some_and(|w| w.pending.get()) {
            interest |= Interest::WRITE;
        }

        interest
    }

    pub(crate) fn arm_io(&self, watcher: &IoWatcher, timeout: Option<Duration>) -> Result<(), Error> {
        if watcher.freed.get() {
            return Err(Error::Freed);
        }
        if watcher.pending.get() {
            return Err(Error::Logic("I/O watcher is already armed".into()));
        }

        let fd = watcher.fd();
        let current = self.io_interest(fd);
        let wanted = current | watcher.mode();

        {
            let mut poller = self.poller.borrow_mut();
            if current.is_empty() {
                poller.add(fd, wanted)?;
            } else {
                poller.modify(fd, wanted)?;
            }
        }

        watcher.pending.set(true);
        watcher.deadline.set(timeout.map(|t| Instant::now() + t));
        Ok(())
    }

    pub(crate) fn disarm_io(&self, watcher: &IoWatcher) -> Result<(), Error> {
        if !watcher.pending.get() {
            return Ok(());
        }

        watcher.pending.set(false);
        watcher.deadline.set(None);

        let fd = watcher.fd();
        let remaining = self.io_interest(fd);
        let mut poller = self.poller.borrow_mut();

        if remaining.is_empty() {
            poller.remove(fd)?;
        } else {
            poller.modify(fd, remaining)?;
        }

        Ok(())
    }

    pub(crate) fn free_io(&self, watcher: &IoWatcher) -> Result<(), Error> {
        self.disarm_io(watcher)?;
        watcher.freed.set(true);

        let manager = if watcher.mode() == Interest::READ {
            &self.read_io
        } else {
            &self.write_io
        };
        manager.remove(watcher.fd());
        Ok(())
    }

    pub(crate) fn free_signal(&self, signal: &Signal) {
        if let Some(signals) = &self.signals {
            signals.remove(signal);
        }
    }

    pub(crate) fn report_uncaught(&self, error: Error) {
        log::warn!("uncaught rejection: {error}");
        self.uncaught.borrow_mut().push_back(error);
    }

    pub(crate) fn set_error_sink(&self, sink: Option<ErrorSink>) {
        *self.error_sink.borrow_mut() = sink;
    }

    pub(crate) fn signal_handling_enabled(&self) -> bool {
        self.signals.is_some()
    }

    pub(crate) fn signals(&self) -> Option<&SignalManager> {
        self.signals.as_ref()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.get()
    }

    pub(crate) fn stop(&self) {
        self.stopped.set(true);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.deferred.is_empty()
            && !self.read_io.has_referenced_pending()
            && !self.write_io.has_referenced_pending()
            && !self.timers.has_referenced_pending()
            && !self.immediates.has_referenced_pending()
            && !self
                .signals
                .as_ref()
                .is_some_and(|s| s.has_referenced_pending())
    }

    pub(crate) fn run(&self, init: Option<Box<dyn FnOnce()>>) -> Result<(), Error> {
        if self.running.get() {
            return Err(Error::AlreadyRunning);
        }

        self.running.set(true);
        self.stopped.set(false);

        if let Some(init) = init {
            self.deferred.push(init);
        }

        log::trace!("run: entering loop");
        let mut result = Ok(());

        while !self.stopped.get() && !self.is_empty() {
            if let Err(error) = self.tick(true) {
                result = Err(error);
                break;
            }
        }

        self.running.set(false);
        log::trace!("run: loop finished");
        result
    }

    pub(crate) fn tick(&self, blocking: bool) -> Result<(), Error> {
        let mut activity = 0usize;

        // 1. Deferred callbacks, up to the per-tick budget.
        activity += self.deferred.drain();

        // 2. Signals delivered since the previous tick.
        if let Some(signals) = &self.signals {
            activity += signals.dispatch();
        }

        // 3. Due timers, in (expiry, insertion) order.
        let now = Instant::now();
        while let Some((timer, generation)) = self.timers.pop_due(now) {
            (timer.callback.borrow_mut())();
            self.timers.rearm_periodic(&timer, generation);
            activity += 1;
        }

        // 4. I/O readiness and per-arming timeouts.
        activity += self.poll_io(blocking, activity)?;

        // 5. Immediates, only when the tick was otherwise idle.
        if activity == 0 {
            while let Some(immediate) = self.immediates.pop_ready() {
                if let Some(callback) = immediate.callback.borrow_mut().take() {
                    callback();
                }
            }
        }

        self.flush_uncaught()
    }

    fn poll_io(&self, blocking: bool, prior_activity: usize) -> Result<usize, Error> {
        let timeout = if !blocking
            || prior_activity > 0
            || !self.deferred.is_empty()
            || self.immediates.has_ready()
        {
            Some(Duration::ZERO)
        } else {
            let deadline = [
                self.timers.next_expiry(),
                self.read_io.next_deadline(),
                self.write_io.next_deadline(),
            ]
            .into_iter()
            .flatten()
            .min();

            // No deadline at all: block until I/O or a signal arrives.
            deadline.map(|d| d.saturating_duration_since(Instant::now()))
        };

        let mut events = std::mem::take(&mut *self.events.borrow_mut());
        events.clear();

        {
            let mut poller = self.poller.borrow_mut();
            poller.poll(&mut events, timeout)?;
        }

        let signal_fd = self.signals.as_ref().map(|s| s.wake_fd());
        let mut activity = 0;

        for event in &events {
            if Some(event.fd) == signal_fd {
                // Wake-up only; the delivery is dispatched in step 2 of
                // the next tick.
                activity += 1;
                continue;
            }

            if event.readable {
                if let Some(watcher) = self.read_io.get(event.fd) {
                    if watcher.is_pending() {
                        self.disarm_io(&watcher)?;
                        (watcher.callback.borrow_mut())(event.fd, false);
                        activity += 1;
                    }
                }
            }

            if event.writable {
                if let Some(watcher) = self.write_io.get(event.fd) {
                    if watcher.is_pending() {
                        self.disarm_io(&watcher)?;
                        (watcher.callback.borrow_mut())(event.fd, false);
                        activity += 1;
                    }
                }
            }
        }

        *self.events.borrow_mut() = events;

        let now = Instant::now();
        let expired: Vec<Rc<IoWatcher>> = self
            .read_io
            .expired(now)
            .into_iter()
            .chain(self.write_io.expired(now))
            .collect();

        for watcher in expired {
            self.disarm_io(&watcher)?;
            (watcher.callback.borrow_mut())(watcher.fd(), true);
            activity += 1;
        }

        Ok(activity)
    }

    fn flush_uncaught(&self) -> Result<(), Error> {
        loop {
            let next = self.uncaught.borrow_mut().pop_front();
            let Some(error) = next else {
                return Ok(());
            };

            // The sink is taken out for the call so it may itself use the
            // loop without re-entering the slot.
            let sink = self.error_sink.borrow_mut().take();
            match sink {
                Some(mut sink) => {
                    sink(error);
                    let mut slot = self.error_sink.borrow_mut();
                    if slot.is_none() {
                        *slot = Some(sink);
                    }
                }
                None => return Err(error),
            }
        }
    }

    pub(crate) fn re_init(&self) -> Result<(), Error> {
        let mut poller = self.poller.borrow_mut();
        poller.reinit()?;

        if let Some(signals) = &self.signals {
            poller.add(signals.wake_fd(), Interest::READ)?;
        }

        let mut merged: HashMap<RawFd, Interest> = HashMap::new();
        for watcher in self
            .read_io
            .pending_watchers()
            .into_iter()
            .chain(self.write_io.pending_watchers())
        {
            *merged
                .entry(watcher.fd())
                .or_insert_with(Interest::empty) |= watcher.mode();
        }

        for (fd, interest) in merged {
            poller.add(fd, interest)?;
        }

        Ok(())
    }

    pub(crate) fn clear(&self) {
        let mut poller = self.poller.borrow_mut();

        for watcher in self
            .read_io
            .take_all()
            .into_iter()
            .chain(self.write_io.take_all())
        {
            if watcher.pending.get() {
                watcher.pending.set(false);
                let _ = poller.remove(watcher.fd());
            }
            watcher.freed.set(true);
        }
        drop(poller);

        for timer in self.timers.take_all() {
            timer.pending.set(false);
            timer.freed.set(true);
        }

        for immediate in self.immediates.take_all() {
            immediate.pending.set(false);
            immediate.freed.set(true);
        }

        if let Some(signals) = &self.signals {
            signals.take_all();
        }
    }
}

/// Shared handle to an event loop.
///
/// Watcher constructors hand out `Rc` handles jointly owned by the caller
/// and the loop's managers. All methods forward to the same underlying
/// loop; clones are cheap.
#[derive(Clone)]
pub struct LoopHandle {
    inner: Rc<EventLoop>,
}

impl LoopHandle {
    /// Builds a loop with the platform's preferred backend and signal
    /// handling enabled.
    pub fn new() -> Result<Self, Error> {
        LoopBuilder::new().build()
    }

    pub fn builder() -> LoopBuilder {
        LoopBuilder::new()
    }

    /// Creates a read-mode watcher for `fd`. The watcher is not armed
    /// until [`IoWatcher::listen`] is called.
    pub fn readable(
        &self,
        fd: RawFd,
        callback: impl FnMut(RawFd, bool) + 'static,
    ) -> Result<Rc<IoWatcher>, Error> {
        self.inner
            .read_io
            .create(Rc::downgrade(&self.inner), fd, Box::new(callback))
    }

    /// Creates a write-mode watcher for `fd`.
    pub fn writable(
        &self,
        fd: RawFd,
        callback: impl FnMut(RawFd, bool) + 'static,
    ) -> Result<Rc<IoWatcher>, Error> {
        self.inner
            .write_io
            .create(Rc::downgrade(&self.inner), fd, Box::new(callback))
    }

    /// Creates and arms a one-shot timer.
    pub fn timer(&self, interval: Duration, callback: impl FnMut() + 'static) -> Rc<Timer> {
        let timer =
            self.inner
                .timers
                .create(Rc::downgrade(&self.inner), interval, false, Box::new(callback));
        self.inner.timers.arm(&timer);
        timer
    }

    /// Creates and arms a periodic timer.
    pub fn periodic(&self, interval: Duration, callback: impl FnMut() + 'static) -> Rc<Timer> {
        let timer =
            self.inner
                .timers
                .create(Rc::downgrade(&self.inner), interval, true, Box::new(callback));
        self.inner.timers.arm(&timer);
        timer
    }

    /// Schedules a callback to run when the loop is otherwise idle.
    pub fn immediate(&self, callback: impl FnOnce() + 'static) -> Rc<Immediate> {
        self.inner.immediates.create(Box::new(callback))
    }

    /// Creates a watcher for a UNIX signal.
    pub fn signal(
        &self,
        signo: c_int,
        callback: impl FnMut(c_int) + 'static,
    ) -> Result<Rc<Signal>, Error> {
        match self.inner.signals() {
            Some(signals) => signals.create(Rc::downgrade(&self.inner), signo, Box::new(callback)),
            None => Err(Error::Unsupported("signal handling is disabled on this loop")),
        }
    }

    /// Enqueues a deferred callback for the next tick.
    pub fn queue(&self, callback: impl FnOnce() + 'static) {
        self.inner.deferred.push(Box::new(callback));
    }

    /// Sets the per-tick deferred budget (0 = unlimited), returning the
    /// previous value.
    pub fn max_queue_depth(&self, depth: usize) -> usize {
        self.inner.deferred.set_max_depth(depth)
    }

    pub fn tick(&self, blocking: bool) -> Result<(), Error> {
        self.inner.tick(blocking)
    }

    /// Ticks until the loop is empty or stopped.
    pub fn run(&self) -> Result<(), Error> {
        self.inner.run(None)
    }

    /// Like [`run`](Self::run), with a callback queued before the first
    /// tick.
    pub fn run_with(&self, init: impl FnOnce() + 'static) -> Result<(), Error> {
        self.inner.run(Some(Box::new(init)))
    }

    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Force-frees every watcher from every manager.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Re-creates backend state after a `fork` without losing watchers.
    pub fn re_init(&self) -> Result<(), Error> {
        self.inner.re_init()
    }

    pub fn signal_handling_enabled(&self) -> bool {
        self.inner.signal_handling_enabled()
    }

    /// Installs a sink for uncaught rejections. Without one, an uncaught
    /// rejection fails the tick that observed it.
    pub fn set_error_sink(&self, sink: impl FnMut(Error) + 'static) {
        self.inner.set_error_sink(Some(Box::new(sink)));
    }

    pub(crate) fn report_uncaught(&self, error: Error) {
        self.inner.report_uncaught(error);
    }
}

/// Fluent builder for event loop construction.
pub struct LoopBuilder {
    enable_signals: bool,
    max_queue_depth: usize,
    poller: Option<Box<dyn Poller>>,
}

impl Default for LoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopBuilder {
    pub fn new() -> Self {
        Self {
            enable_signals: true,
            max_queue_depth: 0,
            poller: None,
        }
    }

    /// Disables or enables UNIX signal watchers; disabled loops reject
    /// `signal(...)` with [`Error::Unsupported`].
    pub fn enable_signals(mut self, enable: bool) -> Self {
        self.enable_signals = enable;
        self
    }

    /// Per-tick deferred callback budget; 0 means unlimited.
    pub fn max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Overrides the backend, e.g. with
    /// [`PollBackend`](crate::reactor::PollBackend) for tests.
    pub fn poller(mut self, poller: Box<dyn Poller>) -> Self {
        self.poller = Some(poller);
        self
    }

    pub fn build(self) -> Result<LoopHandle, Error> {
        let mut poller = match self.poller {
            Some(poller) => poller,
            None => default_poller()?,
        };

        let signals = if self.enable_signals {
            let manager = SignalManager::new()?;
            poller.add(manager.wake_fd(), Interest::READ)?;
            Some(manager)
        } else {
            None
        };

        Ok(LoopHandle {
            inner: Rc::new(EventLoop {
                poller: RefCell::new(poller),
                events: RefCell::new(Vec::new()),
                read_io: IoManager::new(Interest::READ),
                write_io: IoManager::new(Interest::WRITE),
                timers: TimerManager::new(),
                immediates: ImmediateManager::new(),
                signals,
                deferred: DeferredQueue::new(self.max_queue_depth),
                running: Cell::new(false),
                stopped: Cell::new(false),
                uncaught: RefCell::new(VecDeque::new()),
                error_sink: RefCell::new(None),
            }),
        })
    }
}
