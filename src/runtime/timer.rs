//! One-shot and periodic timers.
//!
//! The manager is a min-heap keyed by (expiry, insertion sequence), so
//! timers with identical expiries fire in the order they were started.
//! Stopping or restarting a timer bumps its generation, which turns any
//! heap entry from the previous arming into a stale record that is
//! discarded when popped; the heap itself is never searched.

use crate::error::Error;
use crate::runtime::core::EventLoop;

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

/// Timer watcher.
///
/// Periodic timers re-arm at `now + interval` when they fire, so two
/// firings are never closer than `interval` and a blocked loop does not
/// cause catch-up bursts.
pub struct Timer {
    owner: Weak<EventLoop>,
    id: usize,
    interval: Duration,
    periodic: bool,
    pub(crate) callback: RefCell<Box<dyn FnMut()>>,
    pub(crate) pending: Cell<bool>,
    pub(crate) referenced: Cell<bool>,
    pub(crate) freed: Cell<bool>,
    pub(crate) generation: Cell<u64>,
}

impl Timer {
    fn owner(&self) -> Result<Rc<EventLoop>, Error> {
        self.owner
            .upgrade()
            .ok_or_else(|| Error::Logic("event loop was dropped".into()))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_periodic(&self) -> bool {
        self.periodic
    }

    pub fn is_pending(&self) -> bool {
        self.pending.get() && !self.freed.get()
    }

    /// Arms the timer to fire `interval` from now.
    pub fn start(self: &Rc<Self>) -> Result<(), Error> {
        if self.freed.get() {
            return Err(Error::Freed);
        }
        if self.pending.get() {
            return Err(Error::Logic("timer is already armed".into()));
        }

        self.owner()?.timers().arm(self);
        Ok(())
    }

    /// Disarms without firing; a no-op when not armed.
    pub fn stop(&self) {
        if self.freed.get() || !self.pending.get() {
            return;
        }

        if let Ok(owner) = self.owner() {
            owner.timers().disarm(self);
        }
    }

    /// Restarts the interval from now, whether or not the timer is armed.
    pub fn again(self: &Rc<Self>) -> Result<(), Error> {
        if self.freed.get() {
            return Err(Error::Freed);
        }

        self.stop();
        self.start()
    }

    pub fn free(&self) -> Result<(), Error> {
        if self.freed.get() {
            return Err(Error::Freed);
        }

        self.stop();
        self.freed.set(true);
        Ok(())
    }

    pub fn reference(&self) {
        self.referenced.set(true);
    }

    pub fn unreference(&self) {
        self.referenced.set(false);
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct TimerEntry {
    expiry: Instant,
    seq: u64,
    id: usize,
    generation: u64,
}

pub(crate) struct TimerManager {
    heap: RefCell<BinaryHeap<Reverse<TimerEntry>>>,
    active: RefCell<HashMap<usize, Rc<Timer>>>,
    next_id: Cell<usize>,
    next_seq: Cell<u64>,
}

impl TimerManager {
    pub(crate) fn new() -> Self {
        Self {
            heap: RefCell::new(BinaryHeap::new()),
            active: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
            next_seq: Cell::new(0),
        }
    }

    pub(crate) fn create(
        &self,
        owner: Weak<EventLoop>,
        interval: Duration,
        periodic: bool,
        callback: Box<dyn FnMut()>,
    ) -> Rc<Timer> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        Rc::new(Timer {
            owner,
            id,
            interval,
            periodic,
            callback: RefCell::new(callback),
            pending: Cell::new(false),
            referenced: Cell::new(true),
            freed: Cell::new(false),
            generation: Cell::new(0),
        })
    }

    pub(crate) fn arm(&self, timer: &Rc<Timer>) {
        let generation = timer.generation.get() + 1;
        timer.generation.set(generation);
        timer.pending.set(true);

        self.push_entry(timer, Instant::now() + timer.interval, generation);
        self.active.borrow_mut().insert(timer.id, timer.clone());
    }

    pub(crate) fn disarm(&self, timer: &Timer) {
        timer.pending.set(false);
        // Invalidate the heap entry from this arming.
        timer.generation.set(timer.generation.get() + 1);
        self.active.borrow_mut().remove(&timer.id);
    }

    fn push_entry(&self, timer: &Timer, expiry: Instant, generation: u64) {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);

        self.heap.borrow_mut().push(Reverse(TimerEntry {
            expiry,
            seq,
            id: timer.id,
            generation,
        }));
    }

    /// Pops the next timer due at `now`. One-shot timers are disarmed
    /// here; periodic timers stay armed but get no new heap entry until
    /// [`rearm_periodic`](Self::rearm_periodic) runs after the callback,
    /// so a stalled callback cannot make two firings land closer than
    /// one interval. Returns `None` once no live entry is due.
    pub(crate) fn pop_due(&self, now: Instant) -> Option<(Rc<Timer>, u64)> {
        loop {
            let entry = {
                let mut heap = self.heap.borrow_mut();

                match heap.peek() {
                    Some(Reverse(entry)) if entry.expiry <= now => heap.pop().map(|r| r.0),
                    _ => return None,
                }
            };
            let entry = entry?;

            let timer = match self.active.borrow().get(&entry.id) {
                Some(t) if t.generation.get() == entry.generation && t.pending.get() => t.clone(),
                _ => continue, // stale entry from a stopped or restarted arming
            };

            if !timer.periodic {
                timer.pending.set(false);
                self.active.borrow_mut().remove(&timer.id);
            }

            return Some((timer, entry.generation));
        }
    }

    /// Schedules the next firing of a periodic timer, unless the
    /// callback stopped, restarted, or freed it in the meantime.
    pub(crate) fn rearm_periodic(&self, timer: &Rc<Timer>, generation: u64) {
        if !timer.periodic
            || timer.freed.get()
            || !timer.pending.get()
            || timer.generation.get() != generation
        {
            return;
        }

        self.push_entry(timer, Instant::now() + timer.interval, generation);
    }

    /// Expiry of the earliest live entry, discarding stale ones.
    pub(crate) fn next_expiry(&self) -> Option<Instant> {
        loop {
            let head = {
                let heap = self.heap.borrow();
                heap.peek().map(|Reverse(e)| (e.expiry, e.id, e.generation))
            };

            let (expiry, id, generation) = head?;

            let live = match self.active.borrow().get(&id) {
                Some(t) => t.generation.get() == generation && t.pending.get(),
                None => false,
            };

            if live {
                return Some(expiry);
            }

            self.heap.borrow_mut().pop();
        }
    }

    pub(crate) fn has_referenced_pending(&self) -> bool {
        self.active.borrow().values().any(|t| t.referenced.get())
    }

    pub(crate) fn take_all(&self) -> Vec<Rc<Timer>> {
        self.heap.borrow_mut().clear();
        self.active.borrow_mut().drain().map(|(_, t)| t).collect()
    }
}
