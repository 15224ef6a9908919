//! I/O watchers and their per-mode manager.
//!
//! An [`IoWatcher`] represents interest in one readiness direction of a
//! borrowed descriptor. The loop keeps two managers, one for read mode
//! and one for write mode, each hashing watchers by descriptor; a
//! descriptor can therefore carry at most one watcher per direction.
//! Arming is one-shot: after the callback fires (ready or timed out) the
//! watcher must be listened again.

use crate::error::Error;
use crate::reactor::Interest;
use crate::runtime::core::EventLoop;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

type IoCallback = Box<dyn FnMut(RawFd, bool)>;

/// Readiness watcher for one direction of a non-blocking descriptor.
///
/// The callback receives the descriptor and a `timed_out` flag: `false`
/// for readiness, `true` when the per-arming timeout expired first.
pub struct IoWatcher {
    owner: Weak<EventLoop>,
    fd: RawFd,
    mode: Interest,
    pub(crate) callback: RefCell<IoCallback>,
    pub(crate) pending: Cell<bool>,
    pub(crate) referenced: Cell<bool>,
    pub(crate) freed: Cell<bool>,
    pub(crate) deadline: Cell<Option<Instant>>,
}

impl IoWatcher {
    fn owner(&self) -> Result<Rc<EventLoop>, Error> {
        self.owner
            .upgrade()
            .ok_or_else(|| Error::Logic("event loop was dropped".into()))
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn mode(&self) -> Interest {
        self.mode
    }

    /// Arms the watcher, optionally with a timeout for this arming.
    pub fn listen(&self, timeout: Option<Duration>) -> Result<(), Error> {
        self.owner()?.arm_io(self, timeout)
    }

    /// Disarms a pending watcher; a no-op when not armed.
    pub fn cancel(&self) -> Result<(), Error> {
        if self.freed.get() {
            return Err(Error::Freed);
        }

        self.owner()?.disarm_io(self)
    }

    /// Removes the watcher from its manager. Every later call returns
    /// [`Error::Freed`].
    pub fn free(&self) -> Result<(), Error> {
        if self.freed.get() {
            return Err(Error::Freed);
        }

        self.owner()?.free_io(self)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.get() && !self.freed.get()
    }

    /// Makes the watcher count towards the loop's liveness again.
    pub fn reference(&self) {
        self.referenced.set(true);
    }

    /// A pending but unreferenced watcher still fires; it just no longer
    /// keeps `run` alive.
    pub fn unreference(&self) {
        self.referenced.set(false);
    }
}

pub(crate) struct IoManager {
    mode: Interest,
    watchers: RefCell<HashMap<RawFd, Rc<IoWatcher>>>,
}

impl IoManager {
    pub(crate) fn new(mode: Interest) -> Self {
        Self {
            mode,
            watchers: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn create(
        &self,
        owner: Weak<EventLoop>,
        fd: RawFd,
        callback: IoCallback,
    ) -> Result<Rc<IoWatcher>, Error> {
        let mut watchers = self.watchers.borrow_mut();

        if watchers.contains_key(&fd) {
            return Err(Error::Busy(fd));
        }

        let watcher = Rc::new(IoWatcher {
            owner,
            fd,
            mode: self.mode,
            callback: RefCell::new(callback),
            pending: Cell::new(false),
            referenced: Cell::new(true),
            freed: Cell::new(false),
            deadline: Cell::new(None),
        });

        watchers.insert(fd, watcher.clone());
        log::debug!("created {:?} watcher for fd {}", self.mode, fd);

        Ok(watcher)
    }

    pub(crate) fn get(&self, fd: RawFd) -> Option<Rc<IoWatcher>> {
        self.watchers.borrow().get(&fd).cloned()
    }

    pub(crate) fn remove(&self, fd: RawFd) {
        self.watchers.borrow_mut().remove(&fd);
    }

    /// Earliest per-arming deadline among pending watchers.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.watchers
            .borrow()
            .values()
            .filter(|w| w.pending.get())
            .filter_map(|w| w.deadline.get())
            .min()
    }

    /// Pending watchers whose arming deadline has passed.
    pub(crate) fn expired(&self, now: Instant) -> Vec<Rc<IoWatcher>> {
        self.watchers
            .borrow()
            .values()
            .filter(|w| w.pending.get() && w.deadline.get().is_some_and(|d| d <= now))
            .cloned()
            .collect()
    }

    pub(crate) fn has_referenced_pending(&self) -> bool {
        self.watchers
            .borrow()
            .values()
            .any(|w| w.pending.get() && w.referenced.get())
    }

    pub(crate) fn pending_watchers(&self) -> Vec<Rc<IoWatcher>> {
        self.watchers
            .borrow()
            .values()
            .filter(|w| w.pending.get())
            .cloned()
            .collect()
    }

    pub(crate) fn take_all(&self) -> Vec<Rc<IoWatcher>> {
        self.watchers.borrow_mut().drain().map(|(_, w)| w).collect()
    }
}
