//! UNIX signal watchers.
//!
//! The kernel-facing half is process global and async-signal safe: the
//! installed handler marks the signal number in an atomic table and
//! writes one byte down a self-pipe so a blocking poll wakes up. The
//! loop-facing half drains the table once per tick (step 2), which
//! coalesces multiple deliveries of the same signal between ticks into
//! one callback invocation per watcher.

use crate::error::Error;
use crate::reactor::{set_cloexec, set_nonblocking};
use crate::runtime::core::EventLoop;

use libc::c_int;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

const MAX_SIGNAL: usize = 64;

#[allow(clippy::declare_interior_mutable_const)]
const PENDING_INIT: AtomicBool = AtomicBool::new(false);

static PENDING: [AtomicBool; MAX_SIGNAL] = [PENDING_INIT; MAX_SIGNAL];
static WAKE_WRITE: AtomicI32 = AtomicI32::new(-1);

extern "C" fn signal_trampoline(signo: c_int) {
    if (signo as usize) < MAX_SIGNAL {
        PENDING[signo as usize].store(true, Ordering::Release);
    }

    let fd = WAKE_WRITE.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = [0u8];
        unsafe { libc::write(fd, byte.as_ptr() as *const _, 1) };
    }
}

/// Watcher for one UNIX signal.
///
/// Several watchers may share a signal number; they fire in registration
/// order. Signal watchers start unreferenced: a program that only waits
/// for signals must drive the loop with `tick` rather than `run`.
pub struct Signal {
    owner: Weak<EventLoop>,
    signo: c_int,
    pub(crate) callback: RefCell<Box<dyn FnMut(c_int)>>,
    pub(crate) referenced: Cell<bool>,
    pub(crate) freed: Cell<bool>,
}

impl Signal {
    pub fn signo(&self) -> c_int {
        self.signo
    }

    pub fn is_pending(&self) -> bool {
        !self.freed.get()
    }

    pub fn free(&self) -> Result<(), Error> {
        if self.freed.get() {
            return Err(Error::Freed);
        }

        let owner = self
            .owner
            .upgrade()
            .ok_or_else(|| Error::Logic("event loop was dropped".into()))?;

        owner.free_signal(self);
        Ok(())
    }

    pub fn reference(&self) {
        self.referenced.set(true);
    }

    pub fn unreference(&self) {
        self.referenced.set(false);
    }
}

pub(crate) struct SignalManager {
    watchers: RefCell<HashMap<c_int, Vec<Rc<Signal>>>>,
    previous: RefCell<HashMap<c_int, libc::sigaction>>,
    wake_read: RawFd,
    wake_write: RawFd,
}

impl SignalManager {
    pub(crate) fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }

        for fd in fds {
            set_nonblocking(fd);
            set_cloexec(fd);
        }

        WAKE_WRITE.store(fds[1], Ordering::Relaxed);

        Ok(Self {
            watchers: RefCell::new(HashMap::new()),
            previous: RefCell::new(HashMap::new()),
            wake_read: fds[0],
            wake_write: fds[1],
        })
    }

    /// Descriptor the loop registers with its poller so a signal wakes a
    /// blocking wait.
    pub(crate) fn wake_fd(&self) -> RawFd {
        self.wake_read
    }

    pub(crate) fn create(
        &self,
        owner: Weak<EventLoop>,
        signo: c_int,
        callback: Box<dyn FnMut(c_int)>,
    ) -> Result<Rc<Signal>, Error> {
        if signo <= 0 || signo as usize >= MAX_SIGNAL {
            return Err(Error::Logic(format!("invalid signal number {signo}")));
        }

        let watcher = Rc::new(Signal {
            owner,
            signo,
            callback: RefCell::new(callback),
            referenced: Cell::new(false),
            freed: Cell::new(false),
        });

        let mut watchers = self.watchers.borrow_mut();
        let list = watchers.entry(signo).or_default();

        if list.is_empty() {
            self.install(signo)?;
        }

        list.push(watcher.clone());
        log::debug!("created watcher for signal {signo}");

        Ok(watcher)
    }

    fn install(&self, signo: c_int) -> Result<(), Error> {
        let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
        let mut previous: libc::sigaction = unsafe { std::mem::zeroed() };

        action.sa_sigaction = signal_trampoline as usize;
        action.sa_flags = libc::SA_RESTART;
        unsafe { libc::sigemptyset(&mut action.sa_mask) };

        let ret = unsafe { libc::sigaction(signo, &action, &mut previous) };
        if ret != 0 {
            return Err(io::Error::last_os_error().into());
        }

        self.previous.borrow_mut().insert(signo, previous);
        Ok(())
    }

    fn restore(&self, signo: c_int) {
        if let Some(previous) = self.previous.borrow_mut().remove(&signo) {
            unsafe { libc::sigaction(signo, &previous, std::ptr::null_mut()) };
        }
    }

    pub(crate) fn remove(&self, signal: &Signal) {
        signal.freed.set(true);

        let mut watchers = self.watchers.borrow_mut();
        if let Some(list) = watchers.get_mut(&signal.signo) {
            list.retain(|w| !w.freed.get());

            if list.is_empty() {
                watchers.remove(&signal.signo);
                drop(watchers);
                self.restore(signal.signo);
            }
        }
    }

    /// Drains the wake pipe and fires watchers for every signal delivered
    /// since the previous tick. Returns the number of callbacks run.
    pub(crate) fn dispatch(&self) -> usize {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe { libc::read(self.wake_read, buf.as_mut_ptr() as *mut _, buf.len()) };
            if n <= 0 {
                break;
            }
        }

        let signos: Vec<c_int> = self.watchers.borrow().keys().copied().collect();
        let mut fired = 0;

        for signo in signos {
            if !PENDING[signo as usize].swap(false, Ordering::AcqRel) {
                continue;
            }

            let list: Vec<Rc<Signal>> = self
                .watchers
                .borrow()
                .get(&signo)
                .cloned()
                .unwrap_or_default();

            for watcher in list {
                if watcher.freed.get() {
                    continue;
                }

                log::trace!("dispatching signal {signo}");
                (watcher.callback.borrow_mut())(signo);
                fired += 1;
            }
        }

        fired
    }

    pub(crate) fn has_referenced_pending(&self) -> bool {
        self.watchers
            .borrow()
            .values()
            .flatten()
            .any(|w| !w.freed.get() && w.referenced.get())
    }

    pub(crate) fn take_all(&self) -> Vec<Rc<Signal>> {
        let mut all = Vec::new();
        let signos: Vec<c_int> = self.watchers.borrow().keys().copied().collect();

        for signo in signos {
            if let Some(list) = self.watchers.borrow_mut().remove(&signo) {
                all.extend(list);
            }
            self.restore(signo);
        }

        for watcher in &all {
            watcher.freed.set(true);
        }

        all
    }
}

impl Drop for SignalManager {
    fn drop(&mut self) {
        let signos: Vec<c_int> = self.previous.borrow().keys().copied().collect();
        for signo in signos {
            self.restore(signo);
        }

        WAKE_WRITE
            .compare_exchange(self.wake_write, -1, Ordering::Relaxed, Ordering::Relaxed)
            .ok();

        unsafe {
            libc::close(self.wake_read);
            libc::close(self.wake_write);
        }
    }
}
