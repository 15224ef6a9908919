use crate::reactor::{Event, Interest, Poller};

use libc::{kevent, kqueue, timespec, EVFILT_READ, EVFILT_WRITE, EV_ADD, EV_DELETE, EV_ENABLE};
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

/// Level-triggered `kqueue` backend.
pub struct KqueueBackend {
    kqueue: RawFd,
    events: Vec<kevent>,
}

const CAPACITY: usize = 64;

impl KqueueBackend {
    pub fn new() -> io::Result<Self> {
        let kqueue = unsafe { kqueue() };
        if kqueue < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(KqueueBackend {
            kqueue,
            events: Vec::with_capacity(CAPACITY),
        })
    }

    fn apply(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        // kqueue keys registrations by (ident, filter), so read and write
        // interest are two separate kevents.
        let mut changes = Vec::with_capacity(2);

        for (flag, filter) in [(Interest::READ, EVFILT_READ), (Interest::WRITE, EVFILT_WRITE)] {
            let flags = if interest.contains(flag) {
                EV_ADD | EV_ENABLE
            } else {
                EV_DELETE
            };

            changes.push(kevent {
                ident: fd as usize,
                filter,
                flags,
                fflags: 0,
                data: 0,
                udata: ptr::null_mut(),
            });
        }

        let ret = unsafe {
            kevent(
                self.kqueue,
                changes.as_ptr(),
                changes.len() as libc::c_int,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };

        if ret < 0 {
            let error = io::Error::last_os_error();

            // EV_DELETE for a filter that was never added is expected
            // whenever only one direction is armed.
            if error.raw_os_error() == Some(libc::ENOENT) {
                return Ok(());
            }

            return Err(error);
        }

        Ok(())
    }
}

impl Poller for KqueueBackend {
    fn add(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.apply(fd, interest)
    }

    fn modify(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.apply(fd, interest)
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        self.apply(fd, Interest::empty())
    }

    fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        let ts;
        let timespec_ptr = match timeout {
            Some(t) => {
                ts = timespec {
                    tv_sec: t.as_secs() as libc::time_t,
                    tv_nsec: t.subsec_nanos() as libc::c_long,
                };
                &ts as *const timespec
            }
            None => ptr::null(),
        };

        unsafe {
            self.events.set_len(0);
        }

        let n = unsafe {
            kevent(
                self.kqueue,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as libc::c_int,
                timespec_ptr,
            )
        };

        if n < 0 {
            let error = io::Error::last_os_error();

            if error.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }

            return Err(error);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        for event in &self.events {
            let fd = event.ident as RawFd;

            Event::merge(
                events,
                fd,
                event.filter == EVFILT_READ,
                event.filter == EVFILT_WRITE,
            );
        }

        Ok(())
    }

    fn reinit(&mut self) -> io::Result<()> {
        // kqueue descriptors are not inherited across fork, so the old
        // descriptor is dead in the child either way.
        let fresh = unsafe { kqueue() };
        if fresh < 0 {
            return Err(io::Error::last_os_error());
        }

        unsafe { libc::close(self.kqueue) };
        self.kqueue = fresh;

        Ok(())
    }
}

impl Drop for KqueueBackend {
    fn drop(&mut self) {
        unsafe { libc::close(self.kqueue) };
    }
}
