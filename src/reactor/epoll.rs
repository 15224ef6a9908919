use crate::reactor::{timeout_millis, Event, Interest, Poller};

use libc::{epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLL_CLOEXEC};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Level-triggered `epoll` backend.
pub struct EpollBackend {
    epoll: RawFd,
    events: Vec<epoll_event>,
}

const CAPACITY: usize = 64;

impl EpollBackend {
    pub fn new() -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(EpollBackend {
            epoll,
            events: Vec::with_capacity(CAPACITY),
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut flags = 0u32;
        if interest.contains(Interest::READ) {
            flags |= libc::EPOLLIN as u32;
        }
        if interest.contains(Interest::WRITE) {
            flags |= libc::EPOLLOUT as u32;
        }

        let mut event = epoll_event {
            events: flags,
            u64: fd as u64,
        };

        let ret = unsafe { epoll_ctl(self.epoll, op, fd, &mut event) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }
}

impl Poller for EpollBackend {
    fn add(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest)
    }

    fn modify(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest)
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, Interest::empty())
    }

    fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        unsafe {
            self.events.set_len(0);
        }

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as libc::c_int,
                timeout_millis(timeout),
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
            let fd = event.u64 as RawFd;
            let readable = event.events & (libc::EPOLLIN | libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0;
            let writable = event.events & (libc::EPOLLOUT | libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0;

            Event::merge(events, fd, readable, writable);
        }

        Ok(())
    }

    fn reinit(&mut self) -> io::Result<()> {
        let fresh = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if fresh < 0 {
            return Err(io::Error::last_os_error());
        }

        unsafe { libc::close(self.epoll) };
        self.epoll = fresh;

        Ok(())
    }
}

impl Drop for EpollBackend {
    fn drop(&mut self) {
        unsafe { libc::close(self.epoll) };
    }
}
