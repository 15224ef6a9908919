use std::os::unix::io::RawFd;

bitflags::bitflags! {
    /// Readiness interest registered with a poller for one descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interest: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

/// One readiness report out of [`Poller::poll`](crate::reactor::Poller::poll).
///
/// A descriptor ready in both directions is reported as a single event
/// with both flags set.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
}

impl Event {
    pub(crate) fn merge(events: &mut Vec<Event>, fd: RawFd, readable: bool, writable: bool) {
        match events.iter_mut().find(|e| e.fd == fd) {
            Some(e) => {
                e.readable |= readable;
                e.writable |= writable;
            }
            None => events.push(Event {
                fd,
                readable,
                writable,
            }),
        }
    }
}

pub(crate) fn set_nonblocking(fd: RawFd) {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };

    unsafe {
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
}

pub(crate) fn set_cloexec(fd: RawFd) {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };

    unsafe {
        libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
    }
}
