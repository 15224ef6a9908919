use crate::reactor::{timeout_millis, Event, Interest, Poller};

use libc::{nfds_t, poll, pollfd, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Portable `poll(2)` backend.
///
/// Keeps the interest set in user space and rebuilds the `pollfd` array on
/// every wait. Slower than the accelerated backends for large descriptor
/// counts, but works on any UNIX and has no kernel state to lose across a
/// `fork`.
pub struct PollBackend {
    interest: HashMap<RawFd, Interest>,
    pollfds: Vec<pollfd>,
}

impl PollBackend {
    pub fn new() -> Self {
        PollBackend {
            interest: HashMap::new(),
            pollfds: Vec::new(),
        }
    }
}

impl Default for PollBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller for PollBackend {
    fn add(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.interest.insert(fd, interest);
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.interest.insert(fd, interest);
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        self.interest.remove(&fd);
        Ok(())
    }

    fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        self.pollfds.clear();

        for (&fd, &interest) in &self.interest {
            let mut mask: libc::c_short = 0;
            if interest.contains(Interest::READ) {
                mask |= POLLIN;
            }
            if interest.contains(Interest::WRITE) {
                mask |= POLLOUT;
            }

            self.pollfds.push(pollfd {
                fd,
                events: mask,
                revents: 0,
            });
        }

        let n = unsafe {
            poll(
                self.pollfds.as_mut_ptr(),
                self.pollfds.len() as nfds_t,
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

        for entry in &self.pollfds {
            if entry.revents == 0 {
                continue;
            }

            let error = entry.revents & (POLLERR | POLLHUP | POLLNVAL) != 0;
            let readable = entry.revents & POLLIN != 0 || error;
            let writable = entry.revents & POLLOUT != 0 || error;

            Event::merge(events, entry.fd, readable, writable);
        }

        Ok(())
    }

    fn reinit(&mut self) -> io::Result<()> {
        // No kernel object to re-create.
        Ok(())
    }
}
