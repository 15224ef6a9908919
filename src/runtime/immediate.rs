//! Immediates: callbacks that run once the loop has nothing else to do.

use crate::error::Error;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// A one-shot callback dispatched when a tick observed no other activity.
pub struct Immediate {
    pub(crate) callback: RefCell<Option<Box<dyn FnOnce()>>>,
    pub(crate) pending: Cell<bool>,
    pub(crate) referenced: Cell<bool>,
    pub(crate) freed: Cell<bool>,
}

impl Immediate {
    pub fn is_pending(&self) -> bool {
        self.pending.get() && !self.freed.get()
    }

    pub fn free(&self) -> Result<(), Error> {
        if self.freed.get() {
            return Err(Error::Freed);
        }

        self.freed.set(true);
        self.pending.set(false);
        self.callback.borrow_mut().take();
        Ok(())
    }

    pub fn reference(&self) {
        self.referenced.set(true);
    }

    pub fn unreference(&self) {
        self.referenced.set(false);
    }
}

pub(crate) struct ImmediateManager {
    queue: RefCell<VecDeque<Rc<Immediate>>>,
}

impl ImmediateManager {
    pub(crate) fn new() -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
        }
    }

    pub(crate) fn create(&self, callback: Box<dyn FnOnce()>) -> Rc<Immediate> {
        let immediate = Rc::new(Immediate {
            callback: RefCell::new(Some(callback)),
            pending: Cell::new(true),
            referenced: Cell::new(true),
            freed: Cell::new(false),
        });

        self.queue.borrow_mut().push_back(immediate.clone());
        immediate
    }

    /// Next runnable immediate in FIFO order, skipping freed entries.
    pub(crate) fn pop_ready(&self) -> Option<Rc<Immediate>> {
        loop {
            let next = self.queue.borrow_mut().pop_front()?;

            if next.freed.get() || !next.pending.get() {
                continue;
            }

            next.pending.set(false);
            return Some(next);
        }
    }

    pub(crate) fn has_ready(&self) -> bool {
        self.queue
            .borrow()
            .iter()
            .any(|i| i.pending.get() && !i.freed.get())
    }

    pub(crate) fn has_referenced_pending(&self) -> bool {
        self.queue
            .borrow()
            .iter()
            .any(|i| i.pending.get() && !i.freed.get() && i.referenced.get())
    }

    pub(crate) fn take_all(&self) -> Vec<Rc<Immediate>> {
        self.queue.borrow_mut().drain(..).collect()
    }
}
