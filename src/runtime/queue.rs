//! Deferred callback queue drained at the start of every tick.
//!
//! Promise continuations, coroutine steps, and user callbacks queued
//! through the loop facade all pass through here, which is what keeps
//! them from ever running re-entrantly inside `resolve`/`reject`.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

type Deferred = Box<dyn FnOnce()>;

/// FIFO of deferred callbacks with a per-tick budget.
///
/// A budget of zero means unlimited. Callbacks pushed while the queue is
/// draining run in the same tick only while the budget allows; the rest
/// carry over. The queue survives `stop()` and drains on the next tick.
pub(crate) struct DeferredQueue {
    queue: RefCell<VecDeque<Deferred>>,
    max_depth: Cell<usize>,
}

impl DeferredQueue {
    pub(crate) fn new(max_depth: usize) -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
            max_depth: Cell::new(max_depth),
        }
    }

    pub(crate) fn push(&self, callback: Deferred) {
        self.queue.borrow_mut().push_back(callback);
    }

    /// Runs queued callbacks up to the budget; returns how many ran.
    pub(crate) fn drain(&self) -> usize {
        let budget = self.max_depth.get();
        let mut ran = 0;

        loop {
            if budget != 0 && ran >= budget {
                break;
            }

            // Re-borrow per iteration: callbacks may push more work.
            let next = self.queue.borrow_mut().pop_front();

            match next {
                Some(callback) => {
                    callback();
                    ran += 1;
                }
                None => break,
            }
        }

        ran
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Sets the per-tick budget, returning the previous value.
    pub(crate) fn set_max_depth(&self, depth: usize) -> usize {
        self.max_depth.replace(depth)
    }
}
