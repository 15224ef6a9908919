//! Thread-local default loop.
//!
//! Watchers, promises, and coroutines all schedule through the loop in
//! scope, which is the thread's default loop unless [`with_loop`] has
//! swapped in another. The default is created lazily on first access.
//!
//! Tests that share a thread should isolate loop state with
//! [`with_loop`], or reset it with [`replace`] between cases.

use crate::error::Error;
use crate::runtime::core::LoopHandle;

use std::cell::RefCell;

thread_local! {
    static CURRENT_LOOP: RefCell<Option<LoopHandle>> = const { RefCell::new(None) };
}

/// Returns the loop currently in scope, creating the default on first
/// use.
///
/// # Panics
/// Panics if the default loop cannot be constructed (the backend or the
/// signal pipe failed), which mirrors construction failure being fatal in
/// explicit `LoopHandle::new()` use.
pub fn current() -> LoopHandle {
    CURRENT_LOOP.with(|current| {
        let mut slot = current.borrow_mut();

        match &*slot {
            Some(handle) => handle.clone(),
            None => {
                let handle = LoopHandle::new().expect("failed to create default event loop");
                *slot = Some(handle.clone());
                handle
            }
        }
    })
}

/// Replaces the loop in scope, returning the previous one.
///
/// Replacement is refused while the incumbent is running.
pub fn replace(handle: LoopHandle) -> Result<Option<LoopHandle>, Error> {
    CURRENT_LOOP.with(|current| {
        let mut slot = current.borrow_mut();

        if slot.as_ref().is_some_and(|l| l.is_running()) {
            return Err(Error::AlreadyRunning);
        }

        Ok(slot.replace(handle))
    })
}

/// Runs `worker` with `alt` (or a fresh loop) in scope, restoring the
/// previous scope afterwards, whatever `worker` returns.
pub fn with_loop<R>(
    alt: Option<LoopHandle>,
    worker: impl FnOnce(&LoopHandle) -> R,
) -> Result<R, Error> {
    let handle = match alt {
        Some(handle) => handle,
        None => LoopHandle::new()?,
    };

    let previous = replace(handle.clone())?;
    let result = worker(&handle);

    CURRENT_LOOP.with(|current| {
        *current.borrow_mut() = previous;
    });

    Ok(result)
}
