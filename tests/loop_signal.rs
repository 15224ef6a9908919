use eddy::{Error, LoopBuilder};

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

fn raise(signo: libc::c_int) {
    let ret = unsafe { libc::kill(libc::getpid(), signo) };
    assert_eq!(ret, 0, "kill() failed");
}

#[test]
fn test_signal_watcher_fires_once_per_delivery() {
    let handle = LoopBuilder::new().build().unwrap();

    let fired = Rc::new(Cell::new(0));
    let counter = fired.clone();

    let watcher = handle
        .signal(libc::SIGUSR1, move |signo| {
            assert_eq!(signo, libc::SIGUSR1);
            counter.set(counter.get() + 1);
        })
        .unwrap();

    raise(libc::SIGUSR1);

    // Give the kernel a moment to run the handler, then dispatch.
    std::thread::sleep(Duration::from_millis(10));
    handle.tick(false).unwrap();

    assert_eq!(fired.get(), 1, "One delivery, one callback");

    handle.tick(false).unwrap();
    assert_eq!(fired.get(), 1, "No further callback without a delivery");

    watcher.free().unwrap();
    assert!(matches!(watcher.free(), Err(Error::Freed)));
}

#[test]
fn test_signal_deliveries_coalesce_between_ticks() {
    let handle = LoopBuilder::new().build().unwrap();

    let fired = Rc::new(Cell::new(0));
    let counter = fired.clone();

    let watcher = handle
        .signal(libc::SIGUSR2, move |_| counter.set(counter.get() + 1))
        .unwrap();

    raise(libc::SIGUSR2);
    raise(libc::SIGUSR2);

    std::thread::sleep(Duration::from_millis(10));
    handle.tick(false).unwrap();

    assert_eq!(
        fired.get(),
        1,
        "Multiple deliveries between ticks coalesce into one invocation"
    );

    watcher.free().unwrap();
}

#[test]
fn test_multiple_watchers_fire_in_registration_order() {
    let handle = LoopBuilder::new().build().unwrap();

    let order = Rc::new(std::cell::RefCell::new(Vec::new()));

    let first = {
        let order = order.clone();
        handle
            .signal(libc::SIGHUP, move |_| order.borrow_mut().push(1))
            .unwrap()
    };
    let second = {
        let order = order.clone();
        handle
            .signal(libc::SIGHUP, move |_| order.borrow_mut().push(2))
            .unwrap()
    };

    raise(libc::SIGHUP);
    std::thread::sleep(Duration::from_millis(10));
    handle.tick(false).unwrap();

    assert_eq!(*order.borrow(), vec![1, 2]);

    first.free().unwrap();
    second.free().unwrap();
}

#[test]
fn test_signal_watchers_do_not_keep_loop_alive() {
    let handle = LoopBuilder::new().build().unwrap();

    let watcher = handle.signal(libc::SIGWINCH, |_| {}).unwrap();

    assert!(
        handle.is_empty(),
        "Signal watchers start unreferenced and do not hold the loop open"
    );

    watcher.reference();
    assert!(!handle.is_empty());

    watcher.unreference();
    watcher.free().unwrap();
}

#[test]
fn test_signal_rejected_when_handling_disabled() {
    let handle = LoopBuilder::new().enable_signals(false).build().unwrap();

    assert!(!handle.signal_handling_enabled());
    assert!(
        matches!(handle.signal(libc::SIGUSR1, |_| {}), Err(Error::Unsupported(_))),
        "A loop built without signal support must refuse signal watchers"
    );
}

#[test]
fn test_invalid_signal_number_is_logic_error() {
    let handle = LoopBuilder::new().build().unwrap();

    assert!(matches!(handle.signal(0, |_| {}), Err(Error::Logic(_))));
    assert!(matches!(handle.signal(-3, |_| {}), Err(Error::Logic(_))));
}
