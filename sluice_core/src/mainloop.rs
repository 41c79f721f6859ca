//! The mainloop primitives the runtime assumes.
//!
//! Everything runs on one thread: timer fires, fd readiness and child
//! exits are delivered from the same loop that routes packets. Removing
//! a handle guarantees its callback never runs after the removal
//! returns.
//!
//! [`BasicMainloop`] is the bundled implementation. It keeps a virtual
//! clock: `run()` sleeps real time towards the next deadline, while
//! tests step the clock by hand with [`BasicMainloop::advance`] and
//! inject fd/child events directly.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

/// What a timer or fd callback wants to happen with its registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Keep,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FdHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildWatchHandle(u64);

bitflags::bitflags! {
    /// Readiness bits of an fd watch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FdEvents: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const ERROR = 1 << 2;
    }
}

pub type TimeoutCallback = Box<dyn FnMut() -> Repeat>;
pub type FdCallback = Box<dyn FnMut(FdEvents) -> Repeat>;
pub type ChildWatchCallback = Box<dyn FnOnce(i32)>;

/// Abstract timers, fd watches and child watches.
pub trait Mainloop {
    /// Register a repeating timer; the first fire is `interval` from
    /// now. Returning [`Repeat::Stop`] from the callback drops it.
    fn add_timeout(&self, interval: Duration, cb: TimeoutCallback) -> TimeoutHandle;
    fn remove_timeout(&self, handle: TimeoutHandle);

    fn add_fd(&self, fd: i32, events: FdEvents, cb: FdCallback) -> FdHandle;
    fn remove_fd(&self, handle: FdHandle);

    /// Watch for the exit of a child process; fires once with the exit
    /// status.
    fn add_child_watch(&self, pid: u32, cb: ChildWatchCallback) -> ChildWatchHandle;
    fn remove_child_watch(&self, handle: ChildWatchHandle);

    /// Dispatch until [`Mainloop::quit`] or nothing is left to wait for.
    fn run(&self);
    fn quit(&self);
}

struct Timer {
    due: Duration,
    interval: Duration,
    cb: TimeoutCallback,
}

struct FdWatch {
    fd: i32,
    events: FdEvents,
    cb: FdCallback,
}

struct ChildWatch {
    pid: u32,
    cb: Option<ChildWatchCallback>,
}

#[derive(Default)]
struct Inner {
    next_handle: u64,
    timers: BTreeMap<u64, Timer>,
    fds: HashMap<u64, FdWatch>,
    child_watches: HashMap<u64, ChildWatch>,
    // handles removed while their callback was out of the table
    cancelled: HashSet<u64>,
}

/// Single-threaded mainloop with a virtual clock.
#[derive(Default)]
pub struct BasicMainloop {
    inner: RefCell<Inner>,
    now: Cell<Duration>,
    running: Cell<bool>,
}

impl BasicMainloop {
    pub fn new() -> Rc<Self> {
        Rc::new(BasicMainloop::default())
    }

    /// The virtual clock, time since the loop was created.
    pub fn now(&self) -> Duration {
        self.now.get()
    }

    fn fresh_handle(&self) -> u64 {
        let mut inner = self.inner.borrow_mut();
        inner.next_handle += 1;
        inner.next_handle
    }

    /// Step the virtual clock by `delta`, firing every timer that comes
    /// due, earliest deadline first (ties by registration order).
    pub fn advance(&self, delta: Duration) {
        let target = self.now.get() + delta;
        loop {
            let fired = {
                let mut inner = self.inner.borrow_mut();
                let handle = inner
                    .timers
                    .iter()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(h, t)| (t.due, **h))
                    .map(|(h, _)| *h);
                handle.and_then(|h| inner.timers.remove(&h).map(|t| (h, t)))
            };
            let Some((handle, mut timer)) = fired else {
                break;
            };
            if self.now.get() < timer.due {
                self.now.set(timer.due);
            }
            let repeat = (timer.cb)();
            let mut inner = self.inner.borrow_mut();
            let was_cancelled = inner.cancelled.remove(&handle);
            if repeat == Repeat::Keep && !was_cancelled {
                // a zero interval fires once per advance, not forever
                timer.due = if timer.interval.is_zero() {
                    target + Duration::from_nanos(1)
                } else {
                    timer.due + timer.interval
                };
                inner.timers.insert(handle, timer);
            }
        }
        if self.now.get() < target {
            self.now.set(target);
        }
    }

    /// Inject readiness on an fd; the test-side stand-in for a poller.
    /// Fires every watch on `fd` whose event mask intersects `events`.
    pub fn dispatch_fd(&self, fd: i32, events: FdEvents) {
        let handles: Vec<u64> = self
            .inner
            .borrow()
            .fds
            .iter()
            .filter(|(_, w)| w.fd == fd && w.events.intersects(events))
            .map(|(h, _)| *h)
            .collect();
        for handle in handles {
            let taken = self.inner.borrow_mut().fds.remove(&handle);
            let Some(mut watch) = taken else { continue };
            let repeat = (watch.cb)(events & watch.events);
            let mut inner = self.inner.borrow_mut();
            let was_cancelled = inner.cancelled.remove(&handle);
            if repeat == Repeat::Keep && !was_cancelled {
                inner.fds.insert(handle, watch);
            }
        }
    }

    /// Inject a child exit; fires every watch registered for `pid`.
    pub fn dispatch_child_exit(&self, pid: u32, status: i32) {
        loop {
            let taken = {
                let mut inner = self.inner.borrow_mut();
                let handle = inner
                    .child_watches
                    .iter()
                    .find(|(_, w)| w.pid == pid)
                    .map(|(h, _)| *h);
                handle.and_then(|h| inner.child_watches.remove(&h))
            };
            match taken.and_then(|w| w.cb) {
                Some(cb) => cb(status),
                None => break,
            }
        }
    }

    fn next_due(&self) -> Option<Duration> {
        self.inner.borrow().timers.values().map(|t| t.due).min()
    }
}

impl Mainloop for BasicMainloop {
    fn add_timeout(&self, interval: Duration, cb: TimeoutCallback) -> TimeoutHandle {
        let handle = self.fresh_handle();
        let due = self.now.get() + interval;
        self.inner
            .borrow_mut()
            .timers
            .insert(handle, Timer { due, interval, cb });
        TimeoutHandle(handle)
    }

    fn remove_timeout(&self, handle: TimeoutHandle) {
        let mut inner = self.inner.borrow_mut();
        if inner.timers.remove(&handle.0).is_none() {
            inner.cancelled.insert(handle.0);
        }
    }

    fn add_fd(&self, fd: i32, events: FdEvents, cb: FdCallback) -> FdHandle {
        let handle = self.fresh_handle();
        self.inner
            .borrow_mut()
            .fds
            .insert(handle, FdWatch { fd, events, cb });
        FdHandle(handle)
    }

    fn remove_fd(&self, handle: FdHandle) {
        let mut inner = self.inner.borrow_mut();
        if inner.fds.remove(&handle.0).is_none() {
            inner.cancelled.insert(handle.0);
        }
    }

    fn add_child_watch(&self, pid: u32, cb: ChildWatchCallback) -> ChildWatchHandle {
        let handle = self.fresh_handle();
        self.inner
            .borrow_mut()
            .child_watches
            .insert(handle, ChildWatch { pid, cb: Some(cb) });
        ChildWatchHandle(handle)
    }

    fn remove_child_watch(&self, handle: ChildWatchHandle) {
        self.inner.borrow_mut().child_watches.remove(&handle.0);
    }

    fn run(&self) {
        self.running.set(true);
        while self.running.get() {
            let Some(due) = self.next_due() else { break };
            let now = self.now.get();
            if due > now {
                std::thread::sleep(due - now);
            }
            self.advance(due.saturating_sub(now));
        }
        self.running.set(false);
    }

    fn quit(&self) {
        self.running.set(false);
    }
}
