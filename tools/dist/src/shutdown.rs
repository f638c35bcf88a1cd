//! Process-wide abort signal and at-exit actions.
//!
//! A failing background job or install thread trips the [`Abort`], which
//! keeps the first error as the root cause. Every blocking wait in the
//! crate (completion tickets, wait groups) polls the signal so no waiter
//! outlives an abort. `main` then reports the cause once and runs the
//! registered [`AtExit`] actions in reverse order.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;

/// How often blocked waiters re-check the abort signal.
pub const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Error returned by a wait that was cut short by an abort.
///
/// It never becomes the reported cause; the error that tripped the
/// signal does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("build aborted")
    }
}

impl std::error::Error for Aborted {}

/// Lock a mutex, ignoring poisoning. A panicking holder has already
/// tripped the abort path by the time anyone else looks.
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The process-wide "dying" signal.
#[derive(Default)]
pub struct Abort {
    dying: AtomicBool,
    cause: Mutex<Option<anyhow::Error>>,
}

impl Abort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `err` as the cause and raise the signal.
    ///
    /// Only the first call has any effect; returns whether this call won.
    pub fn trip(&self, err: anyhow::Error) -> bool {
        let mut cause = lock(&self.cause);
        if self.dying.load(Ordering::SeqCst) {
            return false;
        }
        *cause = Some(err);
        self.dying.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_set(&self) -> bool {
        self.dying.load(Ordering::SeqCst)
    }

    /// `Err(Aborted)` once the signal is raised.
    pub fn check(&self) -> Result<()> {
        if self.is_set() {
            return Err(Aborted.into());
        }
        Ok(())
    }

    /// Take the recorded cause, leaving `None` behind.
    pub fn take_cause(&self) -> Option<anyhow::Error> {
        lock(&self.cause).take()
    }
}

/// A one-shot latch: closed once, waited on by any number of threads.
#[derive(Default)]
pub struct Latch {
    closed: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        *lock(&self.closed) = true;
        self.cv.notify_all();
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        *lock(&self.closed)
    }

    /// Block until the latch closes or `abort` is raised.
    pub fn wait(&self, abort: &Abort) -> Result<()> {
        let mut closed = lock(&self.closed);
        loop {
            if *closed {
                return Ok(());
            }
            abort.check()?;
            closed = self
                .cv
                .wait_timeout(closed, POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Cleanup actions run on every exit path, newest first.
#[derive(Default)]
pub struct AtExit {
    actions: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl AtExit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, f: impl FnOnce() + Send + 'static) {
        lock(&self.actions).push(Box::new(f));
    }

    /// Run and forget every registered action in reverse order.
    pub fn run(&self) {
        let actions = std::mem::take(&mut *lock(&self.actions));
        for f in actions.into_iter().rev() {
            f();
        }
    }
}
