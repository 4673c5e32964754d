//! Wait/signal primitives shared by the rendering thread and the background
//! threads of a coordinator.
//!
//! Both are a flag behind a mutex plus a condition variable. An
//! [`AutoResetEvent`] wakes one waiter and clears itself; a
//! [`ManualResetEvent`] stays set and releases every waiter until reset.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Single-slot signal: one `set` releases exactly one wait.
#[derive(Debug, Default)]
pub struct AutoResetEvent {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl AutoResetEvent {
    /// Create an unsignaled event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the event, waking one waiter.
    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.condvar.notify_one();
    }

    /// Wait until signaled or until `timeout` elapsed.
    ///
    /// Returns `true` if the signal was consumed, `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            // Spurious wake-ups are fine: the flag is what counts.
            let _ = self
                .condvar
                .wait_while_for(&mut signaled, |signaled| !*signaled, timeout);
        }
        std::mem::replace(&mut *signaled, false)
    }
}

/// Broadcast signal: stays set until explicitly reset.
#[derive(Debug, Default)]
pub struct ManualResetEvent {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl ManualResetEvent {
    /// Create an unsignaled event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the event, releasing every waiter.
    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.condvar.notify_all();
    }

    /// Clear the event.
    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    /// Whether the event is set.
    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }

    /// Wait until set or until `timeout` elapsed. Returns whether it is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            let _ = self
                .condvar
                .wait_while_for(&mut signaled, |signaled| !*signaled, timeout);
        }
        *signaled
    }
}
