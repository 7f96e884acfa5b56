//! Single-value latest-wins slot

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

struct SlotState<T> {
    value: Option<T>,
    closed: bool,
    superseded: u64,
}

/// Holds at most one pending value; a newer value overwrites an untaken one.
///
/// The writer never queues more than one value. A writer that must not run
/// ahead of its reader waits with [`drained`](Self::drained) until the reader
/// has taken the pending value.
pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    filled: Notify,
    emptied: Notify,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState { value: None, closed: false, superseded: 0 }),
            filled: Notify::new(),
            emptied: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a value, returning the untaken value it replaced.
    ///
    /// Hands the value back as `Err` once the slot is closed.
    pub fn put(&self, value: T) -> Result<Option<T>, T> {
        let replaced = {
            let mut state = self.lock();
            if state.closed {
                return Err(value);
            }
            let replaced = state.value.replace(value);
            if replaced.is_some() {
                state.superseded += 1;
            }
            replaced
        };
        self.filled.notify_one();
        Ok(replaced)
    }

    /// Wait for a value. Returns `None` once closed and empty.
    pub async fn take(&self) -> Option<T> {
        loop {
            let notified = self.filled.notified();
            {
                let mut state = self.lock();
                if let Some(value) = state.value.take() {
                    drop(state);
                    self.emptied.notify_waiters();
                    return Some(value);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn try_take(&self) -> Option<T> {
        let value = self.lock().value.take();
        if value.is_some() {
            self.emptied.notify_waiters();
        }
        value
    }

    /// Wait until no value is pending.
    pub async fn drained(&self) {
        loop {
            let notified = self.emptied.notified();
            {
                let state = self.lock();
                if state.value.is_none() || state.closed {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Refuse further values; a pending value can still be taken.
    pub fn close(&self) {
        self.lock().closed = true;
        self.filled.notify_waiters();
        self.filled.notify_one();
        self.emptied.notify_waiters();
    }

    /// Discard any pending value and close.
    pub fn abandon(&self) -> Option<T> {
        let value = {
            let mut state = self.lock();
            state.closed = true;
            state.value.take()
        };
        self.filled.notify_waiters();
        self.filled.notify_one();
        self.emptied.notify_waiters();
        value
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_pending(&self) -> bool {
        self.lock().value.is_some()
    }

    /// Values overwritten before they were taken
    pub fn superseded(&self) -> u64 {
        self.lock().superseded
    }
}
