use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

struct SlotState<T> {
    value: Option<T>,
    closed: bool,
}

/// A hand-off cell holding at most one value: a channel of capacity 1
/// whose producer overwrites instead of blocking.
///
/// [`put`](Self::put) hands back whatever it replaced, so losing an
/// unconsumed value is visible to the caller rather than silent.
/// Closing wakes every waiter; a consumer that wakes to a closed slot gets
/// `None` even if a value is still pending.
pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    changed: Condvar,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Stores `value`, returning the unconsumed value it displaced.
    pub fn put(&self, value: T) -> Option<T> {
        let mut state = self.lock();
        let displaced = state.value.replace(value);
        self.changed.notify_all();
        displaced
    }

    /// Waits until the slot is empty, then stores `value`.
    ///
    /// Returns the value back if the slot is closed first.
    pub fn put_waiting(&self, value: T) -> Result<(), T> {
        let mut state = self.lock();
        while state.value.is_some() && !state.closed {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.closed {
            return Err(value);
        }
        state.value = Some(value);
        self.changed.notify_all();
        Ok(())
    }

    /// Blocks until a value arrives or the slot is closed.
    pub fn take(&self) -> Option<T> {
        self.take_with(|_| ()).map(|(value, ())| value)
    }

    /// Like [`take`](Self::take), but runs `f` on the value before the slot
    /// reports itself empty.
    ///
    /// A producer blocked in [`put_waiting`](Self::put_waiting) stays blocked
    /// until `f` has returned, so work done in `f` is ordered before the next
    /// value can be stored.
    pub fn take_with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<(T, R)> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(value) = state.value.take() {
                let extra = f(&value);
                self.changed.notify_all();
                return Some((value, extra));
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
