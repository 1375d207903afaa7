//! Extension trait to ignore lock poisoning.
//!
//! The listing cache, the undo stack, the limiter gates and the refresh table all hold plain
//! maps and queues where a panic in another task doesn't leave the data half-written, so
//! poisoning is irrelevant. This trait replaces `.lock().unwrap_or_else(|e| e.into_inner())`.

use std::sync::{Mutex, MutexGuard};

pub trait IgnorePoison<T> {
    /// Locks the mutex, ignoring poison.
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T>;
}

impl<T> IgnorePoison<T> for Mutex<T> {
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|e| e.into_inner())
    }
}
