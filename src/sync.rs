//! Poison-tolerant lock helpers.
//!
//! Critical sections in this crate never span an `.await` and never run user
//! callbacks, so a poisoned lock only means another thread panicked between
//! two plain map operations. The data is still consistent; keep going.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire mutex guard, ignoring poisoning
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Acquire read guard, ignoring poisoning
pub(crate) fn read_ignore_poison<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match l.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Acquire write guard, ignoring poisoning
pub(crate) fn write_ignore_poison<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match l.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
