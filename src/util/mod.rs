//! Shared utilities

pub mod pipe;
pub mod quote;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use pipe::{pipe, PipeReader, PipeWriter};

/// Lock `mutex`, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
