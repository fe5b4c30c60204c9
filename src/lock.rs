use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::debug!(context, "mutex poisoned; recovering");
            poisoned.into_inner()
        }
    }
}
