//! Test-only helpers shared across this crate's `#[cfg(test)]` modules.

use std::sync::{Mutex, MutexGuard};

/// Serializes tests that mutate process-wide environment variables.
static ENV_LOCK: Mutex<()> = Mutex::new(());

pub fn lock_env() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
