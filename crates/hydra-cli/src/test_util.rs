//! Test-only helpers shared across this crate's `#[cfg(test)]` modules.

use std::sync::{Mutex, OnceLock};

/// Serialize tests that mutate process-wide environment variables (config
/// resolution, `HOME`/`XDG_CONFIG_HOME` overrides), since `cargo test` runs
/// a crate's tests in one process with multiple threads by default.
pub fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
