//! Configuration from the environment.
//!
//! Every tunable of the harness (executable paths, base port, timeouts,
//! generation bounds) can be overridden with a `DCRHARNESS_*` variable.
//! Values carry their source so a failing CI run can report where a
//! setting came from.

pub mod env;
pub mod source;

pub use env::{ENV_PREFIX, EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
