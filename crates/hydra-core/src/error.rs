//! Structured error enums for the library boundary. Binaries wrap these in
//! `anyhow::Context` as they cross into `main`.
//!
//! Configuration and credential-store errors live in `hydra-cli`, which owns
//! those concerns; this crate only needs somewhere to connect and a worker
//! to run.

use thiserror::Error;

/// Errors raised while acquiring the single-instance lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("another instance is already running (lock held at {path})")]
    AlreadyLocked { path: String },

    #[error("failed to open lock file at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
