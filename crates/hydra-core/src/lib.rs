//! The coordination core of the render farm: dispatch loop, entity state
//! machines, remote kill protocol, and the cooperative loop manager that
//! threads them together on a worker. Schema-mapped data access lives in
//! `hydra_db`; this crate owns behavior, not storage.

pub mod command;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod jobstatus;
#[cfg(unix)]
pub mod lock;
pub mod looper;
pub mod protocol;
pub mod submission;
pub mod worker;

pub use worker::WorkerState;
