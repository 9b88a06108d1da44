//! Shared configuration, credential, and logging plumbing for the four
//! render-farm binaries (`register`, `render_node`, `submitter`,
//! `farm_view`). Coordination behavior itself lives in `hydra-core`; this
//! crate is the operator-facing surface around it.

pub mod config;
pub mod credentials;
pub mod logging;

#[cfg(test)]
pub(crate) mod test_util;
