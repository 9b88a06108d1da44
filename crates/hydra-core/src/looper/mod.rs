//! Cooperative loop manager: every long-running worker activity (dispatch,
//! pulse, the control server's accept loop) is a `tokio::spawn`ed task
//! guarded by its own `CancellationToken`, started and stopped together from
//! `render_node`'s main.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Timing for a managed loop.
#[derive(Debug, Clone, Copy)]
pub struct LoopSpec {
    /// Delay between the end of one iteration and the start of the next.
    pub period: Duration,
    /// Delay before the first iteration runs.
    pub start_delay: Duration,
    /// Run the body exactly once, then return, instead of looping forever.
    pub single_shot: bool,
}

impl LoopSpec {
    pub fn periodic(period: Duration) -> Self {
        Self {
            period,
            start_delay: Duration::ZERO,
            single_shot: false,
        }
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn once() -> Self {
        Self {
            period: Duration::ZERO,
            start_delay: Duration::ZERO,
            single_shot: true,
        }
    }
}

/// Spawn a named, cancellable loop. `body` is invoked once per iteration;
/// an `Err` is logged and the loop continues (a loop body never propagates
/// a failure across the loop's own boundary, matching the source's
/// catch-log-continue worker loops).
pub fn spawn_loop<F, Fut>(
    name: &'static str,
    spec: LoopSpec,
    cancel: CancellationToken,
    mut body: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    tokio::spawn(async move {
        if !spec.start_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(spec.start_delay) => {}
            }
        }

        loop {
            if cancel.is_cancelled() {
                info!(loop_name = name, "loop cancelled before iteration");
                return;
            }

            if let Err(e) = body().await {
                error!(loop_name = name, error = %e, "loop iteration failed");
            }

            if spec.single_shot {
                return;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(loop_name = name, "loop cancelled");
                    return;
                }
                _ = tokio::time::sleep(spec.period) => {}
            }
        }
    })
}
