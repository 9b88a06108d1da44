//! Shared in-process worker state: the single running child process and its
//! kill flag, the only state shared between the dispatch loop and the TCP
//! handler (see the concurrency model's "no shared in-process mutable state
//! besides the current child subprocess handle and the kill flag").

use std::sync::Arc;

use hydra_db::HydraStatus;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Composite outcome of a kill attempt on the current child's process tree,
/// mirroring the source's composite return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKillOutcome {
    /// No child is currently running.
    NoChild,
    /// The child (and any descendants, via its process group) were
    /// terminated successfully.
    Killed,
    /// The main child process could not be killed.
    ParentUnkillable,
    /// Children survived termination even though the main process died.
    ChildrenUnkillable,
    /// Neither the main process nor its children could be killed.
    AllUnkillable,
}

impl ProcessKillOutcome {
    /// The composite code recorded in logs, matching the source's
    /// `child_killed` accumulation (1 success, -1 parent survives, -9
    /// children survive, -10 both survive).
    pub fn code(self) -> i32 {
        match self {
            ProcessKillOutcome::NoChild => 1,
            ProcessKillOutcome::Killed => 1,
            ProcessKillOutcome::ParentUnkillable => -1,
            ProcessKillOutcome::ChildrenUnkillable => -9,
            ProcessKillOutcome::AllUnkillable => -10,
        }
    }
}

/// A registration of the currently running child process, shared between
/// the dispatch loop (which spawns and awaits it) and the TCP handler
/// (which may be asked to kill it).
///
/// `requested_status` doubles as the kill flag: `None` means no kill has
/// been requested; `Some(status)` records the status the dispatch loop
/// should finalize the task to once `wait()` returns, instead of the
/// ordinary exit-code-driven `FINISHED`/`READY` transition.
struct CurrentChild {
    /// Process group id the child was spawned into (`process_group(0)`),
    /// so killing it reaches any descendants it forks.
    pgid: i32,
    requested_status: Arc<Mutex<Option<HydraStatus>>>,
}

/// Shared worker state threaded through the dispatch loop and the TCP server.
#[derive(Clone)]
pub struct WorkerState {
    current: Arc<Mutex<Option<CurrentChild>>>,
    /// Host this worker serves, used by dispatch/pulse/protocol call sites.
    pub host: Arc<str>,
}

impl WorkerState {
    pub fn new(host: impl Into<Arc<str>>) -> Self {
        Self {
            current: Arc::new(Mutex::new(None)),
            host: host.into(),
        }
    }

    /// Register a newly spawned child's process group id. Returns the flag
    /// the dispatch loop should consult after `wait()`: `Some(status)` means
    /// the child was killed via the control protocol and the task should be
    /// finalized to `status` rather than the usual exit-code-driven outcome.
    pub async fn register_child(&self, pgid: i32) -> Arc<Mutex<Option<HydraStatus>>> {
        let requested_status = Arc::new(Mutex::new(None));
        *self.current.lock().await = Some(CurrentChild {
            pgid,
            requested_status: requested_status.clone(),
        });
        requested_status
    }

    /// Clear the current child registration once the dispatch loop has
    /// finished waiting on it.
    pub async fn clear_child(&self) {
        *self.current.lock().await = None;
    }

    /// Terminate the current child's process tree, matching the source's
    /// `kill_current_task`: graceful terminate, wait up to 15s, then force
    /// kill. Since the child is spawned into its own process group, a single
    /// `killpg` reaches any descendants it forked without needing to walk
    /// `/proc`. `new_status` is recorded so the dispatch loop finalizes the
    /// task to it instead of requeuing.
    pub async fn kill_current_task(&self, new_status: HydraStatus) -> ProcessKillOutcome {
        let guard = self.current.lock().await;
        let Some(child) = guard.as_ref() else {
            return ProcessKillOutcome::NoChild;
        };
        let pgid = child.pgid;
        *child.requested_status.lock().await = Some(new_status);
        drop(guard);

        kill_process_group(pgid).await
    }
}

#[cfg(unix)]
async fn kill_process_group(pgid: i32) -> ProcessKillOutcome {
    use std::time::Duration;

    // SAFETY: killpg/kill are simple signal-delivery syscalls; pgid is a
    // process group id we ourselves created via process_group(0) at spawn.
    let terminate = unsafe { libc::killpg(pgid, libc::SIGTERM) };
    if terminate != 0 {
        return ProcessKillOutcome::ParentUnkillable;
    }

    for _ in 0..15 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if !process_group_alive(pgid) {
            info!(pgid, "process group terminated gracefully");
            return ProcessKillOutcome::Killed;
        }
    }

    warn!(pgid, "process group survived SIGTERM, sending SIGKILL");
    let kill = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if kill != 0 {
        return ProcessKillOutcome::ParentUnkillable;
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    if process_group_alive(pgid) {
        ProcessKillOutcome::ChildrenUnkillable
    } else {
        ProcessKillOutcome::Killed
    }
}

#[cfg(unix)]
fn process_group_alive(pgid: i32) -> bool {
    // Signal 0 performs no delivery, only the existence/permission check.
    let result = unsafe { libc::killpg(pgid, 0) };
    result == 0
}

#[cfg(not(unix))]
async fn kill_process_group(_pgid: i32) -> ProcessKillOutcome {
    ProcessKillOutcome::ParentUnkillable
}
