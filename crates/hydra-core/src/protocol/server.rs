//! Server side of the control protocol: accept connections, read one
//! request line, dispatch it against `WorkerState`, write back one response.

use hydra_db::HydraStatus;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Request, Response};
use crate::worker::{ProcessKillOutcome, WorkerState};

/// Accept loop: serve connections until `shutdown` is cancelled, either by
/// the owning process or by a `shutdown` command received over the wire.
pub async fn run_server(listener: TcpListener, worker: WorkerState, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("control server shutting down");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let worker = worker.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &worker, &shutdown).await {
                                warn!(error = %e, peer = %addr, "control connection failed");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept control connection");
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    worker: &WorkerState,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response = if line.trim().is_empty() {
        Response::error("EOF Error")
    } else {
        match serde_json::from_str::<Request>(line.trim()) {
            Ok(request) => dispatch(request, worker, shutdown).await,
            Err(e) => Response::error(format!("Unhandled Exception: {e}")),
        }
    };

    let body = serde_json::to_vec(&response)?;
    write_half.write_all(&body).await?;
    write_half.shutdown().await?;
    Ok(())
}

async fn dispatch(
    request: Request,
    worker: &WorkerState,
    shutdown: &CancellationToken,
) -> Response {
    match request.cmd.as_str() {
        "kill_current_task" => {
            let status = request
                .kwargs
                .get("status")
                .and_then(|v| v.as_str())
                .and_then(|s| s.chars().next())
                .and_then(|c| HydraStatus::try_from(c).ok())
                .unwrap_or(HydraStatus::Killed);
            let outcome = worker.kill_current_task(status).await;
            if outcome.code() == ProcessKillOutcome::Killed.code() {
                Response::ok(format!("{:?}", outcome))
            } else {
                Response::error(format!("{:?}", outcome))
            }
        }
        "shutdown" => {
            shutdown.cancel();
            Response::ok("shutting down")
        }
        "echo" => {
            let msg = request
                .args
                .first()
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Response::ok(msg)
        }
        other => Response::error(format!("unknown command: {other}")),
    }
}
