//! Client side of the control protocol. Every public function here returns
//! a plain `Response`, never an `Err`: connection failures, timeouts, and
//! malformed replies are all normalized into `Response{err: true, msg}` with
//! the message prefixes the source uses, so callers (farm_view, the
//! controller's kill paths) have one shape to handle.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{Request, Response};

/// Connection parameters for a remote kill/control request.
#[derive(Debug, Clone, Copy)]
pub struct TcpKillConfig {
    pub timeout: Duration,
}

impl Default for TcpKillConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

enum ClientError {
    Timeout,
    Eof,
    Socket(std::io::Error),
    Other(String),
}

/// Send `request` to `addr` and return its response, normalizing every
/// failure mode into an `err: true` `Response`.
pub async fn send_request(addr: SocketAddr, request: &Request, config: TcpKillConfig) -> Response {
    match tokio::time::timeout(config.timeout, try_send_request(addr, request)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => Response::error(format_client_error(e)),
        Err(_) => Response::error("TimeoutError: no response from control server".to_string()),
    }
}

/// Convenience wrapper over `send_request` for the common case: ask the
/// worker at `addr` to finalize its current task to `new_status`.
pub async fn kill_current_task(
    addr: SocketAddr,
    new_status: char,
    config: TcpKillConfig,
) -> Response {
    let request =
        Request::new("kill_current_task").with_kwarg("status", new_status.to_string());
    send_request(addr, &request, config).await
}

async fn try_send_request(addr: SocketAddr, request: &Request) -> Result<Response, ClientError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(ClientError::Socket)?;

    let mut line = serde_json::to_string(request)
        .map_err(|e| ClientError::Other(e.to_string()))?;
    line.push('\n');

    stream
        .write_all(line.as_bytes())
        .await
        .map_err(ClientError::Socket)?;
    stream.shutdown().await.map_err(ClientError::Socket)?;

    let mut buf = Vec::new();
    stream
        .read_to_end(&mut buf)
        .await
        .map_err(ClientError::Socket)?;

    if buf.is_empty() {
        return Err(ClientError::Eof);
    }

    serde_json::from_slice::<Response>(&buf)
        .map_err(|e| ClientError::Other(format!("malformed response: {e}")))
}

fn format_client_error(e: ClientError) -> String {
    match e {
        ClientError::Timeout => "TimeoutError: no response from control server".to_string(),
        ClientError::Eof => "EOF Error".to_string(),
        ClientError::Socket(e) => format!("Socket Error: {e}"),
        ClientError::Other(msg) => format!("Unhandled Exception: {msg}"),
    }
}
