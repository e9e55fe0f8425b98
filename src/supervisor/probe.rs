//! TCP reachability probe for client endpoints

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{GridError, Result};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// `Ok(true)` if a TCP connection succeeds, `Ok(false)` if it is refused
/// or otherwise fails, and an error if nothing answers within `timeout`.
pub async fn check_connection(host: &str, port: u16, timeout: Duration) -> Result<bool> {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => {
            debug!(host, port, "Endpoint reachable");
            Ok(true)
        }
        Ok(Err(e)) => {
            debug!(host, port, error = %e, "Endpoint unreachable");
            Ok(false)
        }
        Err(_) => Err(GridError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connection to {}:{} timed out after {:?}", host, port, timeout),
        ))),
    }
}
