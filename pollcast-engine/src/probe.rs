//! TCP reachability probe, run once before the first poll.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;
use url::Url;

use crate::error::EngineError;

/// Default connect timeout for the probe.
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Checks that the endpoint's host accepts TCP connections.
///
/// This is a plain dial, no TLS handshake or HTTP exchange: the goal is to
/// fail fast on typos and firewalled hosts before the run loop starts. The
/// port falls back to 443 for https URLs and 80 otherwise.
pub async fn probe(url: &Url, timeout: Option<Duration>) -> Result<(), EngineError> {
    let host = url
        .host_str()
        .ok_or_else(|| EngineError::InvalidConfig(format!("url {url} has no host")))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "https" { 443 } else { 80 });
    let addr = format!("{host}:{port}");
    let timeout = timeout.unwrap_or(DEFAULT_PROBE_TIMEOUT);

    debug!(addr = %addr, "probing endpoint");
    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(EngineError::Transport(format!(
            "endpoint {addr} is unreachable: {e}"
        ))),
        Err(_) => Err(EngineError::Transport(format!(
            "connection to {addr} timed out"
        ))),
    }
}
