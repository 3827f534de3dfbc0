//! Freeing the subject's port from a stale process

use std::process::Command;
use std::time::Duration;

use crate::common::{Error, Result};

use super::probe::is_listening;

/// How long to wait for the port to be released after signalling
const RELEASE_TIMEOUT_MS: u64 = 3000;
const RELEASE_POLL_MS: u64 = 100;

/// Pids listening on `port`, as reported by `lsof`
pub fn listening_pids(port: u16) -> Result<Vec<u32>> {
    let lsof = which::which("lsof")
        .map_err(|_| Error::Internal("lsof not found in PATH; cannot identify port holder".into()))?;

    let output = Command::new(lsof)
        .args(["-t", "-n", "-P", &format!("-iTCP:{port}"), "-sTCP:LISTEN"])
        .output()?;

    // lsof exits 1 when nothing matches
    Ok(parse_pids(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_pids(stdout: &str) -> Vec<u32> {
    let own = std::process::id();
    let mut pids: Vec<u32> = stdout
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .filter(|pid| *pid != own)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

#[cfg(unix)]
fn signal_terminate(pid: u32) -> bool {
    // SAFETY: signal delivery only; the pid came from lsof
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn signal_terminate(_pid: u32) -> bool {
    false
}

/// Make sure nothing listens on `(host, port)` before the subject starts
///
/// Holders are sent SIGTERM. The port must be free within a few seconds,
/// otherwise startup fails with [`Error::PortInUse`].
pub async fn free_port(host: &str, port: u16) -> Result<()> {
    free_port_within(host, port, Duration::from_millis(RELEASE_TIMEOUT_MS)).await
}

async fn free_port_within(host: &str, port: u16, release_timeout: Duration) -> Result<()> {
    let connect_timeout = Duration::from_millis(200);
    if !is_listening(host, port, connect_timeout).await {
        return Ok(());
    }

    let pids = match listening_pids(port) {
        Ok(pids) => pids,
        Err(e) => {
            tracing::warn!("Port {} is busy and its holder is unknown: {}", port, e);
            Vec::new()
        }
    };

    for pid in &pids {
        if signal_terminate(*pid) {
            tracing::info!("Sent SIGTERM to pid {} holding port {}", pid, port);
        } else {
            tracing::warn!("Could not signal pid {} holding port {}", pid, port);
        }
    }

    let deadline = std::time::Instant::now() + release_timeout;
    while std::time::Instant::now() < deadline {
        if !is_listening(host, port, connect_timeout).await {
            tracing::debug!("Port {} released", port);
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(RELEASE_POLL_MS)).await;
    }

    Err(Error::PortInUse {
        port,
        holder: pids.first().copied(),
    })
}
