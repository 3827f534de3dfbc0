//! Readiness probing: wait until the subject accepts TCP connections

use std::time::Duration;
use tokio::net::TcpStream;

use crate::common::config::ReadinessConfig;
use crate::common::{Error, Result};

/// Per-attempt connect timeout, capped by the interval
const CONNECT_TIMEOUT_MS: u64 = 1000;

/// Retry budget for the readiness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self::from(&ReadinessConfig::default())
    }
}

impl From<&ReadinessConfig> for ProbePolicy {
    fn from(config: &ReadinessConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }
}

/// Try a single connect; the connection is closed immediately
pub async fn is_listening(host: &str, port: u16, connect_timeout: Duration) -> bool {
    match tokio::time::timeout(connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            true
        }
        _ => false,
    }
}

/// Poll `(host, port)` until it accepts a connection
///
/// Returns the attempt number that succeeded. `alive` is consulted before
/// every attempt so a subject that already exited fails fast instead of
/// burning the whole budget.
pub async fn wait_ready<F>(host: &str, port: u16, policy: ProbePolicy, mut alive: F) -> Result<u32>
where
    F: FnMut() -> Result<()>,
{
    let connect_timeout =
        Duration::from_millis(CONNECT_TIMEOUT_MS).min(policy.interval.max(Duration::from_millis(10)));

    for attempt in 1..=policy.max_attempts {
        alive()?;

        if is_listening(host, port, connect_timeout).await {
            tracing::debug!("{}:{} accepted connection on attempt {}", host, port, attempt);
            return Ok(attempt);
        }

        if attempt == 1 {
            tracing::info!("Waiting for subject on {}:{}...", host, port);
        } else {
            tracing::debug!(
                "Readiness attempt {}/{} for {}:{} refused",
                attempt,
                policy.max_attempts,
                host,
                port
            );
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(Error::NotReady {
        host: host.to_string(),
        port,
        attempts: policy.max_attempts,
        interval_ms: policy.interval.as_millis() as u64,
    })
}
