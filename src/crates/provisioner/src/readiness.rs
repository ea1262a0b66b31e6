//! Bounded readiness wait
//!
//! A freshly started database container is polled until it is running, its
//! port has a host binding and (optionally) the engine answers on that host
//! port. Polls back off exponentially with jitter and the whole wait is
//! bounded by `max_wait`.
//!
//! A bare TCP connect is not enough on Docker: the userland proxy accepts on
//! the published port before the engine inside listens. The connection check
//! therefore waits for the first bytes of the engine's own protocol.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::runtime::{ContainerHandle, ContainerRuntime, RuntimeError};

/// Readiness wait errors
#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("Container not ready after {0:?}")]
    Timeout(Duration),

    #[error("Readiness wait cancelled")]
    Cancelled,

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// PostgreSQL `SSLRequest`: length 8, request code 80877103
const PG_SSL_REQUEST: [u8; 8] = [0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f];

/// Protocol version byte opening a MySQL initial handshake packet
const MYSQL_HANDSHAKE_V10: u8 = 0x0a;

/// How the connection check decides an engine is answering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireProtocol {
    /// Accepting a connection is enough
    #[default]
    Tcp,
    /// Server replies `S` or `N` to an `SSLRequest`
    Postgres,
    /// Server greets with a protocol 10 handshake packet
    Mysql,
}

impl WireProtocol {
    /// Connect to `host:port` and wait for the engine to speak
    pub async fn check(self, host: &str, port: u16) -> io::Result<()> {
        let mut stream = TcpStream::connect((host, port)).await?;

        match self {
            WireProtocol::Tcp => Ok(()),
            WireProtocol::Postgres => {
                stream.write_all(&PG_SSL_REQUEST).await?;
                let reply = stream.read_u8().await?;
                match reply {
                    b'S' | b'N' => Ok(()),
                    other => Err(unexpected(format!("SSLRequest reply 0x{other:02x}"))),
                }
            }
            WireProtocol::Mysql => {
                let mut header = [0u8; 4];
                stream.read_exact(&mut header).await?;
                let length = u32::from_le_bytes([header[0], header[1], header[2], 0]);
                if length == 0 {
                    return Err(unexpected("empty handshake packet".to_string()));
                }
                let version = stream.read_u8().await?;
                if version != MYSQL_HANDSHAKE_V10 {
                    return Err(unexpected(format!("handshake protocol 0x{version:02x}")));
                }
                Ok(())
            }
        }
    }
}

fn unexpected(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Poll-with-backoff parameters
#[derive(Debug, Clone)]
pub struct ReadinessPolicy {
    /// Upper bound on the whole wait
    pub max_wait: Duration,

    /// Delay after the first unsuccessful poll
    pub initial_interval: Duration,

    /// Multiplier for the delay after each poll
    pub backoff_factor: f64,

    /// Cap on a single delay
    pub max_interval: Duration,

    /// Scale each delay by a random factor in 0.5..=1.5
    pub jitter: bool,

    /// Require the engine to answer on the published port
    pub tcp_probe: bool,

    pub probe_timeout: Duration,
}

impl ReadinessPolicy {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            max_wait,
            initial_interval: Duration::from_millis(250),
            backoff_factor: 2.0,
            max_interval: Duration::from_secs(5),
            jitter: true,
            tcp_probe: true,
            probe_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_tcp_probe(mut self, tcp_probe: bool) -> Self {
        self.tcp_probe = tcp_probe;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Delay after the given unsuccessful poll (0-indexed)
    ///
    /// `initial_interval * backoff_factor ^ attempt`, capped at `max_interval`,
    /// with optional jitter.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_interval.as_secs_f64()
            * self.backoff_factor.powi(attempt.min(i32::MAX as u32) as i32);
        let capped = base.min(self.max_interval.as_secs_f64());

        let delay = if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.5);
            capped * factor
        } else {
            capped
        };

        Duration::try_from_secs_f64(delay).unwrap_or(self.max_interval)
    }
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

/// Wait until the container is running and `container_port` is answering
///
/// `host` is where the published port is checked, speaking `protocol`. Each
/// inspection is bounded by `call_timeout`; an inspection that times out is
/// reported as [`RuntimeError::Unavailable`].
#[allow(clippy::too_many_arguments)]
pub async fn await_ready(
    runtime: &dyn ContainerRuntime,
    handle: &ContainerHandle,
    container_port: u16,
    protocol: WireProtocol,
    host: &str,
    policy: &ReadinessPolicy,
    call_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), ReadinessError> {
    // None: max_wait reaches past the clock's range, so the wait is unbounded
    let deadline = Instant::now().checked_add(policy.max_wait);
    let mut attempt: u32 = 0;

    loop {
        let inspection = tokio::select! {
            _ = cancel.cancelled() => return Err(ReadinessError::Cancelled),
            result = tokio::time::timeout(call_timeout, runtime.inspect_container(handle)) => {
                result.map_err(|_| {
                    RuntimeError::Unavailable(format!("inspect timed out after {:?}", call_timeout))
                })??
            }
        };

        let host_port = inspection
            .published_ports
            .get(&container_port)
            .copied()
            .filter(|_| inspection.running);

        if let Some(host_port) = host_port {
            if !policy.tcp_probe {
                return Ok(());
            }

            let check = tokio::time::timeout(policy.probe_timeout, protocol.check(host, host_port));
            let answered = tokio::select! {
                _ = cancel.cancelled() => return Err(ReadinessError::Cancelled),
                result = check => result,
            };
            match answered {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) => {
                    debug!(container = %handle, host_port, attempt, ?protocol, error = %err, "Engine not answering yet")
                }
                Err(_) => {
                    debug!(container = %handle, host_port, attempt, ?protocol, "Engine handshake timed out")
                }
            }
        } else {
            debug!(
                container = %handle,
                running = inspection.running,
                attempt,
                "Container not ready"
            );
        }

        let mut delay = policy.calculate_delay(attempt);
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                return Err(ReadinessError::Timeout(policy.max_wait));
            }
            delay = delay.min(deadline - now);
        }
        attempt = attempt.saturating_add(1);

        tokio::select! {
            _ = cancel.cancelled() => return Err(ReadinessError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
