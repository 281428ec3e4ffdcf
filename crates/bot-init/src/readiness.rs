//! Readiness polling for the local server.
//!
//! Each attempt checks liveness before connectivity so a crashed server is
//! told apart from one that is still starting. Both waits (the probe and the
//! interval sleep) race the shutdown token.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 30;
pub(crate) const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
        }
    }
}

/// Whether a watched process is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// `code` is `None` when the process was killed by a signal.
    Exited { code: Option<i32> },
}

/// Non-blocking liveness check. Implemented by [`crate::process::ChildProcess`].
pub trait Watch {
    fn liveness(&mut self) -> Liveness;
}

/// Connectivity check against a local port.
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_open(&self, port: u16) -> bool;
}

/// Probes by opening a TCP connection to `localhost:<port>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

#[async_trait]
impl PortProbe for TcpProbe {
    async fn is_open(&self, port: u16) -> bool {
        tokio::net::TcpStream::connect(("localhost", port))
            .await
            .is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadinessError {
    #[error("process exited before becoming ready ({})", exit_label(.code))]
    Exited { code: Option<i32>, attempts: u32 },

    #[error("port {port} still closed after {attempts} attempts")]
    Exhausted { port: u16, attempts: u32 },

    #[error("cancelled while waiting for readiness")]
    Cancelled,
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "killed by signal".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    /// `attempt` probes have been made so far.
    Waiting { attempt: u32 },
    Ready { attempts: u32 },
    Failed(ReadinessError),
}

impl ReadinessState {
    fn observe_liveness(self, liveness: Liveness) -> Self {
        match (self, liveness) {
            (Self::Waiting { attempt }, Liveness::Exited { code }) => {
                Self::Failed(ReadinessError::Exited {
                    code,
                    attempts: attempt,
                })
            }
            (state, _) => state,
        }
    }

    fn observe_probe(self, open: bool, port: u16, max_attempts: u32) -> Self {
        match self {
            Self::Waiting { attempt } => {
                let attempt = attempt + 1;
                if open {
                    Self::Ready { attempts: attempt }
                } else if attempt >= max_attempts {
                    Self::Failed(ReadinessError::Exhausted {
                        port,
                        attempts: attempt,
                    })
                } else {
                    Self::Waiting { attempt }
                }
            }
            state => state,
        }
    }
}

/// Poll `port` until it accepts connections, the process dies, the attempt
/// budget runs out, or `shutdown` is cancelled.
///
/// Returns the number of probes it took to become ready.
pub async fn wait_until_ready<W, P>(
    child: &mut W,
    probe: &P,
    port: u16,
    policy: ProbePolicy,
    shutdown: &CancellationToken,
) -> Result<u32, ReadinessError>
where
    W: Watch + ?Sized,
    P: PortProbe + ?Sized,
{
    let mut state = ReadinessState::Waiting { attempt: 0 };
    loop {
        state = state.observe_liveness(child.liveness());
        if matches!(state, ReadinessState::Waiting { .. }) {
            let open = tokio::select! {
                open = probe.is_open(port) => open,
                _ = shutdown.cancelled() => return Err(ReadinessError::Cancelled),
            };
            state = state.observe_probe(open, port, policy.max_attempts);
        }

        match state {
            ReadinessState::Ready { attempts } => return Ok(attempts),
            ReadinessState::Failed(e) => return Err(e),
            ReadinessState::Waiting { attempt } => {
                debug!(port, attempt, max = policy.max_attempts, "port not open yet");
                tokio::select! {
                    _ = tokio::time::sleep(policy.interval) => {}
                    _ = shutdown.cancelled() => return Err(ReadinessError::Cancelled),
                }
            }
        }
    }
}
