//! Startup ordering and shutdown for the local Bot API server and the bot.
//!
//! The bot is never started before the local server (when configured) has
//! opened its port. Every blocking point races the shutdown token, and
//! [`Supervisor::shutdown`] always runs before [`Supervisor::run`] returns.

use std::process::ExitStatus;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::command::{self, LaunchSpec};
use crate::config::{Settings, vars};
use crate::error::{InitError, InitResult};
use crate::process::{self, ChildProcess};
use crate::readiness::{self, PortProbe, ProbePolicy, ReadinessError, TcpProbe};

pub(crate) const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

const SERVER: &str = "telegram-bot-api";
const APP: &str = "bot";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPlan {
    pub launch: LaunchSpec,
    pub port: u16,
}

/// What to start, in order, and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub server: Option<ServerPlan>,
    pub app: LaunchSpec,
    pub probe: ProbePolicy,
    /// Grace period between SIGTERM and SIGKILL at shutdown.
    pub stop_timeout: Duration,
}

impl Plan {
    pub fn new(settings: &Settings, server_bin: &str, app: LaunchSpec) -> Self {
        let server = settings.server.as_ref().map(|s| ServerPlan {
            launch: LaunchSpec::new(server_bin, command::server_args(s)),
            port: s.http_port,
        });
        Self {
            server,
            app,
            probe: ProbePolicy::default(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    /// The bot exited on its own with this code.
    Exited(i32),
    /// Shutdown was requested (SIGTERM/SIGINT).
    Interrupted,
    /// Startup failed; the bot either never started or could not be waited on.
    Failed(InitError),
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Interrupted => 0,
            Self::Failed(_) => 1,
        }
    }
}

/// Owns both child processes. Nothing else signals or reaps them.
pub struct Supervisor {
    plan: Plan,
    probe: Box<dyn PortProbe>,
    server: Option<ChildProcess>,
    app: Option<ChildProcess>,
}

impl Supervisor {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            probe: Box::new(TcpProbe),
            server: None,
            app: None,
        }
    }

    pub fn with_probe(mut self, probe: impl PortProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    /// Start everything, block until the bot exits or `shutdown` fires, then
    /// stop whatever is still running.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> Outcome {
        let outcome = match self.start_and_wait(shutdown).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "startup failed");
                Outcome::Failed(e)
            }
        };
        self.shutdown().await;
        outcome
    }

    async fn start_and_wait(&mut self, shutdown: &CancellationToken) -> InitResult<Outcome> {
        let mut app = self.plan.app.clone();

        if let Some(server) = &self.plan.server {
            let child = self.server.insert(process::spawn(SERVER, &server.launch)?);
            info!(
                port = server.port,
                max_attempts = self.plan.probe.max_attempts,
                "waiting for local server"
            );
            match readiness::wait_until_ready(
                child,
                &*self.probe,
                server.port,
                self.plan.probe,
                shutdown,
            )
            .await
            {
                Ok(attempts) => info!(port = server.port, attempts, "local server ready"),
                Err(ReadinessError::Cancelled) => return Ok(Outcome::Interrupted),
                Err(e) => {
                    match &e {
                        ReadinessError::Exited { .. } => {
                            error!(error = %e, "local server died during startup");
                        }
                        _ => error!(
                            port = server.port,
                            error = %e,
                            "local server never opened its port"
                        ),
                    }
                    return Err(e.into());
                }
            }
            let url = format!("http://localhost:{}", server.port);
            info!(%url, "pointing bot at local server");
            app = app.with_env(vars::LOCAL_API_URL, url);
        } else {
            info!("no local server, bot uses the public Bot API");
        }

        if shutdown.is_cancelled() {
            return Ok(Outcome::Interrupted);
        }
        let child = self.app.insert(process::spawn(APP, &app)?);
        wait_for_app(child, self.server.as_mut(), shutdown).await
    }

    /// SIGTERM the bot and then the local server, and wait for both.
    ///
    /// Children that already exited are skipped; calling this again after
    /// it finished does nothing.
    pub async fn shutdown(&mut self) {
        let children: Vec<ChildProcess> = [self.app.take(), self.server.take()]
            .into_iter()
            .flatten()
            .collect();
        if children.is_empty() {
            return;
        }

        for child in &children {
            child.terminate();
        }
        for mut child in children {
            child.reap(self.plan.stop_timeout).await;
        }
        info!("shutdown complete");
    }
}

/// Block on the bot. A local server dying underneath it is logged, not fatal.
async fn wait_for_app(
    app: &mut ChildProcess,
    mut server: Option<&mut ChildProcess>,
    shutdown: &CancellationToken,
) -> InitResult<Outcome> {
    loop {
        tokio::select! {
            status = app.wait() => {
                let code = process::exit_code(status?);
                info!(code, "bot exited");
                return Ok(Outcome::Exited(code));
            }
            status = wait_watched(&mut server) => {
                warn!(
                    code = status.ok().map(process::exit_code),
                    "local server exited while the bot is running"
                );
                server = None;
            }
            _ = shutdown.cancelled() => return Ok(Outcome::Interrupted),
        }
    }
}

/// Await a watched child, or pend forever if there is none.
async fn wait_watched(child: &mut Option<&mut ChildProcess>) -> InitResult<ExitStatus> {
    match child {
        Some(c) => c.wait().await,
        None => std::future::pending().await,
    }
}
