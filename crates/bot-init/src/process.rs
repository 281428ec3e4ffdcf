use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::command::LaunchSpec;
use crate::error::{InitError, InitResult};
use crate::readiness::{Liveness, Watch};

/// A spawned child owned by the supervisor.
///
/// Only the owner signals or reaps it. The exit status is cached once
/// observed, so `wait` and `stop` can be called any number of times.
#[derive(Debug)]
pub struct ChildProcess {
    name: String,
    pid: u32,
    child: tokio::process::Child,
    status: Option<ExitStatus>,
}

/// Spawn `spec` in the background. stdout/stderr are inherited so the
/// child's output lands in the container log as-is.
pub fn spawn(name: &str, spec: &LaunchSpec) -> InitResult<ChildProcess> {
    let mut cmd = tokio::process::Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    info!(name, command = %spec.display(), "starting");

    let child = cmd.spawn().map_err(|source| InitError::Spawn {
        program: spec.program.clone(),
        source,
    })?;
    // A freshly spawned child always has a pid until it is reaped.
    let pid = child.id().unwrap_or_default();
    info!(name, pid, "started");

    Ok(ChildProcess {
        name: name.to_string(),
        pid,
        child,
        status: None,
    })
}

impl ChildProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit status if the child has already exited, without blocking.
    pub fn try_status(&mut self) -> InitResult<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait().map_err(|source| InitError::Wait {
                name: self.name.clone(),
                source,
            })?;
        }
        Ok(self.status)
    }

    /// Block until the child exits.
    pub async fn wait(&mut self) -> InitResult<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait().await.map_err(|source| InitError::Wait {
            name: self.name.clone(),
            source,
        })?;
        self.status = Some(status);
        Ok(status)
    }

    /// Send SIGTERM. A child that is already gone is not an error.
    pub fn terminate(&self) {
        if self.status.is_some() {
            return;
        }
        // `id()` is None once tokio has reaped the child.
        let Some(pid) = self.child.id().and_then(|p| i32::try_from(p).ok()) else {
            return;
        };
        if let Err(e) = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid),
            nix::sys::signal::Signal::SIGTERM,
        ) {
            debug!(name = %self.name, pid, error = %e, "SIGTERM not delivered");
        }
    }

    /// Wait up to `grace` for the child to exit after [`Self::terminate`],
    /// then SIGKILL it. Returns the exit status when one could be collected.
    pub async fn reap(&mut self, grace: Duration) -> Option<ExitStatus> {
        if let Some(status) = self.status {
            return Some(status);
        }
        match tokio::time::timeout(grace, self.wait()).await {
            Ok(Ok(status)) => {
                info!(name = %self.name, code = status.code(), "stopped");
                return Some(status);
            }
            Ok(Err(e)) => {
                debug!(name = %self.name, error = %e, "wait failed during shutdown, sending SIGKILL");
            }
            Err(_) => {
                warn!(name = %self.name, pid = self.pid, "did not exit in time, sending SIGKILL");
            }
        }
        self.kill().await
    }

    async fn kill(&mut self) -> Option<ExitStatus> {
        if let Err(e) = self.child.kill().await {
            debug!(name = %self.name, error = %e, "SIGKILL failed");
        }
        self.wait().await.ok()
    }

    /// SIGTERM, then [`Self::reap`].
    pub async fn stop(&mut self, grace: Duration) -> Option<ExitStatus> {
        self.terminate();
        self.reap(grace).await
    }
}

impl Watch for ChildProcess {
    fn liveness(&mut self) -> Liveness {
        match self.try_status() {
            Ok(None) => Liveness::Alive,
            Ok(Some(status)) => Liveness::Exited {
                code: status.code(),
            },
            Err(e) => {
                warn!(error = %e, "liveness check failed, treating as exited");
                Liveness::Exited { code: None }
            }
        }
    }
}

/// Shell-style exit code: the process's own code, or 128 + signal number.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn spawn_and_wait_reports_exit_code() {
        let mut child = spawn("test", &sh("exit 7")).unwrap();
        assert!(child.pid() > 0);
        let status = child.wait().await.unwrap();
        assert_eq!(status.code(), Some(7));
        // Cached on repeat.
        assert_eq!(child.wait().await.unwrap().code(), Some(7));
    }

    #[tokio::test]
    async fn spawn_missing_binary_fails() {
        let spec = LaunchSpec::new("/nonexistent/telegram-bot-api", vec![]);
        let err = spawn("server", &spec).unwrap_err();
        assert!(
            matches!(err, InitError::Spawn { ref program, .. } if program == "/nonexistent/telegram-bot-api"),
            "got: {err}"
        );
    }

    #[tokio::test]
    async fn env_is_passed_to_child() {
        let spec = sh(r#"test "$BOT_INIT_TEST_VAR" = "hello""#).with_env("BOT_INIT_TEST_VAR", "hello");
        let mut child = spawn("test", &spec).unwrap();
        assert_eq!(child.wait().await.unwrap().code(), Some(0));
    }

    #[tokio::test]
    async fn liveness_tracks_exit() {
        let mut child = spawn("test", &sh("exit 3")).unwrap();
        child.wait().await.unwrap();
        assert_eq!(child.liveness(), Liveness::Exited { code: Some(3) });

        let mut sleeper = spawn("sleeper", &LaunchSpec::new("sleep", vec!["30".into()])).unwrap();
        assert_eq!(sleeper.liveness(), Liveness::Alive);
        sleeper.stop(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn stop_terminates_and_is_idempotent() {
        let mut child = spawn("sleeper", &LaunchSpec::new("sleep", vec!["30".into()])).unwrap();
        let status = child.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(status.signal(), Some(sigterm()));
        assert_eq!(exit_code(status), 128 + sigterm());

        // Second stop neither signals nor blocks.
        let again = child.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(again, status);
    }

    #[tokio::test]
    async fn stop_kills_after_grace() {
        let mut child = spawn("stubborn", &sh("trap '' TERM; exec sleep 30")).unwrap();
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = child.stop(Duration::from_millis(300)).await.unwrap();
        assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGKILL as i32));
    }

    #[tokio::test]
    async fn kill_collects_status_of_live_child() {
        let mut child = spawn("stubborn", &sh("trap '' TERM; exec sleep 30")).unwrap();
        let status = child.kill().await.unwrap();
        assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGKILL as i32));
        assert_eq!(child.liveness(), Liveness::Exited { code: None });
        // The cached status is reused after the fallback kill.
        assert_eq!(child.reap(Duration::from_secs(1)).await, Some(status));
    }

    #[tokio::test]
    async fn terminate_after_exit_is_noop() {
        let mut child = spawn("test", &sh("exit 0")).unwrap();
        child.wait().await.unwrap();
        child.terminate();
        assert_eq!(child.stop(Duration::from_secs(1)).await.unwrap().code(), Some(0));
    }

    fn sigterm() -> i32 {
        nix::sys::signal::Signal::SIGTERM as i32
    }
}
