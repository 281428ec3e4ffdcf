use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{InitError, InitResult};

/// Install SIGTERM/SIGINT handlers and cancel `shutdown` on every delivery.
///
/// Handlers are registered before this returns, so call it before starting
/// any child. Repeated signals only log: cancelling twice is a no-op.
pub fn listen(shutdown: CancellationToken) -> InitResult<JoinHandle<()>> {
    let mut sigterm = install(SignalKind::terminate(), "SIGTERM")?;
    let mut sigint = install(SignalKind::interrupt(), "SIGINT")?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                Some(()) = sigterm.recv() => "SIGTERM",
                Some(()) = sigint.recv() => "SIGINT",
                else => break,
            };
            if shutdown.is_cancelled() {
                info!(signal = name, "received {name}, already shutting down");
            } else {
                info!(signal = name, "received {name}, shutting down");
                shutdown.cancel();
            }
        }
    }))
}

fn install(kind: SignalKind, name: &'static str) -> InitResult<Signal> {
    signal(kind).map_err(|source| InitError::Signal {
        signal: name,
        source,
    })
}
