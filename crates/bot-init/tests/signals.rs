//! Delivers real signals to the test process. Kept in its own test binary so
//! the installed handlers cannot affect other tests.

use std::time::Duration;

use bot_init::signals;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn sigterm_and_repeat_sigint_cancel_once() {
    let shutdown = CancellationToken::new();
    let listener = signals::listen(shutdown.clone()).unwrap();

    kill(Pid::this(), Signal::SIGTERM).unwrap();
    tokio::time::timeout(Duration::from_secs(5), shutdown.cancelled())
        .await
        .expect("SIGTERM did not cancel the token");

    // A second signal during shutdown is absorbed by the handler.
    kill(Pid::this(), Signal::SIGINT).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(shutdown.is_cancelled());
    assert!(!listener.is_finished());

    listener.abort();
}
