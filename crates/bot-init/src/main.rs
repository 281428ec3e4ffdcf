use std::fmt;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use bot_init::command::LaunchSpec;
use bot_init::config::Settings;
use bot_init::signals;
use bot_init::supervisor::{Plan, Supervisor};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

const LOG_ENV: &str = "BOT_INIT_LOG";

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

/// Start the local Telegram Bot API server (when credentials are set), then
/// run the bot until it exits or the container is stopped.
#[derive(Parser)]
#[command(name = "bot-init", version)]
struct Cli {
    /// Path to the telegram-bot-api binary
    #[arg(long, env = "TELEGRAM_BOT_API_BIN", default_value = "telegram-bot-api")]
    server_bin: String,
    /// Seconds to wait after SIGTERM before killing a child
    #[arg(long, env = "BOT_INIT_STOP_TIMEOUT", default_value_t = 10)]
    stop_timeout: u64,
    /// Bot command line
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        default_values_t = ["python".to_string(), "main.py".to_string()]
    )]
    command: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(Elapsed(Instant::now()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let app = match LaunchSpec::from_argv("bot", &cli.command) {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "invalid bot command");
            return ExitCode::FAILURE;
        }
    };

    // Handlers go in before any child exists.
    let shutdown = CancellationToken::new();
    if let Err(e) = signals::listen(shutdown.clone()) {
        error!(error = %e, "signal setup failed");
        return ExitCode::FAILURE;
    }

    let settings = Settings::from_env();
    let mut plan = Plan::new(&settings, &cli.server_bin, app);
    plan.stop_timeout = Duration::from_secs(cli.stop_timeout);

    let outcome = Supervisor::new(plan).run(&shutdown).await;
    ExitCode::from(u8::try_from(outcome.exit_code()).unwrap_or(1))
}
