//! Container entrypoint for a Telegram bot.
//!
//! Startup sequence:
//! 1. Resolve settings from the environment ([`config`])
//! 2. Install SIGTERM/SIGINT handlers ([`signals`])
//! 3. If API credentials are set, start `telegram-bot-api` and wait for its
//!    HTTP port ([`process`], [`readiness`])
//! 4. Start the bot, pointed at the local server when there is one
//! 5. Block until the bot exits or a signal arrives, then stop both
//!    ([`supervisor`])

pub mod command;
pub mod config;
pub mod error;
pub mod process;
pub mod readiness;
pub mod signals;
pub mod supervisor;
