use crate::config::{STAT_PORT, ServerSettings};
use crate::error::{InitError, InitResult};

const API_HASH_FLAG: &str = "--api-hash=";

/// A program to run, its ordered arguments, and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
        }
    }

    /// Split an argv-style vector into program and arguments.
    pub fn from_argv(name: &str, argv: &[String]) -> InitResult<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| InitError::EmptyCommand(name.to_string()))?;
        Ok(Self::new(program.clone(), args.to_vec()))
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Human-readable command line for logs, with the API hash redacted.
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().map(|arg| {
            if arg.starts_with(API_HASH_FLAG) {
                format!("{API_HASH_FLAG}***")
            } else {
                arg.clone()
            }
        }));
        parts.join(" ")
    }
}

/// Build the `telegram-bot-api` argument list.
///
/// Deterministic: required flags first, then each optional setting in a fixed
/// order, contributing at most one argument and only when it is set.
pub fn server_args(settings: &ServerSettings) -> Vec<String> {
    let mut args = vec![
        format!("--api-id={}", settings.credentials.api_id),
        format!("{API_HASH_FLAG}{}", settings.credentials.api_hash),
        format!("--http-port={}", settings.http_port),
        format!("--dir={}", settings.work_dir),
        format!("--temp-dir={}", settings.temp_dir),
    ];

    let mut opt = |flag: &str, value: Option<&str>| {
        if let Some(v) = value {
            args.push(format!("--{flag}={v}"));
        }
    };
    opt("http-ip-address", settings.http_ip_address.as_deref());
    if settings.stats {
        opt("http-stat-port", Some(&STAT_PORT.to_string()));
    }
    opt("filter", settings.filter.as_ref().map(|f| f.as_str()));
    opt(
        "max-webhook-connections",
        settings.max_webhook_connections.as_deref(),
    );
    opt("verbosity", settings.verbosity.as_deref());
    opt("log", settings.log_file.as_deref());
    opt("max-connections", settings.max_connections.as_deref());
    opt("proxy", settings.proxy.as_deref());

    if settings.local_mode {
        args.push("--local".to_string());
    }
    args
}
