//! Environment-driven configuration for the local Bot API server.
//!
//! The environment is read exactly once into a [`Settings`] snapshot. The
//! resolver itself is pure over a lookup closure so it can be exercised
//! without touching the process environment.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

pub(crate) const DEFAULT_HTTP_PORT: u16 = 8081;
pub(crate) const STAT_PORT: u16 = 8082;
pub(crate) const DEFAULT_WORK_DIR: &str = "/var/lib/telegram-bot-api";
pub(crate) const DEFAULT_TEMP_DIR: &str = "/tmp/telegram-bot-api";

/// Environment variable names.
pub mod vars {
    pub const API_ID: &str = "TELEGRAM_API_ID";
    pub const API_HASH: &str = "TELEGRAM_API_HASH";
    pub const HTTP_PORT: &str = "TELEGRAM_HTTP_PORT";
    /// Older deployments set this instead of `TELEGRAM_HTTP_PORT`.
    pub const LEGACY_HTTP_PORT: &str = "LOCAL_API_PORT";
    pub const WORK_DIR: &str = "TELEGRAM_WORK_DIR";
    pub const TEMP_DIR: &str = "TELEGRAM_TEMP_DIR";
    pub const HTTP_IP_ADDRESS: &str = "TELEGRAM_HTTP_IP_ADDRESS";
    pub const STAT: &str = "TELEGRAM_STAT";
    pub const FILTER: &str = "TELEGRAM_FILTER";
    pub const MAX_WEBHOOK_CONNECTIONS: &str = "TELEGRAM_MAX_WEBHOOK_CONNECTIONS";
    pub const VERBOSITY: &str = "TELEGRAM_VERBOSITY";
    pub const LOG_FILE: &str = "TELEGRAM_LOGS";
    pub const MAX_CONNECTIONS: &str = "TELEGRAM_MAX_CONNECTIONS";
    pub const PROXY: &str = "TELEGRAM_PROXY";
    pub const LOCAL: &str = "TELEGRAM_LOCAL";
    /// Set for the bot when the local server is up.
    pub const LOCAL_API_URL: &str = "TELEGRAM_LOCAL_API_URL";
}

#[allow(clippy::expect_used)] // literal pattern
static FILTER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(0|[1-9][0-9]*)/[1-9][0-9]*$").expect("filter pattern compiles")
});

/// API credentials for the local server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_id: String,
    pub api_hash: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_id", &self.api_id)
            .field("api_hash", &"***")
            .finish()
    }
}

/// A validated `<remainder>/<modulo>` update filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter(String);

impl Filter {
    pub fn parse(raw: &str) -> Option<Self> {
        FILTER_PATTERN
            .is_match(raw)
            .then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Everything needed to launch the local Bot API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub credentials: Credentials,
    pub http_port: u16,
    pub work_dir: String,
    pub temp_dir: String,
    pub http_ip_address: Option<String>,
    pub stats: bool,
    pub filter: Option<Filter>,
    pub max_webhook_connections: Option<String>,
    pub verbosity: Option<String>,
    pub log_file: Option<String>,
    pub max_connections: Option<String>,
    pub proxy: Option<String>,
    pub local_mode: bool,
}

/// Immutable configuration snapshot, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// `None` when credentials are missing: the bot talks to the public Bot API.
    pub server: Option<ServerSettings>,
}

/// A recovered configuration problem. The offending setting is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    InvalidFilter(String),
    InvalidPort { var: &'static str, value: String },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFilter(value) => write!(
                f,
                "{} must look like <remainder>/<modulo>, ignoring {value:?}",
                vars::FILTER
            ),
            Self::InvalidPort { var, value } => write!(
                f,
                "{var} is not a valid port, ignoring {value:?} (using {DEFAULT_HTTP_PORT})"
            ),
        }
    }
}

/// Result of resolving the environment: the snapshot plus anything dropped.
#[derive(Debug)]
pub struct Resolved {
    pub settings: Settings,
    pub warnings: Vec<ConfigWarning>,
}

impl Settings {
    /// Read the process environment once and log any recovered problems.
    pub fn from_env() -> Self {
        let Resolved { settings, warnings } = Self::resolve(|key| std::env::var(key).ok());
        for warning in &warnings {
            warn!("{warning}");
        }
        match &settings.server {
            Some(server) => info!(
                port = server.http_port,
                "local Bot API server enabled (uploads up to 2000MB)"
            ),
            None => info!(
                "{} or {} not set, using the public Bot API (uploads up to 50MB)",
                vars::API_ID,
                vars::API_HASH
            ),
        }
        settings
    }

    /// Resolve settings from an arbitrary lookup. Never fails: invalid
    /// optional values are dropped and reported in [`Resolved::warnings`].
    pub fn resolve<F>(lookup: F) -> Resolved
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let mut warnings = Vec::new();

        let (Some(api_id), Some(api_hash)) = (get(vars::API_ID), get(vars::API_HASH)) else {
            return Resolved {
                settings: Settings { server: None },
                warnings,
            };
        };

        let http_port = resolve_port(&get, &mut warnings);

        let filter = get(vars::FILTER).and_then(|raw| {
            let parsed = Filter::parse(&raw);
            if parsed.is_none() {
                warnings.push(ConfigWarning::InvalidFilter(raw));
            }
            parsed
        });

        let server = ServerSettings {
            credentials: Credentials { api_id, api_hash },
            http_port,
            work_dir: get(vars::WORK_DIR).unwrap_or_else(|| DEFAULT_WORK_DIR.to_string()),
            temp_dir: get(vars::TEMP_DIR).unwrap_or_else(|| DEFAULT_TEMP_DIR.to_string()),
            http_ip_address: get(vars::HTTP_IP_ADDRESS),
            stats: get(vars::STAT).is_some(),
            filter,
            max_webhook_connections: get(vars::MAX_WEBHOOK_CONNECTIONS),
            verbosity: get(vars::VERBOSITY),
            log_file: get(vars::LOG_FILE),
            max_connections: get(vars::MAX_CONNECTIONS),
            proxy: get(vars::PROXY),
            local_mode: get(vars::LOCAL).is_some(),
        };

        Resolved {
            settings: Settings {
                server: Some(server),
            },
            warnings,
        }
    }
}

/// First non-empty of the primary and legacy port variables wins.
fn resolve_port<F>(get: &F, warnings: &mut Vec<ConfigWarning>) -> u16
where
    F: Fn(&str) -> Option<String>,
{
    let chosen = get(vars::HTTP_PORT)
        .map(|v| (vars::HTTP_PORT, v))
        .or_else(|| get(vars::LEGACY_HTTP_PORT).map(|v| (vars::LEGACY_HTTP_PORT, v)));

    let Some((var, value)) = chosen else {
        return DEFAULT_HTTP_PORT;
    };
    match value.parse::<u16>() {
        Ok(port) if port != 0 => port,
        _ => {
            warnings.push(ConfigWarning::InvalidPort { var, value });
            DEFAULT_HTTP_PORT
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn resolve(pairs: &[(&str, &str)]) -> Resolved {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::resolve(|key| env.get(key).cloned())
    }

    fn with_creds(extra: &[(&'static str, &'static str)]) -> Resolved {
        let mut pairs = vec![(vars::API_ID, "12345"), (vars::API_HASH, "deadbeef")];
        pairs.extend_from_slice(extra);
        resolve(&pairs)
    }

    fn server(resolved: &Resolved) -> &ServerSettings {
        resolved.settings.server.as_ref().unwrap()
    }

    #[test]
    fn missing_credentials_disable_server() {
        for pairs in [
            vec![],
            vec![(vars::API_ID, "12345")],
            vec![(vars::API_HASH, "deadbeef")],
            vec![(vars::API_ID, "12345"), (vars::API_HASH, "")],
        ] {
            let resolved = resolve(&pairs);
            assert!(resolved.settings.server.is_none(), "pairs: {pairs:?}");
            assert!(resolved.warnings.is_empty());
        }
    }

    #[test]
    fn credentials_enable_server_with_defaults() {
        let resolved = with_creds(&[]);
        let s = server(&resolved);
        assert_eq!(s.credentials.api_id, "12345");
        assert_eq!(s.credentials.api_hash, "deadbeef");
        assert_eq!(s.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(s.work_dir, DEFAULT_WORK_DIR);
        assert_eq!(s.temp_dir, DEFAULT_TEMP_DIR);
        assert!(!s.stats);
        assert!(!s.local_mode);
        assert!(s.filter.is_none());
        assert!(s.proxy.is_none());
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn port_priority_chain() {
        let both = with_creds(&[(vars::HTTP_PORT, "9000"), (vars::LEGACY_HTTP_PORT, "7000")]);
        assert_eq!(server(&both).http_port, 9000);

        let legacy = with_creds(&[(vars::LEGACY_HTTP_PORT, "7000")]);
        assert_eq!(server(&legacy).http_port, 7000);

        let empty_primary = with_creds(&[(vars::HTTP_PORT, ""), (vars::LEGACY_HTTP_PORT, "7000")]);
        assert_eq!(server(&empty_primary).http_port, 7000);

        let neither = with_creds(&[]);
        assert_eq!(server(&neither).http_port, 8081);
    }

    #[test]
    fn invalid_port_falls_back_with_warning() {
        for bad in ["http", "0", "70000", "-1"] {
            let resolved = with_creds(&[(vars::HTTP_PORT, bad)]);
            assert_eq!(server(&resolved).http_port, DEFAULT_HTTP_PORT);
            assert_eq!(
                resolved.warnings,
                vec![ConfigWarning::InvalidPort {
                    var: vars::HTTP_PORT,
                    value: bad.to_string(),
                }]
            );
        }
    }

    #[test]
    fn valid_filters_are_kept() {
        for good in ["0/1", "1/2", "3/10", "0/100", "42/7"] {
            let resolved = with_creds(&[(vars::FILTER, good)]);
            assert_eq!(
                server(&resolved).filter.as_ref().map(Filter::as_str),
                Some(good),
                "filter {good}"
            );
            assert!(resolved.warnings.is_empty());
        }
    }

    #[test]
    fn invalid_filters_are_dropped_with_one_warning() {
        for bad in [
            "1/0", "01/2", "1/02", "a/b", "1", "/2", "1/", "-1/2", "1/2/3", "1 /2", " 1/2", "1/2 ",
        ] {
            let resolved = with_creds(&[(vars::FILTER, bad)]);
            assert!(server(&resolved).filter.is_none(), "filter {bad}");
            assert_eq!(resolved.warnings.len(), 1, "filter {bad}");
            assert!(
                resolved.warnings[0].to_string().contains(&format!("{bad:?}")),
                "warning should name {bad:?}: {}",
                resolved.warnings[0]
            );
        }
    }

    #[test]
    fn flags_and_passthrough_values() {
        let resolved = with_creds(&[
            (vars::STAT, "1"),
            (vars::LOCAL, "yes"),
            (vars::HTTP_IP_ADDRESS, "0.0.0.0"),
            (vars::VERBOSITY, "2"),
            (vars::LOG_FILE, "/var/log/bot-api.log"),
            (vars::MAX_CONNECTIONS, "200"),
            (vars::MAX_WEBHOOK_CONNECTIONS, "50"),
            (vars::PROXY, "http://proxy:3128"),
            (vars::WORK_DIR, "/data"),
        ]);
        let s = server(&resolved);
        assert!(s.stats);
        assert!(s.local_mode);
        assert_eq!(s.http_ip_address.as_deref(), Some("0.0.0.0"));
        assert_eq!(s.verbosity.as_deref(), Some("2"));
        assert_eq!(s.log_file.as_deref(), Some("/var/log/bot-api.log"));
        assert_eq!(s.max_connections.as_deref(), Some("200"));
        assert_eq!(s.max_webhook_connections.as_deref(), Some("50"));
        assert_eq!(s.proxy.as_deref(), Some("http://proxy:3128"));
        assert_eq!(s.work_dir, "/data");
    }

    #[test]
    fn values_pass_through_untrimmed() {
        let resolved = with_creds(&[
            (vars::PROXY, " http://proxy:3128 "),
            (vars::VERBOSITY, "2 "),
        ]);
        let s = server(&resolved);
        assert_eq!(s.proxy.as_deref(), Some(" http://proxy:3128 "));
        assert_eq!(s.verbosity.as_deref(), Some("2 "));
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn whitespace_port_is_chosen_and_rejected() {
        let resolved = with_creds(&[(vars::HTTP_PORT, " "), (vars::LEGACY_HTTP_PORT, "7000")]);
        assert_eq!(server(&resolved).http_port, DEFAULT_HTTP_PORT);
        assert_eq!(
            resolved.warnings,
            vec![ConfigWarning::InvalidPort {
                var: vars::HTTP_PORT,
                value: " ".to_string(),
            }]
        );
    }

    #[test]
    fn debug_redacts_api_hash() {
        let resolved = with_creds(&[]);
        let debug = format!("{:?}", resolved.settings);
        assert!(!debug.contains("deadbeef"), "debug output leaked secret: {debug}");
        assert!(debug.contains("12345"));
    }
}
