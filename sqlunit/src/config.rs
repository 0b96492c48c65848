use crate::error::Error;
use serde::Deserialize;
use std::time::Duration;

/// Environment variable holding the base connection string.
pub const DSN_ENV: &str = "SQL_DSN";
/// Environment variable holding the connection timeout, in seconds.
pub const TIMEOUT_ENV: &str = "SQL_TIMEOUT";
/// Connection timeout used when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Connection settings shared by every unit applied through one [Executor](crate::Executor).
///
/// `dsn` is either a `postgresql://` URI or a keyword string (`host=... user=...`). Its
/// database component is replaced per unit, so it may name any database the user can reach.
#[derive(Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dsn: String,
    /// How long to wait for a connection, in seconds. Zero means wait indefinitely.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Config {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout = timeout_secs;
        self
    }

    /// Build a config from `SQL_DSN` and `SQL_TIMEOUT`.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup. Missing variables fall back to
    /// an empty DSN and a timeout of [DEFAULT_TIMEOUT_SECS].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let dsn = lookup(DSN_ENV).unwrap_or_default();
        let timeout = match lookup(TIMEOUT_ENV) {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                Error::Configuration(format!(
                    "{} must be a non-negative number of seconds, got '{}': {}",
                    TIMEOUT_ENV, raw, e
                ))
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self { dsn, timeout })
    }

    /// The configured connect timeout, or `None` when waiting is unbounded.
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }
}

// The DSN usually carries a password.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("dsn", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}
