// Configuration module for findstore
// Reads from environment variables with sensible defaults

use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// What happens to FileRecord rows once a newer row exists for the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
    /// Superseded rows and their findings stay in the store, masked.
    #[default]
    KeepAll,
    /// Superseded rows are deleted when a commit writes a newer row for the path.
    PruneSuperseded,
}

impl FromStr for Retention {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "keep-all" => Ok(Retention::KeepAll),
            "prune-superseded" => Ok(Retention::PruneSuperseded),
            other => Err(format!("unknown retention policy: {other}")),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Transaction attempts before giving up (FINDSTORE_MAX_ATTEMPTS)
    pub max_attempts: u32,

    /// Mean delay before the first retry, in milliseconds (FINDSTORE_BACKOFF_BASE_MS)
    pub backoff_base_ms: u64,

    /// SQLite busy handler timeout in milliseconds (FINDSTORE_BUSY_TIMEOUT_MS)
    pub busy_timeout_ms: u64,

    /// Superseded row handling (FINDSTORE_RETENTION)
    pub retention: Retention,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            backoff_base_ms: 100,
            busy_timeout_ms: 15_000,
            retention: Retention::KeepAll,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let mut config = Config::default();
        override_from_env("FINDSTORE_MAX_ATTEMPTS", &mut config.max_attempts);
        override_from_env("FINDSTORE_BACKOFF_BASE_MS", &mut config.backoff_base_ms);
        override_from_env("FINDSTORE_BUSY_TIMEOUT_MS", &mut config.busy_timeout_ms);
        override_from_env("FINDSTORE_RETENTION", &mut config.retention);
        if config.max_attempts == 0 {
            tracing::warn!("FINDSTORE_MAX_ATTEMPTS must be at least 1, using 1");
            config.max_attempts = 1;
        }
        config
    }

    /// Get the global configuration instance
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

fn override_from_env<T>(name: &str, slot: &mut T)
where
    T: FromStr + std::fmt::Debug,
{
    let Ok(val) = env::var(name) else {
        return;
    };
    match val.parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!(
            "Invalid {} value: {}, using default: {:?}",
            name,
            val,
            slot
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_attempts, 6);
        assert_eq!(config.backoff_base(), Duration::from_millis(100));
        assert_eq!(config.busy_timeout(), Duration::from_secs(15));
        assert_eq!(config.retention, Retention::KeepAll);
    }

    #[test]
    fn test_default_log_filter() {
        assert_eq!(default_log_filter(false), "info");
        assert_eq!(default_log_filter(true), "debug");
    }

    #[test]
    fn test_retention_parse() {
        assert_eq!("keep-all".parse(), Ok(Retention::KeepAll));
        assert_eq!(" prune-superseded".parse(), Ok(Retention::PruneSuperseded));
        assert!("sometimes".parse::<Retention>().is_err());
    }
}
