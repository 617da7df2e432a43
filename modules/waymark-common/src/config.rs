use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::ConfigError;

/// Pipeline configuration loaded from environment variables.
///
/// Every setting has a default, so an empty environment is valid.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    // Durable buffer
    pub buffer_path: PathBuf,

    // Flush scheduling
    pub flush_interval: Duration,
    pub flush_count_limit: Option<usize>,
    pub poll_tick: Duration,
    pub flush_batch_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_path: PathBuf::from("waymark-buffer.sqlite"),
            flush_interval: Duration::from_secs(60),
            flush_count_limit: None,
            poll_tick: Duration::from_secs(1),
            flush_batch_size: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let buffer_path = lookup("WAYMARK_BUFFER_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.buffer_path);

        let flush_interval = parse::<u64>(&lookup, "WAYMARK_FLUSH_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.flush_interval);

        let poll_tick = match parse::<u64>(&lookup, "WAYMARK_POLL_TICK_MS")? {
            Some(0) => {
                return Err(ConfigError::Zero {
                    key: "WAYMARK_POLL_TICK_MS".to_string(),
                })
            }
            Some(ms) => Duration::from_millis(ms),
            None => defaults.poll_tick,
        };

        let flush_count_limit = parse::<usize>(&lookup, "WAYMARK_FLUSH_COUNT_LIMIT")?;

        let flush_batch_size = match parse::<usize>(&lookup, "WAYMARK_FLUSH_BATCH_SIZE")? {
            Some(0) => {
                return Err(ConfigError::Zero {
                    key: "WAYMARK_FLUSH_BATCH_SIZE".to_string(),
                })
            }
            other => other,
        };

        Ok(Self {
            buffer_path,
            flush_interval,
            flush_count_limit,
            poll_tick,
            flush_batch_size,
        })
    }

    /// Log the effective configuration.
    pub fn log_summary(&self) {
        info!(
            buffer_path = %self.buffer_path.display(),
            flush_interval_secs = self.flush_interval.as_secs(),
            flush_count_limit = ?self.flush_count_limit,
            poll_tick_ms = self.poll_tick.as_millis() as u64,
            flush_batch_size = ?self.flush_batch_size,
            "Loaded config"
        );
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        assert_eq!(load(&[]).unwrap(), Config::default());
    }

    #[test]
    fn reads_every_setting() {
        let config = load(&[
            ("WAYMARK_BUFFER_PATH", "/var/lib/app/buffer.db"),
            ("WAYMARK_FLUSH_INTERVAL_SECS", "5"),
            ("WAYMARK_FLUSH_COUNT_LIMIT", "100"),
            ("WAYMARK_POLL_TICK_MS", "250"),
            ("WAYMARK_FLUSH_BATCH_SIZE", "50"),
        ])
        .unwrap();

        assert_eq!(config.buffer_path, PathBuf::from("/var/lib/app/buffer.db"));
        assert_eq!(config.flush_interval, Duration::from_secs(5));
        assert_eq!(config.flush_count_limit, Some(100));
        assert_eq!(config.poll_tick, Duration::from_millis(250));
        assert_eq!(config.flush_batch_size, Some(50));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = load(&[("WAYMARK_FLUSH_COUNT_LIMIT", "  "), ("WAYMARK_BUFFER_PATH", "")]).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn rejects_unparseable_numbers() {
        let err = load(&[("WAYMARK_FLUSH_INTERVAL_SECS", "soon")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "WAYMARK_FLUSH_INTERVAL_SECS".to_string(),
                value: "soon".to_string(),
            }
        );
    }

    #[test]
    fn rejects_zero_tick() {
        let err = load(&[("WAYMARK_POLL_TICK_MS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Zero { .. }));
    }
}
