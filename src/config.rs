//! Worker configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! YAML file, environment variables (a `.env` file is loaded first), and
//! finally command-line flags applied by the binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::broker::NatsConfig;
use crate::service::AckMode;

/// Errors loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Broker address the service loop connects to.
    pub broker_url: String,
    /// Root directory for derived image artifacts.
    pub processed_dir: PathBuf,
    pub ack_mode: AckMode,
    /// Retention of the JetStream streams backing exchanges.
    pub stream_max_age_secs: u64,
    /// Write logs to a per-run file in this directory instead of stderr.
    pub log_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            broker_url: "nats://localhost:4222".to_string(),
            processed_dir: PathBuf::from("files/processed"),
            ack_mode: AckMode::BeforeDispatch,
            stream_max_age_secs: 24 * 60 * 60,
            log_dir: None,
        }
    }
}

impl ServiceConfig {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())
    }

    /// Load from a YAML file; missing keys keep their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Override fields from environment-style variables.
    ///
    /// `lookup` returns the value of a variable, if set.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("NATS_URL") {
            self.broker_url = url;
        }
        if let Some(dir) = lookup("PROCESSED_DIR") {
            self.processed_dir = PathBuf::from(dir);
        }
        if let Some(mode) = lookup("ACK_MODE") {
            self.ack_mode = mode.parse().map_err(|reason| ConfigError::InvalidValue {
                var: "ACK_MODE".to_string(),
                reason,
            })?;
        }
        if let Some(secs) = lookup("STREAM_MAX_AGE_SECS") {
            self.stream_max_age_secs =
                secs.parse().map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                    var: "STREAM_MAX_AGE_SECS".to_string(),
                    reason: e.to_string(),
                })?;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(dir));
        }
        Ok(self)
    }

    pub fn nats_config(&self) -> NatsConfig {
        NatsConfig {
            max_age: Duration::from_secs(self.stream_max_age_secs),
            ..NatsConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();

        assert_eq!(config.broker_url, "nats://localhost:4222");
        assert_eq!(config.processed_dir, PathBuf::from("files/processed"));
        assert_eq!(config.ack_mode, AckMode::BeforeDispatch);
        assert_eq!(config.nats_config().max_age, Duration::from_secs(86_400));
    }

    #[test]
    fn test_yaml_file_keeps_missing_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "broker_url: nats://mq:4222").unwrap();
        writeln!(file, "ack_mode: after-publish").unwrap();

        let config = ServiceConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.broker_url, "nats://mq:4222");
        assert_eq!(config.ack_mode, AckMode::AfterPublish);
        assert_eq!(config.processed_dir, PathBuf::from("files/processed"));
    }

    #[test]
    fn test_yaml_file_rejects_unknown_keys() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "brokr_url: nats://mq:4222").unwrap();

        assert!(matches!(
            ServiceConfig::load_from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let config = ServiceConfig::default()
            .apply_env(vars(&[
                ("NATS_URL", "nats://other:4222"),
                ("PROCESSED_DIR", "/srv/processed"),
                ("STREAM_MAX_AGE_SECS", "60"),
                ("LOG_DIR", "/var/log/parsers"),
            ]))
            .unwrap();

        assert_eq!(config.broker_url, "nats://other:4222");
        assert_eq!(config.processed_dir, PathBuf::from("/srv/processed"));
        assert_eq!(config.stream_max_age_secs, 60);
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/parsers")));
    }

    #[test]
    fn test_invalid_env_values_are_reported() {
        assert!(matches!(
            ServiceConfig::default().apply_env(vars(&[("ACK_MODE", "never")])),
            Err(ConfigError::InvalidValue { var, .. }) if var == "ACK_MODE"
        ));
        assert!(matches!(
            ServiceConfig::default().apply_env(vars(&[("STREAM_MAX_AGE_SECS", "soon")])),
            Err(ConfigError::InvalidValue { var, .. }) if var == "STREAM_MAX_AGE_SECS"
        ));
    }
}
