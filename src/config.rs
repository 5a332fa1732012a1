//! Service configuration.
//!
//! Loaded from an optional YAML file named by `ENDPOINT_HUB_CONFIG`, then
//! overridden field by field from the environment:
//!
//! - `PORT` - HTTP port (default: 8080)
//! - `ENDPOINT_HUB_DB` - SQLite catalog path (default: `data/endpoints.db`)
//! - `ENDPOINT_HUB_MANIFESTS` - manifest directories, `PATH`-style list
//! - `ENDPOINT_HUB_RELOAD_INTERVAL_SECS` - scheduled reload interval, 0 disables
//! - `ENDPOINT_HUB_TIER_POLICY` - `preserve` (default) or `reset`
//! - `ENDPOINT_HUB_SUBSCRIBER_BUFFER` - per-subscriber channel capacity
//! - `ENDPOINT_HUB_PING_INTERVAL_SECS` - liveness ping interval, 0 disables

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{ReconcilePolicy, TierSyncPolicy};
use crate::notify::RateLimits;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {var}: '{value}'")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct HubConfig {
    pub port: u16,
    pub database_path: PathBuf,
    pub manifest_dirs: Vec<PathBuf>,
    /// Seconds between scheduled reloads; 0 disables the scheduler.
    pub reload_interval_secs: u64,
    pub tier_policy: TierSyncPolicy,
    pub subscriber_buffer: usize,
    /// Seconds between liveness pings; 0 disables them.
    pub ping_interval_secs: u64,
    /// Finished cycles kept for the status endpoint.
    pub status_history: usize,
    pub rate_limits: RateLimits,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_path: PathBuf::from("data/endpoints.db"),
            manifest_dirs: vec![PathBuf::from("manifests")],
            reload_interval_secs: 300,
            tier_policy: TierSyncPolicy::Preserve,
            subscriber_buffer: 64,
            ping_interval_secs: 25,
            status_history: 20,
            rate_limits: RateLimits::default(),
        }
    }
}

impl HubConfig {
    /// Parse a YAML document. Missing fields take their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// File named by `ENDPOINT_HUB_CONFIG` (if any), then env overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base = match std::env::var_os("ENDPOINT_HUB_CONFIG") {
            Some(path) => Self::from_yaml_file(Path::new(&path))?,
            None => Self::default(),
        };
        base.with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = parse_var(&lookup, "PORT")? {
            self.port = port;
        }
        if let Some(path) = lookup("ENDPOINT_HUB_DB") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(dirs) = lookup("ENDPOINT_HUB_MANIFESTS") {
            self.manifest_dirs = std::env::split_paths(&dirs)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        if let Some(secs) = parse_var(&lookup, "ENDPOINT_HUB_RELOAD_INTERVAL_SECS")? {
            self.reload_interval_secs = secs;
        }
        if let Some(policy) = parse_var(&lookup, "ENDPOINT_HUB_TIER_POLICY")? {
            self.tier_policy = policy;
        }
        if let Some(buffer) = parse_var(&lookup, "ENDPOINT_HUB_SUBSCRIBER_BUFFER")? {
            self.subscriber_buffer = buffer;
        }
        if let Some(secs) = parse_var(&lookup, "ENDPOINT_HUB_PING_INTERVAL_SECS")? {
            self.ping_interval_secs = secs;
        }
        Ok(self)
    }

    pub fn reconcile_policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            tier_sync: self.tier_policy,
        }
    }

    pub fn reload_interval(&self) -> Option<Duration> {
        (self.reload_interval_secs > 0).then(|| Duration::from_secs(self.reload_interval_secs))
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_yaml_with_defaults() {
        let config = HubConfig::from_yaml(
            r#"
port: 9000
manifest_dirs: [a, b]
tier_policy: reset
rate_limits:
  free: 10
"#,
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.manifest_dirs, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(config.tier_policy, TierSyncPolicy::Reset);
        assert_eq!(config.rate_limits.free, Some(10));
        assert_eq!(config.rate_limits.vip, Some(300));
        assert_eq!(config.subscriber_buffer, 64);
    }

    #[test]
    fn test_env_overrides() {
        let config = HubConfig::default()
            .with_overrides(lookup(&[
                ("PORT", "3001"),
                ("ENDPOINT_HUB_DB", "/tmp/x.db"),
                ("ENDPOINT_HUB_RELOAD_INTERVAL_SECS", "0"),
                ("ENDPOINT_HUB_TIER_POLICY", "reset"),
            ]))
            .unwrap();

        assert_eq!(config.port, 3001);
        assert_eq!(config.database_path, PathBuf::from("/tmp/x.db"));
        assert!(config.reload_interval().is_none());
        assert_eq!(config.reconcile_policy().tier_sync, TierSyncPolicy::Reset);
        assert_eq!(config.ping_interval(), Some(Duration::from_secs(25)));
    }

    #[test]
    fn test_invalid_env_value() {
        let err = HubConfig::default()
            .with_overrides(lookup(&[("ENDPOINT_HUB_SUBSCRIBER_BUFFER", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: "ENDPOINT_HUB_SUBSCRIBER_BUFFER", .. }));
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = HubConfig::from_yaml_file(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
