//! Registry and watcher configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum directory depth walked below a root.
pub const DEFAULT_MAX_DEPTH: usize = 10;

const DEFAULT_ROOTS: [&str; 2] = ["/run/log/journal", "/var/log/journal"];

/// Journal directories to watch when none are configured.
///
/// When `NETDATA_HOST_PREFIX` is set (running inside a container with the host
/// filesystem mounted), the prefixed variants are added as well.
pub fn default_roots() -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = DEFAULT_ROOTS.iter().map(PathBuf::from).collect();

    if let Ok(prefix) = std::env::var("NETDATA_HOST_PREFIX") {
        if !prefix.is_empty() {
            for root in DEFAULT_ROOTS {
                let relative = root.trim_start_matches('/');
                roots.push(Path::new(&prefix).join(relative));
            }
        }
    }

    roots
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RegistryConfig {
    /// Root directories scanned and watched for journal files
    pub roots: Vec<PathBuf>,

    /// How deep to descend below each root
    pub max_depth: usize,

    /// How long the watcher blocks waiting for notifications
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,

    /// How often pending file changes are applied to the registry
    #[serde(with = "humantime_serde")]
    pub pending_flush_interval: Duration,

    /// Pause between two watcher sessions
    #[serde(with = "humantime_serde")]
    pub restart_delay: Duration,

    /// Period of the full reconciliation scan
    #[serde(with = "humantime_serde")]
    pub rescan_interval: Duration,

    /// Failed watch additions tolerated before the session restarts
    pub max_watch_errors: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            max_depth: DEFAULT_MAX_DEPTH,
            poll_timeout: Duration::from_millis(500),
            pending_flush_interval: Duration::from_secs(1),
            restart_delay: Duration::from_secs(5),
            rescan_interval: Duration::from_secs(60),
            max_watch_errors: 10,
        }
    }
}

impl RegistryConfig {
    pub fn with_roots<I, P>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.roots = roots.into_iter().map(Into::into).collect();
        self
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: RegistryConfig =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid(String::from(
                "max_depth must be greater than 0",
            )));
        }

        let intervals = [
            ("poll_timeout", self.poll_timeout),
            ("pending_flush_interval", self.pending_flush_interval),
            ("rescan_interval", self.rescan_interval),
        ];

        for (name, value) in intervals {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        for root in &self.roots {
            if !root.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "root {} is not an absolute path",
                    root.display()
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let config = RegistryConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.roots.contains(&PathBuf::from("/var/log/journal")));
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn loads_yaml_with_humantime_durations() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.yml");
        fs::write(
            &path,
            "roots: [/srv/journal]\npoll_timeout: 250ms\npending_flush_interval: 2s\n",
        )
        .unwrap();

        let config = RegistryConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.roots, vec![PathBuf::from("/srv/journal")]);
        assert_eq!(config.poll_timeout, Duration::from_millis(250));
        assert_eq!(config.pending_flush_interval, Duration::from_secs(2));
        assert_eq!(config.restart_delay, Duration::from_secs(5));
    }

    #[test]
    fn rejects_unknown_fields_and_bad_values() {
        let dir = TempDir::new().unwrap();

        let unknown = dir.path().join("unknown.yml");
        fs::write(&unknown, "bogus: 1\n").unwrap();
        assert!(matches!(
            RegistryConfig::from_yaml_file(&unknown),
            Err(ConfigError::Parse { .. })
        ));

        let zero_depth = dir.path().join("zero.yml");
        fs::write(&zero_depth, "max_depth: 0\n").unwrap();
        assert!(matches!(
            RegistryConfig::from_yaml_file(&zero_depth),
            Err(ConfigError::Invalid(_))
        ));

        let relative = RegistryConfig::default().with_roots(["relative/dir"]);
        assert!(relative.validate().is_err());
    }
}
