//! Configuration schema for Plinth
//!
//! Configuration is stored at `~/.config/plinth/config.toml`, optionally
//! overridden per project by a `plinth.toml` found in the working directory
//! or one of its parents.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Base environment
    pub base: BaseConfig,

    /// Dependency installer
    pub install: InstallConfig,

    /// Package builder
    pub build: BuildConfig,

    /// Source tree handling
    pub source: SourceConfig,

    /// Layer cache settings
    pub cache: CacheConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Append run events to the journal
    pub journal: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            journal: true,
        }
    }
}

/// Base environment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseConfig {
    /// Image reference identifying the base
    pub image: String,

    /// Local directory whose contents seed the base layer
    pub rootfs: Option<PathBuf>,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            image: "python:3.12-slim".to_string(),
            rootfs: None,
        }
    }
}

/// Dependency installer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Command template; `{root}` and `{manifest}` are substituted
    pub command: Vec<String>,

    /// Time limit in seconds (0 = none)
    pub timeout_secs: u64,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            command: [
                "python3",
                "-m",
                "pip",
                "install",
                "--no-cache-dir",
                "--prefix",
                "{root}/usr/local",
                "-r",
                "{manifest}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            timeout_secs: 1800,
        }
    }
}

impl InstallConfig {
    pub fn timeout(&self) -> Option<Duration> {
        secs(self.timeout_secs)
    }
}

/// Package builder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Command template; `{root}` and `{workdir}` are substituted
    pub command: Vec<String>,

    /// Time limit in seconds (0 = none)
    pub timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: [
                "python3",
                "-m",
                "pip",
                "install",
                "--no-cache-dir",
                "--no-deps",
                "--prefix",
                "{root}/usr/local",
                "{root}/{workdir}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            timeout_secs: 1800,
        }
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Option<Duration> {
        secs(self.timeout_secs)
    }
}

/// Source tree settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Directory inside the environment the source is copied to
    pub workdir: String,

    /// File or directory names never copied
    pub ignore: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            workdir: "app".to_string(),
            ignore: [".git", "__pycache__", ".venv", "target"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Layer cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable persistent layer caching (default: true)
    pub enabled: bool,

    /// Cache directory (default: platform cache dir)
    pub dir: Option<PathBuf>,

    /// `cache gc` removes entries older than N days
    pub gc_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            gc_days: 30,
        }
    }
}

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[install]"));
        assert!(toml.contains("[cache]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.base.image, "python:3.12-slim");
        assert_eq!(config.source.workdir, "app");
        assert!(config.cache.enabled);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [install]
            command = ["sh", "-c", "touch {root}/installed"]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.install.command[0], "sh");
        assert_eq!(config.install.timeout_secs, 1800); // default preserved
        assert_eq!(config.build.command[0], "python3");
    }

    #[test]
    fn zero_timeout_disables_limit() {
        let mut config = Config::default();
        assert_eq!(config.install.timeout(), Some(Duration::from_secs(1800)));
        config.build.timeout_secs = 0;
        assert_eq!(config.build.timeout(), None);
    }
}
