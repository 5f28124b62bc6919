//! Configuration for marginalia

use crate::extract::HighlightRule;
use crate::matcher::MatchConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-corpus data directory
pub const DATA_DIR: &str = ".marginalia";

/// Configuration for a tracked corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Extension of tracked documents, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Glob patterns, relative to the corpus root, of documents to skip
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// User highlight rules, applied after the built-in one
    #[serde(default)]
    pub rules: Vec<HighlightRule>,

    /// Matching tolerances
    #[serde(default)]
    pub matching: MatchConfig,

    /// Index lifecycle
    #[serde(default)]
    pub index: IndexConfig,

    /// Delay before drifted positions are written back
    #[serde(default = "default_drift_correction_delay_ms")]
    pub drift_correction_delay_ms: u64,

    /// Number of documents kept in the content cache
    #[serde(default = "default_content_cache_capacity")]
    pub content_cache_capacity: usize,
}

/// Kind of machine the tracker runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Desktop,
    /// Resource-constrained; indexing starts later
    Constrained,
}

/// Index configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Age after which the index is rebuilt before use
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,

    #[serde(default = "default_constrained_startup_delay_ms")]
    pub constrained_startup_delay_ms: u64,

    #[serde(default)]
    pub device: Device,
}

fn default_extension() -> String {
    "md".to_string()
}

fn default_ignore_patterns() -> Vec<String> {
    vec![
        format!("{}/**", DATA_DIR),
        ".git/**".to_string(),
        "node_modules/**".to_string(),
    ]
}

fn default_drift_correction_delay_ms() -> u64 {
    100
}

fn default_content_cache_capacity() -> usize {
    512
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_startup_delay_ms() -> u64 {
    2000
}

fn default_constrained_startup_delay_ms() -> u64 {
    5000
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            startup_delay_ms: default_startup_delay_ms(),
            constrained_startup_delay_ms: default_constrained_startup_delay_ms(),
            device: Device::default(),
        }
    }
}

impl IndexConfig {
    /// Delay before the first full build, by device
    pub fn startup_delay(&self) -> Duration {
        match self.device {
            Device::Desktop => Duration::from_millis(self.startup_delay_ms),
            Device::Constrained => Duration::from_millis(self.constrained_startup_delay_ms),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extension: default_extension(),
            ignore_patterns: default_ignore_patterns(),
            rules: Vec::new(),
            matching: MatchConfig::default(),
            index: IndexConfig::default(),
            drift_correction_delay_ms: default_drift_correction_delay_ms(),
            content_cache_capacity: default_content_cache_capacity(),
        }
    }
}

impl Config {
    /// Path of the config file under `root`
    pub fn path(root: &Path) -> PathBuf {
        root.join(DATA_DIR).join("config.toml")
    }

    /// Load configuration from the corpus or return defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = Self::path(root);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration under `root`
    pub fn save(&self, root: &Path) -> Result<()> {
        let data_dir = root.join(DATA_DIR);
        std::fs::create_dir_all(&data_dir)?;

        let config_path = Self::path(root);
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    pub fn drift_correction_delay(&self) -> Duration {
        Duration::from_millis(self.drift_correction_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.extension, "md");
        assert_eq!(config.matching.text_position_tolerance, 500);
        assert_eq!(config.matching.fuzzy_position_tolerance, 50);
        assert_eq!(config.index.ttl(), Duration::from_secs(3600));
        assert_eq!(config.drift_correction_delay(), Duration::from_millis(100));
        assert!(config
            .ignore_patterns
            .contains(&".marginalia/**".to_string()));
    }

    #[test]
    fn test_startup_delay_by_device() {
        let mut index = IndexConfig::default();
        assert_eq!(index.startup_delay(), Duration::from_millis(2000));
        index.device = Device::Constrained;
        assert_eq!(index.startup_delay(), Duration::from_millis(5000));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            extension = "txt"

            [matching]
            bucket_size = 20

            [[rules]]
            name = "bold"
            pattern = "\\*\\*(.+?)\\*\\*"
            color = "yellow"
            "#,
        )
        .unwrap();

        assert_eq!(config.extension, "txt");
        assert_eq!(config.matching.bucket_size, 20);
        assert_eq!(config.matching.text_position_tolerance, 500);
        assert!(config.rules[0].enabled);
        assert_eq!(config.index.device, Device::Desktop);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.index.device = Device::Constrained;
        config.save(dir.path()).unwrap();

        let loaded = Config::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }
}
