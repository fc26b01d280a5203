//! Daemon configuration
//!
//! Built-in defaults, optionally overridden by a JSON file, then by command
//! line flags.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::{NameRule, RetentionPolicy, MAX_NAME_LENGTH};

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Address the datagram server binds
    pub listen_addr: SocketAddr,
    /// Directory scanned for new files
    pub image_dir: PathBuf,
    /// Only names ending with this suffix are cached
    pub accepted_suffix: String,
    /// Longest accepted name in bytes
    pub max_name_length: usize,
    /// Age up to which a file is advertised as latest
    pub max_file_age_secs: u64,
    /// Extra time a file stays downloadable after it stops being advertised
    pub grace_period_secs: u64,
    /// Time between directory scans
    pub scan_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 42002)),
            image_dir: PathBuf::from("."),
            accepted_suffix: ".jpg".to_string(),
            max_name_length: MAX_NAME_LENGTH,
            max_file_age_secs: 600,
            grace_period_secs: 60,
            scan_interval_secs: 59,
        }
    }
}

impl Config {
    /// Default config file location, e.g. `~/.config/imgcache/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("imgcache").join("config.json"))
    }

    /// Load configuration from `path`, or from the default location if it
    /// exists, falling back to built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Reject settings the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_secs == 0 {
            bail!("scanIntervalSecs must be greater than zero");
        }
        if self.accepted_suffix.is_empty() {
            bail!("acceptedSuffix must not be empty");
        }
        if self.max_name_length == 0 || self.max_name_length > MAX_NAME_LENGTH {
            bail!(
                "maxNameLength must be between 1 and {}, got {}",
                MAX_NAME_LENGTH,
                self.max_name_length
            );
        }
        Ok(())
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::new(
            Duration::from_secs(self.max_file_age_secs),
            Duration::from_secs(self.grace_period_secs),
        )
    }

    pub fn name_rule(&self) -> NameRule {
        NameRule::new(self.accepted_suffix.clone(), self.max_name_length)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}
