use serde::Deserialize;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::ConfigError;

const MB: u64 = 1024 * 1024;
const CONFIG_PATH_VAR: &str = "HTTP_TTL_CACHE_CONFIG";

/// Immutable cache settings shared by every request an engine serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfiguration {
    pub memory_capacity: u64,
    pub disk_capacity: u64,
    pub time_to_live: Duration,
    pub acceptable_response_range: RangeInclusive<u16>,
    /// Subdirectory of the storage root used for on-disk responses.
    pub cache_directory: Option<String>,
}

impl CacheConfiguration {
    pub fn new(
        memory_capacity: u64,
        disk_capacity: u64,
        time_to_live: Duration,
        acceptable_response_range: RangeInclusive<u16>,
        cache_directory: Option<String>,
    ) -> Result<Self, ConfigError> {
        if acceptable_response_range.is_empty() {
            return Err(ConfigError::EmptyResponseRange {
                min: *acceptable_response_range.start(),
                max: *acceptable_response_range.end(),
            });
        }
        Ok(Self {
            memory_capacity,
            disk_capacity,
            time_to_live,
            acceptable_response_range,
            cache_directory,
        })
    }

    /// 50 MB memory, 200 MB disk, one hour TTL.
    pub fn standard() -> Self {
        Self {
            memory_capacity: 50 * MB,
            disk_capacity: 200 * MB,
            time_to_live: Duration::from_secs(60 * 60),
            acceptable_response_range: 200..=299,
            cache_directory: None,
        }
    }

    /// 100 MB memory, 500 MB disk, two hour TTL.
    pub fn aggressive() -> Self {
        Self {
            memory_capacity: 100 * MB,
            disk_capacity: 500 * MB,
            time_to_live: Duration::from_secs(2 * 60 * 60),
            acceptable_response_range: 200..=299,
            cache_directory: None,
        }
    }

    pub fn with_time_to_live(mut self, time_to_live: Duration) -> Self {
        self.time_to_live = time_to_live;
        self
    }

    pub fn with_capacities(mut self, memory_capacity: u64, disk_capacity: u64) -> Self {
        self.memory_capacity = memory_capacity;
        self.disk_capacity = disk_capacity;
        self
    }

    pub fn with_cache_directory(mut self, cache_directory: impl Into<String>) -> Self {
        self.cache_directory = Some(cache_directory.into());
        self
    }

    pub fn with_acceptable_response_range(
        self,
        acceptable_response_range: RangeInclusive<u16>,
    ) -> Result<Self, ConfigError> {
        Self::new(
            self.memory_capacity,
            self.disk_capacity,
            self.time_to_live,
            acceptable_response_range,
            self.cache_directory,
        )
    }

    pub fn accepts(&self, status_code: u16) -> bool {
        self.acceptable_response_range.contains(&status_code)
    }
}

impl Default for CacheConfiguration {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    #[default]
    Default,
    Aggressive,
}

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Default, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub preset: Preset,
    pub memory_capacity: Option<u64>,
    pub disk_capacity: Option<u64>,
    pub time_to_live_secs: Option<u64>,
    pub acceptable_status_min: Option<u16>,
    pub acceptable_status_max: Option<u16>,
    pub cache_directory: Option<String>,
    /// Base directory for the disk tier and the TTL ledger file.
    pub root_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Loads from the file named by `HTTP_TTL_CACHE_CONFIG`, falling back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(config_path) = std::env::var(CONFIG_PATH_VAR) {
            return Self::from_file(config_path);
        }

        Ok(Self::default())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        debug!("Loading configuration from {:?}", path.as_ref());
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

impl CacheSettings {
    pub fn to_configuration(&self) -> Result<CacheConfiguration, ConfigError> {
        let base = match self.preset {
            Preset::Default => CacheConfiguration::standard(),
            Preset::Aggressive => CacheConfiguration::aggressive(),
        };

        let min = self
            .acceptable_status_min
            .unwrap_or(*base.acceptable_response_range.start());
        let max = self
            .acceptable_status_max
            .unwrap_or(*base.acceptable_response_range.end());

        CacheConfiguration::new(
            self.memory_capacity.unwrap_or(base.memory_capacity),
            self.disk_capacity.unwrap_or(base.disk_capacity),
            self.time_to_live_secs
                .map(Duration::from_secs)
                .unwrap_or(base.time_to_live),
            min..=max,
            self.cache_directory.clone().or(base.cache_directory),
        )
    }

    /// Configured root, or the platform cache directory for this application.
    pub fn storage_root(&self) -> Result<PathBuf, ConfigError> {
        if let Some(root) = &self.root_path {
            return Ok(root.clone());
        }
        let dirs = directories::ProjectDirs::from("", "", "http_ttl_cache")
            .ok_or(ConfigError::NoHomeDirectory)?;
        Ok(dirs.cache_dir().to_path_buf())
    }
}
