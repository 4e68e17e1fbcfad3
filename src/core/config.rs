//! Configuration management for bucketry.
//!
//! Configuration is read from YAML, validated once, and then turned into
//! the runtime pieces the rest of the crate consumes: a [`Calendar`], the
//! list of valid granularities, and buffer tuning.

use crate::bucket::{AddressingMode, Calendar, Granularity, GranularitySpec, DEFAULT_SEPARATOR};
use crate::buffer::BufferConfig;
use crate::core::{BucketryError, Result};
use chrono::Weekday;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Complete configuration for bucketry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Zone and week conventions
    pub time: TimeConfig,
    /// Granularity strings such as `1h` or `1mo`
    pub granularities: Vec<String>,
    /// Key addressing
    pub storage: StorageConfig,
    /// Write buffer tuning
    pub buffer: BufferConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Time configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// IANA zone name, or a name from `zone_aliases`
    pub timezone: String,
    /// Alternate zone database consulted before the IANA one
    pub zone_aliases: HashMap<String, String>,
    /// First day of the week for week buckets
    pub week_start: Weekday,
}

/// Storage addressing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Namespace prefix applied to every key
    pub prefix: Option<String>,
    /// Separator for joined keys
    pub separator: String,
    /// How the backend addresses bucketed rows
    pub addressing: AddressingMode,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            time: TimeConfig::default(),
            granularities: ["1m", "1h", "1d", "1w", "1mo", "1q", "1y"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            storage: StorageConfig::default(),
            buffer: BufferConfig::default(),
            logging: LoggingConfig::default(),
            debug: false,
        }
    }
}

impl Default for TimeConfig {
    fn default() -> Self {
        TimeConfig {
            timezone: "UTC".to_string(),
            zone_aliases: HashMap::new(),
            week_start: Weekday::Mon,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            prefix: None,
            separator: DEFAULT_SEPARATOR.to_string(),
            addressing: AddressingMode::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.granularities().is_empty() {
            return Err(BucketryError::config(format!(
                "no valid granularities in {:?}",
                self.granularities
            )));
        }

        if self.storage.separator.is_empty() {
            return Err(BucketryError::config("storage.separator must not be empty"));
        }

        if self.buffer.enabled && self.buffer.size == 0 {
            return Err(BucketryError::config("buffer.size must be greater than 0"));
        }

        Ok(())
    }

    /// Resolve the configured zone through the alias table, then the IANA
    /// database. Unknown names fall back to UTC.
    pub fn timezone(&self) -> Tz {
        let name = self
            .time
            .zone_aliases
            .get(&self.time.timezone)
            .unwrap_or(&self.time.timezone);

        match name.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                tracing::warn!(timezone = %name, "Unknown timezone, falling back to UTC");
                Tz::UTC
            },
        }
    }

    /// Calendar built from the time configuration
    pub fn calendar(&self) -> Calendar {
        Calendar::new(self.timezone(), self.time.week_start)
    }

    /// Valid configured granularities in declaration order, without
    /// duplicates. Invalid strings are dropped with a warning.
    pub fn granularities(&self) -> Vec<Granularity> {
        let mut valid = Vec::with_capacity(self.granularities.len());
        for raw in &self.granularities {
            let spec = GranularitySpec::parse(raw);
            match spec.granularity() {
                Some(granularity) if !valid.contains(&granularity) => valid.push(granularity),
                Some(_) => {},
                None => tracing::warn!(granularity = %spec.as_str(), "Ignoring invalid granularity"),
            }
        }
        valid
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| BucketryError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Load configuration from a YAML file
    pub async fn from_file(self, path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            BucketryError::config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        self.from_yaml(&content)
    }

    /// Set timezone name
    pub fn timezone(mut self, name: &str) -> Self {
        self.config.time.timezone = name.to_string();
        self
    }

    /// Add an alternate zone name
    pub fn zone_alias(mut self, alias: &str, target: &str) -> Self {
        self.config
            .time
            .zone_aliases
            .insert(alias.to_string(), target.to_string());
        self
    }

    /// Set first day of week
    pub fn week_start(mut self, day: Weekday) -> Self {
        self.config.time.week_start = day;
        self
    }

    /// Replace the granularity list
    pub fn granularities<I, S>(mut self, specs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.granularities = specs.into_iter().map(Into::into).collect();
        self
    }

    /// Set key prefix
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.config.storage.prefix = Some(prefix.to_string());
        self
    }

    /// Set key separator
    pub fn separator(mut self, separator: &str) -> Self {
        self.config.storage.separator = separator.to_string();
        self
    }

    /// Set addressing mode
    pub fn addressing(mut self, mode: AddressingMode) -> Self {
        self.config.storage.addressing = mode;
        self
    }

    /// Replace buffer tuning
    pub fn buffer(mut self, buffer: BufferConfig) -> Self {
        self.config.buffer = buffer;
        self
    }

    /// Set buffer size threshold
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer.size = size;
        self
    }

    /// Set buffer flush interval
    pub fn buffer_duration(mut self, duration: Duration) -> Self {
        self.config.buffer.duration = duration;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
