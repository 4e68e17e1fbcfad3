//! Command-line interface for bucketry.
//!
//! The subcommands are thin wrappers over the library: they load the same
//! YAML configuration an embedding application would use and print results
//! as JSON.

use crate::bucket::{BucketKey, Granularity};
use crate::buffer::BufferRegistry;
use crate::codec::value_map;
use crate::core::{BucketryError, Config, ConfigBuilder, Result};
use crate::series::Timeseries;
use crate::storage::{InMemoryStorage, StorageBackend};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Calendar-aware time bucketing for counters and gauges
#[derive(Parser, Debug)]
#[command(name = "bucketry")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (default: ~/.config/bucketry/config.yaml)
    #[arg(short, long, env = "BUCKETRY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, env = "BUCKETRY_DEBUG", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the start of the bucket containing an instant
    Floor {
        /// RFC 3339 instant (default: now)
        #[arg(long)]
        at: Option<String>,
        /// Granularity such as 15m or 1mo
        #[arg(short, long)]
        granularity: String,
    },
    /// List bucket starts between two instants, both ends inclusive
    Timeline {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(short, long)]
        granularity: String,
    },
    /// Print the storage identifier of every configured granularity
    Keys {
        name: String,
        /// RFC 3339 instant (default: now)
        #[arg(long)]
        at: Option<String>,
    },
    /// Replay increments through a buffered in-memory series and print it
    Record {
        name: String,
        /// Number of increments
        #[arg(short = 'n', long, default_value_t = 10)]
        count: u32,
        /// Time between increments
        #[arg(long, default_value = "1m", value_parser = humantime::parse_duration)]
        every: Duration,
        /// RFC 3339 instant of the first increment (default: now)
        #[arg(long)]
        from: Option<String>,
        /// Attribute writes to this source
        #[arg(long)]
        tracking_key: Option<String>,
    },
    /// Validate configuration and exit
    CheckConfig,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Config file
    /// 3. Defaults (lowest priority)
    pub async fn load_config(&self) -> Result<Config> {
        let builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => path.clone(),
            None => match default_config_path() {
                Some(path) if path.exists() => path,
                _ => return builder.debug(self.debug).build(),
            },
        };

        match tokio::fs::read_to_string(&config_path).await {
            Ok(content) => builder.from_yaml(&content)?.debug(self.debug).build(),
            Err(e) if self.config.is_some() => Err(BucketryError::config(format!(
                "Failed to read config file {:?}: {}",
                config_path, e
            ))),
            // Default config file vanished, that's OK
            Err(_) => builder.debug(self.debug).build(),
        }
    }

    /// Initialize logging. `RUST_LOG` wins, then `BUCKETRY_LOG_LEVEL`,
    /// then `--debug`, then the configured level.
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let log_level = match std::env::var("BUCKETRY_LOG_LEVEL") {
            Ok(level) => level,
            Err(_) if self.debug => "debug".to_string(),
            Err(_) => config.logging.level.as_str().to_string(),
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(self.debug)
            .with_writer(std::io::stderr)
            .compact();

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| BucketryError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bucketry").join("config.yaml"))
}

/// Execute a bucketry command.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;
    cli.init_logging(&config)?;
    tracing::debug!(config = ?cli.config, "Configuration loaded");

    match &cli.command {
        Command::Floor { at, granularity } => {
            let granularity: Granularity = granularity.parse()?;
            let instant = config.calendar().localize(&parse_instant(at.as_deref())?);
            let start = config.calendar().floor(&instant, granularity);
            println!("{}", start.to_rfc3339());
        },
        Command::Timeline { from, to, granularity } => {
            let granularity: Granularity = granularity.parse()?;
            let calendar = config.calendar();
            let from = calendar.localize(&parse_instant(Some(from.as_str()))?);
            let to = calendar.localize(&parse_instant(Some(to.as_str()))?);
            for start in &calendar.timeline(&from, &to, granularity) {
                println!("{}", start.to_rfc3339());
            }
        },
        Command::Keys { name, at } => print_keys(&config, name, &parse_instant(at.as_deref())?)?,
        Command::Record {
            name,
            count,
            every,
            from,
            tracking_key,
        } => {
            let from = parse_instant(from.as_deref())?;
            record(&config, name, *count, *every, from, tracking_key.as_deref()).await?;
        },
        Command::CheckConfig => {
            config.validate()?;
            println!("Configuration is valid!");
            println!("  Timezone: {}", config.timezone());
            println!("  Week start: {}", config.time.week_start);
            let tags: Vec<String> = config.granularities().iter().map(Granularity::tag).collect();
            println!("  Granularities: {}", tags.join(", "));
            println!("  Addressing: {:?}", config.storage.addressing);
            if config.buffer.enabled {
                println!(
                    "  Buffer: size {}, every {}",
                    config.buffer.size,
                    humantime::format_duration(config.buffer.duration)
                );
            } else {
                println!("  Buffer: disabled");
            }
        },
    }

    Ok(())
}

fn parse_instant(raw: Option<&str>) -> Result<DateTime<Utc>> {
    match raw {
        None | Some("now") => Ok(Utc::now()),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|instant| instant.with_timezone(&Utc))
            .map_err(|e| BucketryError::parse(format!("invalid instant {raw:?}: {e}"))),
    }
}

fn print_keys(config: &Config, name: &str, at: &DateTime<Utc>) -> Result<()> {
    let calendar = config.calendar();
    let local = calendar.localize(at);
    let identifiers: Vec<_> = config
        .granularities()
        .into_iter()
        .map(|granularity| {
            let key = BucketKey::new(name, granularity, &local, &calendar);
            let key = match &config.storage.prefix {
                Some(prefix) => key.with_prefix(prefix.as_str()),
                None => key,
            };
            key.identifier(&config.storage.separator, config.storage.addressing)
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&identifiers)?);
    Ok(())
}

/// Run increments through a registered buffer, then flush every buffer
/// before reading back, also on Ctrl-C.
async fn record(
    config: &Config,
    name: &str,
    count: u32,
    every: Duration,
    from: DateTime<Utc>,
    tracking_key: Option<&str>,
) -> Result<()> {
    let registry = Arc::new(BufferRegistry::new());
    let storage = Arc::new(InMemoryStorage::from_config(config));
    let backend: Arc<dyn StorageBackend> = storage.clone();
    let series = Timeseries::from_config(config, backend, &registry);

    let step = chrono::Duration::from_std(every)
        .map_err(|e| BucketryError::parse(format!("invalid interval: {e}")))?;

    let to = last_instant(from, step, count)?;

    let writes = async {
        let mut at = from;
        for written in 0..count {
            series.increment(name, value_map([("count", 1)]), &at, tracking_key).await?;
            if written + 1 < count {
                at = at.checked_add_signed(step).ok_or_else(|| overflow(count, every))?;
            }
        }
        Ok::<_, BucketryError>(())
    };

    tokio::select! {
        result = writes => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, flushing buffers...");
        }
    }

    let flushed = registry.flush_all().await?;
    tracing::info!(operations = flushed, rows = storage.len(), "Recorded series");

    let mut output = Vec::new();
    for &granularity in series.granularities() {
        let points = series.series(name, granularity, &from, &to).await?;
        let points: Vec<_> = points
            .into_iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(start, values)| json!({ "start": start.to_rfc3339(), "values": values }))
            .collect();
        output.push(json!({ "granularity": granularity.tag(), "points": points }));
    }
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Instant of the last of `count` increments spaced `step` apart.
fn last_instant(from: DateTime<Utc>, step: chrono::Duration, count: u32) -> Result<DateTime<Utc>> {
    let steps = i32::try_from(count.saturating_sub(1))
        .map_err(|_| BucketryError::parse(format!("too many increments: {count}")))?;
    step.checked_mul(steps)
        .and_then(|span| from.checked_add_signed(span))
        .ok_or_else(|| BucketryError::parse(format!("{count} increments overflow the calendar")))
}

fn overflow(count: u32, every: Duration) -> BucketryError {
    BucketryError::parse(format!(
        "{count} increments every {} overflow the calendar",
        humantime::format_duration(every)
    ))
}
