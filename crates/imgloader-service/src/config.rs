use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for imgloader.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "imgloader".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Settings for the generated default placeholder.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct PlaceholderConfig {
    pub width: u32,
    pub height: u32,
    /// Caption rendered in the middle of the placeholder.
    pub text: String,
    /// Fill color of the placeholder background.
    pub background: String,
    /// Color of the caption.
    pub foreground: String,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            width: 400,
            height: 300,
            text: "Image unavailable".into(),
            background: "#f0f0f0".into(),
            foreground: "#999999".into(),
        }
    }
}

/// Tuning of the image loader.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct LoaderConfig {
    /// Time budget of a single load attempt.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Number of attempts made for a key before falling back.
    pub retry_attempts: u32,

    /// Base delay between attempts. The n-th retry waits `n * retry_delay`.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Age after which a cached image is considered stale.
    #[serde(with = "humantime_serde")]
    pub cache_expiry: Duration,

    /// Interval of the janitor sweeping stale cache entries.
    #[serde(with = "humantime_serde")]
    pub janitor_interval: Duration,

    /// Maximum number of entries kept in the in-memory cache.
    pub in_memory_capacity: u64,

    /// Window size of batch loads.
    pub concurrency: usize,

    /// Quiet period of race protected slots before a load starts.
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,

    /// Image shown in place of keys that failed to load.
    ///
    /// When unset, a placeholder is generated from [`placeholder`](Self::placeholder).
    pub fallback_url: Option<String>,

    pub placeholder: PlaceholderConfig,

    /// Lifetime of a preload hint.
    #[serde(with = "humantime_serde")]
    pub preload_window: Duration,

    /// Number of low priority preload hints that may be outstanding at once.
    pub preload_low_priority_concurrency: usize,

    /// The timeout for establishing a connection to the image host.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Allows `file://` keys to be read from the local file system.
    pub allow_file_urls: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            retry_attempts: 2,
            retry_delay: Duration::from_secs(1),
            cache_expiry: Duration::from_secs(300),
            janitor_interval: Duration::from_secs(60),
            in_memory_capacity: 1024,
            concurrency: 3,
            debounce: Duration::from_millis(300),
            fallback_url: None,
            placeholder: PlaceholderConfig::default(),
            preload_window: Duration::from_secs(10),
            preload_low_priority_concurrency: 2,
            connect_timeout: Duration::from_secs(5),
            allow_file_urls: false,
        }
    }
}

/// The imgloader configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tuning of the image loader.
    pub loader: LoaderConfig,

    /// Logging configuration.
    pub logging: Logging,

    /// Metrics configuration.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_loader_config() {
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.loader.timeout, Duration::from_secs(15));
        assert_eq!(cfg.loader.retry_attempts, 2);
        assert_eq!(cfg.loader.retry_delay, Duration::from_secs(1));
        assert_eq!(cfg.loader.cache_expiry, Duration::from_secs(300));
        assert_eq!(cfg.loader.janitor_interval, Duration::from_secs(60));
        assert_eq!(cfg.loader.concurrency, 3);
        assert_eq!(cfg.loader.debounce, Duration::from_millis(300));
        assert_eq!(cfg.loader.fallback_url, None);
    }

    #[test]
    fn test_partial_loader_config() {
        // Setting individual values keeps the defaults of all others.
        let yaml = r#"
            loader:
              timeout: 2s
              retry_delay: 250ms
              fallback_url: https://cdn.example.com/fallback.png
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.loader.timeout, Duration::from_secs(2));
        assert_eq!(cfg.loader.retry_delay, Duration::from_millis(250));
        assert_eq!(
            cfg.loader.fallback_url.as_deref(),
            Some("https://cdn.example.com/fallback.png")
        );
        assert_eq!(cfg.loader.retry_attempts, 2);
        assert_eq!(cfg.loader.placeholder, PlaceholderConfig::default());
    }

    #[test]
    fn test_logging_level() {
        let yaml = r#"
            logging:
              level: debug
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);

        let yaml = r#"
            logging:
              level: loud
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_unknown_fields() {
        // Unknown fields should not cause failure
        let yaml = r#"
            loader:
              not_an_option: 1h
        "#;
        let cfg = Config::from_reader(yaml.as_bytes());
        assert!(cfg.is_ok());
    }

    #[test]
    fn test_empty_file() {
        // Empty files aren't supported
        let yaml = r#""#;
        let result = Config::from_reader(yaml.as_bytes());
        assert!(result.is_err());
    }
}
