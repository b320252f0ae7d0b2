use anyhow::{Context, Result};
use clap::Parser;
use lib_quakefeed::FeedConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Earthquake feed follower", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "QUAKEFEED_CONFIG_PATH", help = "Path to the JSON feed configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "QUAKEFEED_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "QUAKEFEED_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "QUAKEFEED_BASE_URL", help = "Base URL of the events service.")]
    pub base_url: Option<String>,

    #[clap(long, env = "QUAKEFEED_DEVICE_ID", help = "Device identifier sent with every request.")]
    pub device_id: Option<String>,

    #[clap(long, env = "QUAKEFEED_TIMEZONE", help = "IANA timezone filters are expressed in.")]
    pub timezone: Option<String>,

    #[clap(long, env = "QUAKEFEED_CAPACITY", help = "Maximum number of events kept in the working set.")]
    pub capacity: Option<usize>,

    #[clap(long, env = "QUAKEFEED_REFRESH_INTERVAL_SECS", help = "Seconds between periodic full refreshes.")]
    pub refresh_interval_secs: Option<u64>,

    #[clap(long, env = "QUAKEFEED_ALERT_THRESHOLD", help = "Magnitude at or above which live events raise an alert.")]
    pub alert_threshold: Option<f64>,

    #[clap(long, help = "Fetch once, print the working set as JSON and exit.")]
    #[serde(default)]
    pub dump: bool,

    #[clap(long, help = "Load the quarterly, semiannual and annual reports at startup.")]
    #[serde(default)]
    pub reports: bool,
}

impl Config {
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> String {
        self.log_level.clone().unwrap_or_else(|| "info".to_string())
    }

    // Command line (and environment) values override the file for Some values
    fn overlay(&self, mut feed: FeedConfig) -> FeedConfig {
        if let Some(url) = &self.base_url {
            feed.base_url = url.clone();
        }
        if let Some(id) = &self.device_id {
            feed.device_id = Some(id.clone());
        }
        if let Some(zone) = &self.timezone {
            feed.timezone = zone.clone();
        }
        if let Some(capacity) = self.capacity {
            feed.capacity = capacity;
        }
        if let Some(secs) = self.refresh_interval_secs {
            feed.refresh_interval_secs = secs;
        }
        if let Some(threshold) = self.alert_threshold {
            feed.alert_threshold = threshold;
        }
        feed
    }

    /// Builds the feed configuration: defaults, then the JSON file, then the
    /// environment and the command line.
    pub fn feed_config(&self) -> Result<FeedConfig> {
        let path = self.config_path.clone().unwrap_or_else(|| PathBuf::from("server_feed.json"));

        let file_config = if path.exists() {
            FeedConfig::from_json_file(&path).with_context(|| format!("loading {}", path.display()))?
        } else {
            log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
            FeedConfig::default()
        };

        let merged = self.overlay(file_config);
        merged.validate().context("invalid feed configuration")?;
        Ok(merged)
    }
}

pub fn load_config() -> Config {
    Config::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_values_override_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"baseUrl":"https://file.example.org/","capacity":50}}"#).unwrap();
        let path = file.path().to_string_lossy().to_string();

        let cli = Config::try_parse_from(["server_feed", "--config-path", &path, "--capacity", "75"]).unwrap();
        let feed = cli.feed_config().unwrap();

        assert_eq!(feed.base_url, "https://file.example.org/");
        assert_eq!(feed.capacity, 75);
        assert_eq!(feed.timezone, "America/Mexico_City");
    }

    #[test]
    fn invalid_overrides_are_reported() {
        let cli = Config {
            config_path: Some(PathBuf::from("/nonexistent/server_feed.json")),
            timezone: Some("Atlantis/Lost".into()),
            ..Config::default()
        };
        assert!(cli.feed_config().is_err());
    }
}
