//! Configuration management for imgcast

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::batch::{GroupPolicy, TitleSource};
use crate::error::{ConfigError, Result};
use crate::retry::RetryPolicy;
use crate::ui::contract::RemoteConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub ledger: LedgerConfig,
    pub session: SessionConfig,
    pub webdriver: WebDriverConfig,
    pub upload: UploadConfig,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/imgcast/uploads.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/imgcast/session.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebDriverConfig {
    /// Address of a running chromedriver (or compatible) server
    pub url: String,
    pub headless: bool,
    pub minimized: bool,
    pub browser_args: Vec<String>,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:4444".to_string(),
            headless: false,
            minimized: false,
            browser_args: vec![
                "--disable-blink-features=AutomationControlled".to_string(),
                "--lang=en-US".to_string(),
            ],
        }
    }
}

/// What to do when the title could not be set before publishing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UntitledPublish {
    /// Publish anyway; the remote assigns its own default title
    #[default]
    Allow,
    /// Fail the attempt
    Refuse,
}

impl FromStr for UntitledPublish {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" => Ok(UntitledPublish::Allow),
            "refuse" => Ok(UntitledPublish::Refuse),
            _ => Err(format!(
                "Invalid untitled policy: '{}'. Valid options: allow, refuse",
                s
            )),
        }
    }
}

/// Inclusive range of seconds to pause before each publish click
///
/// Written as `"MIN-MAX"` (e.g. `"4-8"`) or a single number for a fixed pause.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PauseRange {
    min_secs: f64,
    max_secs: f64,
}

impl PauseRange {
    pub fn new(min_secs: f64, max_secs: f64) -> std::result::Result<Self, String> {
        if !min_secs.is_finite() || !max_secs.is_finite() || min_secs < 0.0 {
            return Err(format!(
                "Pause bounds must be non-negative numbers, got {}-{}",
                min_secs, max_secs
            ));
        }
        if max_secs < min_secs {
            return Err(format!(
                "Pause maximum {} is below minimum {}",
                max_secs, min_secs
            ));
        }
        Ok(Self { min_secs, max_secs })
    }

    /// A range that never sleeps
    pub fn zero() -> Self {
        Self {
            min_secs: 0.0,
            max_secs: 0.0,
        }
    }

    pub fn min(&self) -> Duration {
        Duration::from_secs_f64(self.min_secs)
    }

    pub fn max(&self) -> Duration {
        Duration::from_secs_f64(self.max_secs)
    }

    /// Draw a uniformly random pause within the range
    pub fn sample(&self) -> Duration {
        if self.max_secs <= self.min_secs {
            return self.min();
        }
        let secs = rand::thread_rng().gen_range(self.min_secs..=self.max_secs);
        Duration::from_secs_f64(secs)
    }
}

impl Default for PauseRange {
    fn default() -> Self {
        Self {
            min_secs: 4.0,
            max_secs: 8.0,
        }
    }
}

impl FromStr for PauseRange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| format!("Invalid pause range '{}'. Expected MIN-MAX, e.g. 4-8", s))
        };

        match s.split_once('-') {
            Some((min, max)) => Self::new(parse(min)?, parse(max)?),
            None => {
                let fixed = parse(s)?;
                Self::new(fixed, fixed)
            }
        }
    }
}

impl TryFrom<String> for PauseRange {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PauseRange> for String {
    fn from(range: PauseRange) -> Self {
        range.to_string()
    }
}

impl fmt::Display for PauseRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min_secs, self.max_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// Maximum files per post
    pub post_size: usize,
    pub group_by: GroupPolicy,
    pub title_from: TitleSource,
    pub auto_title_prefix: String,
    pub tags: Vec<String>,
    /// Number of posts in flight at once
    pub concurrency: usize,
    pub publish_timeout_secs: u64,
    pub thumbnail_timeout_secs: u64,
    pub pause: PauseRange,
    pub untitled_publish: UntitledPublish,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            post_size: 20,
            group_by: GroupPolicy::Folder,
            title_from: TitleSource::Folder,
            auto_title_prefix: "Upload".to_string(),
            tags: Vec::new(),
            concurrency: 1,
            publish_timeout_secs: 180,
            thumbnail_timeout_secs: 90,
            pause: PauseRange::default(),
            untitled_publish: UntitledPublish::Allow,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            tracing::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no run could work with
    pub fn validate(&self) -> Result<()> {
        if self.upload.post_size == 0 {
            return Err(invalid("upload.post_size", "must be at least 1"));
        }
        if self.upload.concurrency == 0 {
            return Err(invalid("upload.concurrency", "must be at least 1"));
        }
        if self.remote.file_input.is_empty() {
            return Err(invalid("remote.file_input", "needs at least one selector"));
        }
        if self.remote.publish_button.is_empty() {
            return Err(invalid("remote.publish_button", "needs at least one selector"));
        }
        if url::Url::parse(&self.remote.editor_url).is_err() {
            return Err(invalid("remote.editor_url", "is not an absolute URL"));
        }
        Ok(())
    }

    /// Timings and policies for one run of post attempts
    pub fn post_config(&self, dry_run: bool) -> PostConfig {
        PostConfig {
            dry_run,
            publish_timeout: Duration::from_secs(self.upload.publish_timeout_secs),
            thumbnail_timeout: Duration::from_secs(self.upload.thumbnail_timeout_secs),
            pause: self.upload.pause,
            untitled: self.upload.untitled_publish,
            ..PostConfig::default()
        }
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::ImgcastError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Immutable timing and policy values handed to the post state machine
#[derive(Debug, Clone, PartialEq)]
pub struct PostConfig {
    /// Stop before the publish click and report success
    pub dry_run: bool,
    /// Retry policy wrapped around opening the editor
    pub navigation_retry: RetryPolicy,
    /// Bound on a single navigation
    pub navigation_timeout: Duration,
    /// How long to wait for the file controls to show up
    pub control_timeout: Duration,
    /// How long the title field may take to become editable
    pub field_timeout: Duration,
    /// Bound on handing the files to one control
    pub upload_timeout: Duration,
    pub thumbnail_timeout: Duration,
    /// Bound on the network-idle fallbacks
    pub idle_timeout: Duration,
    /// Extra sleep after a network-idle fallback
    pub settle_delay: Duration,
    /// Sleep between committed tags
    pub tag_settle: Duration,
    /// Bound on locating and clicking publish
    pub click_timeout: Duration,
    /// How long the location may take to reach the created post
    pub publish_timeout: Duration,
    /// Publish-and-confirm cycles (one retry after the idle fallback)
    pub confirm_retry: RetryPolicy,
    pub pause: PauseRange,
    pub untitled: UntitledPublish,
    /// Interval between readiness and confirmation probes
    pub poll_interval: Duration,
}

impl Default for PostConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            navigation_retry: RetryPolicy::navigation(),
            navigation_timeout: Duration::from_secs(120),
            control_timeout: Duration::from_secs(10),
            field_timeout: Duration::from_secs(8),
            upload_timeout: Duration::from_secs(120),
            thumbnail_timeout: Duration::from_secs(90),
            idle_timeout: Duration::from_secs(60),
            settle_delay: Duration::from_secs(2),
            tag_settle: Duration::from_millis(200),
            click_timeout: Duration::from_secs(15),
            publish_timeout: Duration::from_secs(180),
            confirm_retry: RetryPolicy::publish_confirmation(),
            pause: PauseRange::default(),
            untitled: UntitledPublish::Allow,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("IMGCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("imgcast").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImgcastError;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_pause_range_parse() {
        let range: PauseRange = "4-8".parse().unwrap();
        assert_eq!(range.min(), Duration::from_secs(4));
        assert_eq!(range.max(), Duration::from_secs(8));

        let fixed: PauseRange = "2.5".parse().unwrap();
        assert_eq!(fixed.min(), fixed.max());

        assert!("8-4".parse::<PauseRange>().is_err());
        assert!("a-b".parse::<PauseRange>().is_err());
        assert!("-1".parse::<PauseRange>().is_err());
    }

    #[test]
    fn test_pause_range_sample_within_bounds() {
        let range: PauseRange = "0.01-0.02".parse().unwrap();
        for _ in 0..100 {
            let pause = range.sample();
            assert!(pause >= range.min() && pause <= range.max());
        }
        assert_eq!(PauseRange::zero().sample(), Duration::ZERO);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [upload]
            post_size = 10
            group_by = "flat"
            pause = "1-2"
            untitled_publish = "refuse"
            "#,
        )
        .unwrap();

        assert_eq!(config.upload.post_size, 10);
        assert_eq!(config.upload.group_by, GroupPolicy::Flat);
        assert_eq!(config.upload.title_from, TitleSource::Folder);
        assert_eq!(config.upload.pause, PauseRange::new(1.0, 2.0).unwrap());
        assert_eq!(config.upload.untitled_publish, UntitledPublish::Refuse);
        assert_eq!(config.upload.concurrency, 1);
        assert_eq!(config.remote, RemoteConfig::default());
        assert_eq!(config.webdriver.url, "http://localhost:4444");
    }

    #[test]
    fn test_post_config_carries_upload_values() {
        let mut config = Config::default();
        config.upload.publish_timeout_secs = 30;
        config.upload.thumbnail_timeout_secs = 5;

        let post = config.post_config(true);
        assert!(post.dry_run);
        assert_eq!(post.publish_timeout, Duration::from_secs(30));
        assert_eq!(post.thumbnail_timeout, Duration::from_secs(5));
        assert_eq!(post.navigation_retry, RetryPolicy::navigation());
        assert_eq!(post.untitled, UntitledPublish::Allow);
    }

    #[test]
    fn test_load_from_path_rejects_zero_post_size() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[upload]\npost_size = 0\n").unwrap();

        match Config::load_from_path(&path) {
            Err(ImgcastError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "upload.post_size");
            }
            other => panic!("Expected invalid value, got {:?}", other),
        }
    }

    #[test]
    fn test_load_from_path_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[upload\npost_size = ").unwrap();

        assert!(matches!(
            Config::load_from_path(&path),
            Err(ImgcastError::Config(ConfigError::ParseError(_)))
        ));
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        std::env::set_var("IMGCAST_CONFIG", temp.path().join("absent.toml"));

        let config = Config::load().unwrap();
        assert_eq!(config, Config::default());

        std::env::remove_var("IMGCAST_CONFIG");
    }

    #[test]
    #[serial]
    fn test_config_path_from_env() {
        std::env::set_var("IMGCAST_CONFIG", "/tmp/imgcast-test/config.toml");
        assert_eq!(
            resolve_config_path().unwrap(),
            PathBuf::from("/tmp/imgcast-test/config.toml")
        );
        std::env::remove_var("IMGCAST_CONFIG");
    }
}
