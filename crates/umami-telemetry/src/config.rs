//! Tracker configuration loading and validation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default path for single-event sends, relative to the host URL
pub const DEFAULT_SEND_PATH: &str = "/api/send";

/// Default path for batch sends, relative to the host URL
pub const DEFAULT_BATCH_PATH: &str = "/api/send/batch";

/// Retry behavior for failed deliveries
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Failed attempts a record may accumulate before it is dropped
    pub retries: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Exponential growth factor applied per attempt
    pub factor: f64,
    /// Randomize each delay within `[delay/2, delay]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            min_delay_ms: 1000,
            max_delay_ms: 30_000,
            factor: 2.0,
            jitter: true,
        }
    }
}

/// Batch delivery settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchingPolicy {
    pub enabled: bool,
    pub max_batch_size: usize,
    /// Default flush delay when batching is enabled
    pub max_interval_ms: u64,
}

impl Default for BatchingPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_batch_size: 20,
            max_interval_ms: 10_000,
        }
    }
}

/// Tracker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Umami website id every event is attributed to
    pub website_id: Option<String>,

    /// Collector base URL, e.g. `https://umami.example.com`
    pub host_url: Option<String>,

    pub send_path: String,
    pub batch_path: String,

    /// Reported in device info when the provider does not supply one
    pub app_version: Option<String>,

    /// Whether tracking is enabled (default: true, opt-out model)
    pub enabled: bool,

    /// Debug mode - log events instead of sending (default: false)
    pub debug: bool,

    /// HTTP request timeout
    pub timeout_secs: u64,

    pub retry: RetryPolicy,
    pub batching: BatchingPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            website_id: None,
            host_url: None,
            send_path: DEFAULT_SEND_PATH.to_string(),
            batch_path: DEFAULT_BATCH_PATH.to_string(),
            app_version: None,
            enabled: true,
            debug: false,
            timeout_secs: 10,
            retry: RetryPolicy::default(),
            batching: BatchingPolicy::default(),
        }
    }
}

impl TrackerConfig {
    /// Configuration for a website with every other setting defaulted
    pub fn new(website_id: impl Into<String>, host_url: impl Into<String>) -> Self {
        let mut config = Self {
            website_id: Some(website_id.into()),
            host_url: Some(host_url.into()),
            ..Self::default()
        };
        config.normalize();
        config
    }

    /// True once both the website id and host URL are set
    pub fn is_initialized(&self) -> bool {
        self.website_id.is_some() && self.host_url.is_some()
    }

    /// Strip trailing slashes from the host URL and clear blank identity fields.
    pub fn normalize(&mut self) {
        self.website_id = self.website_id.take().filter(|id| !id.trim().is_empty());
        self.host_url = self
            .host_url
            .take()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        if self.batching.max_batch_size == 0 {
            self.batching.max_batch_size = 1;
        }
    }

    /// Full URL for single-event sends
    pub fn send_url(&self) -> Option<String> {
        self.host_url
            .as_ref()
            .map(|host| format!("{}{}", host, self.send_path))
    }

    /// Full URL for batch sends
    pub fn batch_url(&self) -> Option<String> {
        self.host_url
            .as_ref()
            .map(|host| format!("{}{}", host, self.batch_path))
    }
}

/// Load tracker configuration with precedence:
/// 1. Environment variables (highest priority)
/// 2. Local config (.umami/config.local.toml)
/// 3. Project config (.umami/config.toml)
/// 4. User config (~/.umami/config.toml)
/// 5. Defaults
pub fn load_tracker_config() -> Result<TrackerConfig> {
    let mut merged = toml::Table::new();

    if let Some(home_dir) = dirs::home_dir() {
        merge_layer(&mut merged, &home_dir.join(".umami/config.toml"));
    }
    merge_layer(&mut merged, Path::new(".umami/config.toml"));
    merge_layer(&mut merged, Path::new(".umami/config.local.toml"));

    let mut config: TrackerConfig = toml::Value::Table(merged)
        .try_into()
        .context("Invalid [umami] configuration")?;

    apply_env_overrides(&mut config);
    config.normalize();

    Ok(config)
}

/// Load tracker config from a single TOML file
pub fn load_config_from_file(path: &Path) -> Result<TrackerConfig> {
    let section = read_umami_section(path)?;
    let mut config: TrackerConfig = toml::Value::Table(section)
        .try_into()
        .with_context(|| format!("Invalid [umami] section in {}", path.display()))?;
    config.normalize();
    Ok(config)
}

/// Overlay one config file onto the merged table; unreadable files are skipped
fn merge_layer(merged: &mut toml::Table, path: &Path) {
    if !path.exists() {
        return;
    }
    match read_umami_section(path) {
        Ok(section) => merge_tables(merged, section),
        Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable config"),
    }
}

/// Read the `[umami]` table of a config file (empty when the section is missing)
fn read_umami_section(path: &Path) -> Result<toml::Table> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;

    let mut full: toml::Table = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;

    match full.remove("umami") {
        Some(toml::Value::Table(section)) => Ok(section),
        Some(_) => anyhow::bail!("[umami] in {} is not a table", path.display()),
        None => Ok(toml::Table::new()),
    }
}

/// Deep-merge `overlay` into `base`; nested tables merge key by key
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge_tables(existing, nested);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply environment variable overrides
fn apply_env_overrides(config: &mut TrackerConfig) {
    if let Ok(id) = env::var("UMAMI_WEBSITE_ID") {
        config.website_id = Some(id);
    }
    if let Ok(url) = env::var("UMAMI_HOST_URL") {
        config.host_url = Some(url);
    }

    // UMAMI_TELEMETRY_DISABLED=1 disables tracking
    if env::var("UMAMI_TELEMETRY_DISABLED").is_ok() {
        config.enabled = false;
        return;
    }

    // DO_NOT_TRACK=1 (universal opt-out)
    if env::var("DO_NOT_TRACK").is_ok() {
        config.enabled = false;
        return;
    }

    if env::var("UMAMI_DEBUG").is_ok() {
        config.debug = true;
    }

    // Auto-disable in CI unless explicitly enabled
    if is_ci() && env::var("UMAMI_TELEMETRY_IN_CI").is_err() {
        config.enabled = false;
    }
}

/// Check if running in CI environment
fn is_ci() -> bool {
    env::var("CI").is_ok()
        || env::var("CONTINUOUS_INTEGRATION").is_ok()
        || env::var("GITHUB_ACTIONS").is_ok()
        || env::var("GITLAB_CI").is_ok()
        || env::var("CIRCLECI").is_ok()
        || env::var("TRAVIS").is_ok()
}

/// Get the tracker state directory
pub fn get_telemetry_dir() -> Result<PathBuf> {
    let home_dir = dirs::home_dir().context("Could not determine home directory")?;
    let telemetry_dir = home_dir.join(".umami").join("telemetry");
    fs::create_dir_all(&telemetry_dir)?;
    Ok(telemetry_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert!(config.enabled);
        assert!(!config.debug);
        assert!(!config.is_initialized());
        assert_eq!(config.send_path, "/api/send");
        assert_eq!(config.batch_path, "/api/send/batch");
        assert_eq!(config.retry.retries, 5);
        assert_eq!(config.retry.min_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert!(config.retry.jitter);
        assert!(!config.batching.enabled);
        assert_eq!(config.batching.max_batch_size, 20);
        assert_eq!(config.batching.max_interval_ms, 10_000);
    }

    #[test]
    fn test_new_strips_trailing_slash() {
        let config = TrackerConfig::new("site-123", "https://umami.local/");
        assert!(config.is_initialized());
        assert_eq!(config.host_url.as_deref(), Some("https://umami.local"));
        assert_eq!(
            config.send_url().as_deref(),
            Some("https://umami.local/api/send")
        );
        assert_eq!(
            config.batch_url().as_deref(),
            Some("https://umami.local/api/send/batch")
        );
    }

    #[test]
    fn test_blank_identity_is_not_initialized() {
        let config = TrackerConfig::new("  ", "https://umami.local");
        assert!(!config.is_initialized());
    }

    #[test]
    #[serial]
    fn test_is_ci_detection() {
        let original_ci = env::var("CI").ok();
        let original_github = env::var("GITHUB_ACTIONS").ok();

        env::set_var("CI", "true");
        assert!(is_ci());
        env::remove_var("CI");

        env::set_var("GITHUB_ACTIONS", "true");
        assert!(is_ci());
        env::remove_var("GITHUB_ACTIONS");

        if let Some(val) = original_ci {
            env::set_var("CI", val);
        }
        if let Some(val) = original_github {
            env::set_var("GITHUB_ACTIONS", val);
        }
    }

    #[test]
    #[serial]
    fn test_do_not_track_disables_tracking() {
        let original = env::var("DO_NOT_TRACK").ok();

        env::set_var("DO_NOT_TRACK", "1");
        let mut config = TrackerConfig::default();
        apply_env_overrides(&mut config);
        assert!(!config.enabled);

        env::remove_var("DO_NOT_TRACK");
        if let Some(val) = original {
            env::set_var("DO_NOT_TRACK", val);
        }
    }

    #[test]
    #[serial]
    fn test_env_sets_identity() {
        let original_id = env::var("UMAMI_WEBSITE_ID").ok();
        let original_url = env::var("UMAMI_HOST_URL").ok();

        env::set_var("UMAMI_WEBSITE_ID", "env-site");
        env::set_var("UMAMI_HOST_URL", "https://env.example.com/");
        let mut config = TrackerConfig::default();
        apply_env_overrides(&mut config);
        config.normalize();
        assert_eq!(config.website_id.as_deref(), Some("env-site"));
        assert_eq!(config.host_url.as_deref(), Some("https://env.example.com"));

        env::remove_var("UMAMI_WEBSITE_ID");
        env::remove_var("UMAMI_HOST_URL");
        if let Some(val) = original_id {
            env::set_var("UMAMI_WEBSITE_ID", val);
        }
        if let Some(val) = original_url {
            env::set_var("UMAMI_HOST_URL", val);
        }
    }

    #[test]
    fn test_merge_tables_is_deep() {
        let mut base: toml::Table = toml::from_str(
            r#"
website_id = "base"
[retry]
retries = 3
min_delay_ms = 500
"#,
        )
        .unwrap();
        let overlay: toml::Table = toml::from_str(
            r#"
[retry]
retries = 7
"#,
        )
        .unwrap();

        merge_tables(&mut base, overlay);
        let config: TrackerConfig = toml::Value::Table(base).try_into().unwrap();
        assert_eq!(config.website_id.as_deref(), Some("base"));
        assert_eq!(config.retry.retries, 7);
        assert_eq!(config.retry.min_delay_ms, 500);
        assert_eq!(config.retry.max_delay_ms, 30_000);
    }

    #[test]
    fn test_load_config_from_file_with_umami_section() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");

        fs::write(
            &config_file,
            r#"
[umami]
website_id = "site-1"
host_url = "https://umami.example.com/"
debug = true

[umami.batching]
enabled = true
max_batch_size = 5
"#,
        )
        .unwrap();

        let config = load_config_from_file(&config_file).unwrap();
        assert_eq!(config.website_id.as_deref(), Some("site-1"));
        assert_eq!(config.host_url.as_deref(), Some("https://umami.example.com"));
        assert!(config.debug);
        assert!(config.batching.enabled);
        assert_eq!(config.batching.max_batch_size, 5);
        assert_eq!(config.batching.max_interval_ms, 10_000);
    }

    #[test]
    fn test_load_config_from_file_without_umami_section() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");

        fs::write(
            &config_file,
            r#"
[paths]
templatesDir = "templates"
"#,
        )
        .unwrap();

        let config = load_config_from_file(&config_file).unwrap();
        assert!(config.enabled);
        assert!(!config.is_initialized());
    }

    #[test]
    fn test_load_config_from_file_rejects_bad_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");
        fs::write(&config_file, "[umami\nwebsite_id = ").unwrap();

        assert!(load_config_from_file(&config_file).is_err());
    }
}
