//! Application configuration
//!
//! Loaded from a YAML file (defaults when the file is absent), then overridden
//! from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const ENTRY_URL: &str = "https://www.instagram.com/";
pub const COMPOSER_URL: &str = "https://www.instagram.com/create/details/";
pub const TRENDS_FEED_URL: &str = "https://trends.google.com/trending/rss?geo=US";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub headless: bool,
    /// Wall-clock budget for the whole run
    pub overall_timeout_secs: u64,
    /// Budget for the completion verifier after the submit step
    pub verify_budget_secs: u64,
    pub verify_poll_ms: u64,
    pub settle_ms: u64,
    pub attach_settle_ms: u64,
    pub ledger_path: PathBuf,
    pub storage_state: PathBuf,
    pub links_file: PathBuf,
    pub media_download_path: PathBuf,
    pub keep_media: bool,
    pub diagnostics_dir: PathBuf,
    pub entry_url: String,
    pub composer_url: String,
    pub trends_feed_url: String,
    pub user_agent: String,
    pub json_logs: bool,
    /// Set when a CI variable is present; CI runners have no display.
    #[serde(skip)]
    pub ci: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            headless: true,
            overall_timeout_secs: 600,
            verify_budget_secs: 30,
            verify_poll_ms: 1_000,
            settle_ms: 2_000,
            attach_settle_ms: 5_000,
            ledger_path: PathBuf::from("day_counter.txt"),
            storage_state: PathBuf::from("storage_state.json"),
            links_file: PathBuf::from("drive_links.txt"),
            media_download_path: PathBuf::from("video.mp4"),
            keep_media: false,
            diagnostics_dir: PathBuf::from("diagnostics"),
            entry_url: ENTRY_URL.to_string(),
            composer_url: COMPOSER_URL.to_string(),
            trends_feed_url: TRENDS_FEED_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            json_logs: false,
            ci: false,
        }
    }
}

impl Config {
    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout_secs)
    }

    pub fn verify_budget(&self) -> Duration {
        Duration::from_secs(self.verify_budget_secs)
    }

    pub fn verify_poll(&self) -> Duration {
        Duration::from_millis(self.verify_poll_ms)
    }

    /// Apply `POSTFLOW_*` (and the legacy `PLAYWRIGHT_HEADLESS`) variables.
    /// Returns a notice for every value that was ignored.
    pub fn apply_env_overrides(&mut self) -> Vec<String> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut notices = Vec::new();
        let headless = lookup("POSTFLOW_HEADLESS").or_else(|| lookup("PLAYWRIGHT_HEADLESS"));
        if let Some(raw) = headless {
            self.headless = raw.trim().eq_ignore_ascii_case("true");
        }
        self.ci = ["CI", "GITHUB_ACTIONS", "TRAVIS"]
            .iter()
            .any(|key| lookup(key).is_some_and(|v| !v.is_empty()));
        if self.ci {
            self.headless = true;
        }

        if let Some(raw) = lookup("POSTFLOW_OVERALL_TIMEOUT_SECS") {
            match raw.trim().parse() {
                Ok(secs) => self.overall_timeout_secs = secs,
                Err(_) => notices.push(format!(
                    "ignoring invalid POSTFLOW_OVERALL_TIMEOUT_SECS={raw:?}"
                )),
            }
        }
        if let Some(path) = lookup("POSTFLOW_STORAGE_STATE") {
            self.storage_state = PathBuf::from(path);
        }
        if let Some(path) = lookup("POSTFLOW_LEDGER") {
            self.ledger_path = PathBuf::from(path);
        }
        notices
    }

    /// Honour a request for a visible browser unless running on CI.
    /// Returns whether the request was honoured.
    pub fn request_headed(&mut self) -> bool {
        if self.ci {
            return false;
        }
        self.headless = false;
        true
    }
}

/// Configuration plus what loading it had to say. Loading runs before the
/// subscriber exists, so the caller logs these once logging is up.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,
    pub path: PathBuf,
    pub from_file: bool,
    pub notices: Vec<String>,
}

impl LoadedConfig {
    pub fn log(&self) {
        if self.from_file {
            info!("Loaded configuration from: {}", self.path.display());
        } else {
            info!("Config file not found, using defaults: {}", self.path.display());
        }
        for notice in &self.notices {
            warn!("{notice}");
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir().context("Failed to get config directory")?;
    path.push("postflow");
    path.push("config.yaml");
    Ok(path)
}

pub async fn load_config(config_path: Option<&Path>) -> Result<LoadedConfig> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    let from_file = config_path.exists();
    let mut config = if from_file {
        let content = tokio::fs::read_to_string(&config_path)
            .await
            .context("Failed to read config file")?;
        serde_yaml::from_str(&content).context("Failed to parse config file")?
    } else {
        Config::default()
    };
    let notices = config.apply_env_overrides();
    Ok(LoadedConfig {
        config,
        path: config_path,
        from_file,
        notices,
    })
}
