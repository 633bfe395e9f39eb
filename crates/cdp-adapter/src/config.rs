use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use which::which;

/// Launch settings for [`crate::ChromiumPage`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CdpConfig {
    /// Empty means "let chromiumoxide find one".
    pub executable: PathBuf,
    pub user_data_dir: Option<PathBuf>,
    pub headless: bool,
    pub request_timeout_ms: u64,
    pub launch_timeout_ms: u64,
    pub user_agent: Option<String>,
    pub window_size: (u32, u32),
    pub disable_sandbox: bool,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            executable: detect_chrome_executable().unwrap_or_default(),
            user_data_dir: None,
            headless: true,
            request_timeout_ms: 30_000,
            launch_timeout_ms: 20_000,
            user_agent: None,
            window_size: (1920, 1080),
            disable_sandbox: env_flag("POSTFLOW_DISABLE_SANDBOX"),
        }
    }
}

impl CdpConfig {
    pub fn headless(mut self, flag: bool) -> Self {
        self.headless = flag;
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Command-line switches passed to Chromium on top of chromiumoxide's defaults.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = vec![
            "--disable-blink-features=AutomationControlled".to_string(),
            format!("--window-size={},{}", self.window_size.0, self.window_size.1),
            "--disable-dev-shm-usage".to_string(),
            "--disable-popup-blocking".to_string(),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            "--password-store=basic".to_string(),
            "--use-mock-keychain".to_string(),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
            args.push("--mute-audio".to_string());
        }
        args
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

pub fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("POSTFLOW_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    os_specific_chrome_paths()
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(not(target_os = "windows"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/snap/bin/chromium"),
        ]
    }
}
