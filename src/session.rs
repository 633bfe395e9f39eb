//! Ready-session acquisition

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cdp_adapter::{Cdp, CdpConfig, ChromiumPage, SessionCookie};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::info;

use crate::errors::RunError;

/// Produces an authenticated page for one run.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn Cdp>, RunError>;
}

/// Playwright-style `storage_state.json`; only the cookies are used.
#[derive(Debug, Deserialize)]
struct StorageState {
    #[serde(default)]
    cookies: Vec<SessionCookie>,
}

pub async fn load_storage_state(path: &Path) -> Result<Vec<SessionCookie>, RunError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|err| {
        RunError::session(format!(
            "storage state {} unreadable: {err}",
            path.display()
        ))
    })?;
    let state: StorageState = serde_json::from_str(&raw).map_err(|err| {
        RunError::session(format!("storage state {} invalid: {err}", path.display()))
    })?;
    Ok(state.cookies)
}

/// Launches Chromium and restores the saved login cookies.
pub struct ChromiumSessions {
    config: CdpConfig,
    storage_state: PathBuf,
}

impl ChromiumSessions {
    pub fn new(config: CdpConfig, storage_state: impl Into<PathBuf>) -> Self {
        Self {
            config,
            storage_state: storage_state.into(),
        }
    }
}

#[async_trait]
impl SessionProvider for ChromiumSessions {
    async fn open(&self) -> Result<Arc<dyn Cdp>, RunError> {
        let cookies = load_storage_state(&self.storage_state).await?;
        info!(
            cookies = cookies.len(),
            headless = self.config.headless,
            "launching browser session"
        );
        let page = ChromiumPage::launch(&self.config, &cookies).await?;
        Ok(Arc::new(page))
    }
}

/// Hands out a page that already exists, once.
pub struct ProvidedSession {
    page: Mutex<Option<Arc<dyn Cdp>>>,
}

impl ProvidedSession {
    pub fn new(page: Arc<dyn Cdp>) -> Self {
        Self {
            page: Mutex::new(Some(page)),
        }
    }
}

#[async_trait]
impl SessionProvider for ProvidedSession {
    async fn open(&self) -> Result<Arc<dyn Cdp>, RunError> {
        self.page
            .lock()
            .take()
            .ok_or_else(|| RunError::session("session already used"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cookies_are_read_from_storage_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage_state.json");
        std::fs::write(
            &path,
            r#"{"cookies":[{"name":"sessionid","value":"abc","domain":".instagram.com",
                "path":"/","expires":-1,"httpOnly":true,"secure":true,"sameSite":"Lax"}],
                "origins":[]}"#,
        )
        .unwrap();
        let cookies = load_storage_state(&path).await.unwrap();
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].http_only);
    }

    #[tokio::test]
    async fn missing_state_file_is_a_session_error() {
        let sessions = ChromiumSessions::new(CdpConfig::default(), "/nonexistent/state.json");
        let err = sessions.open().await.err().unwrap();
        assert!(matches!(err, RunError::Session(_)));
    }
}
