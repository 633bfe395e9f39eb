//! Chromium-backed [`Cdp`] driver built on chromiumoxide.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::element::Element;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CdpConfig;
use crate::dom::{CloneRebind, FileInputSpec, NodeRef, NodeState, QuerySpec, SessionCookie};
use crate::error::{AdapterError, AdapterErrorKind};
use crate::{scripts, Cdp};

/// A single Chromium tab owned by this process.
pub struct ChromiumPage {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromiumPage {
    /// Launch Chromium, open a blank tab and restore `cookies` into it.
    pub async fn launch(cfg: &CdpConfig, cookies: &[SessionCookie]) -> Result<Self, AdapterError> {
        let config = browser_config(cfg)?;
        let (browser, mut handler) = Browser::launch(config).await.map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("failed to launch chromium: {err}"))
        })?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(target: "cdp-adapter", %err, "handler event error");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|err| AdapterError::io(format!("new_page failed: {err}")))?;

        if let Some(agent) = &cfg.user_agent {
            page.set_user_agent(agent.as_str())
                .await
                .map_err(|err| AdapterError::io(format!("set_user_agent failed: {err}")))?;
        }

        if !cookies.is_empty() {
            let params = cookies
                .iter()
                .map(cookie_param)
                .collect::<Result<Vec<_>, _>>()?;
            page.set_cookies(params)
                .await
                .map_err(|err| AdapterError::io(format!("set_cookies failed: {err}")))?;
        }

        info!(target: "cdp-adapter", headless = cfg.headless, cookies = cookies.len(), "chromium session ready");
        Ok(Self {
            browser: Mutex::new(Some(browser)),
            page,
            handler,
        })
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, AdapterError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|err| AdapterError::io(format!("evaluate failed: {err}")))?;
        result.into_value::<T>().map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("unexpected evaluate result: {err}"))
        })
    }

    async fn element(&self, node: &NodeRef) -> Result<Element, AdapterError> {
        self.page
            .find_element(scripts::selector_for(node.as_str()))
            .await
            .map_err(|_| AdapterError::stale(format!("node {node} is no longer attached")))
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

fn browser_config(cfg: &CdpConfig) -> Result<BrowserConfig, AdapterError> {
    if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
        return Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!(
                "chrome executable not found at {}",
                cfg.executable.display()
            ))
            .with_data(json!({
                "expected": cfg.executable,
                "hint": "Set POSTFLOW_CHROME to the full path of chrome/chromium."
            })));
    }

    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(cfg.request_timeout_ms))
        .launch_timeout(Duration::from_millis(cfg.launch_timeout_ms))
        .window_size(cfg.window_size.0, cfg.window_size.1);

    if !cfg.headless {
        builder = builder.with_head();
    }
    if cfg.disable_sandbox {
        builder = builder.no_sandbox();
    }
    builder = builder.args(cfg.launch_args());

    if !cfg.executable.as_os_str().is_empty() {
        builder = builder.chrome_executable(cfg.executable.clone());
    }
    if let Some(dir) = &cfg.user_data_dir {
        builder = builder.user_data_dir(dir.clone());
    }

    builder.build().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal).with_hint(format!("browser config error: {err}"))
    })
}

fn cookie_param(cookie: &SessionCookie) -> Result<CookieParam, AdapterError> {
    CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .domain(cookie.domain.clone())
        .path(cookie.path.clone())
        .secure(cookie.secure)
        .http_only(cookie.http_only)
        .build()
        .map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("invalid cookie {}: {err}", cookie.name))
        })
}

fn key_event(kind: DispatchKeyEventType, key: &str) -> Result<DispatchKeyEventParams, AdapterError> {
    let mut builder = DispatchKeyEventParams::builder()
        .r#type(kind.clone())
        .key(key.to_string());
    if key == "Enter" {
        builder = builder.code("Enter").windows_virtual_key_code(13);
        if kind == DispatchKeyEventType::KeyDown {
            builder = builder.text("\r");
        }
    }
    builder.build().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal).with_hint(format!("key event: {err}"))
    })
}

#[async_trait]
impl Cdp for ChromiumPage {
    async fn navigate(&self, url: &str, deadline: Duration) -> Result<(), AdapterError> {
        debug!(target: "cdp-adapter", url, ?deadline, "navigate");
        match tokio::time::timeout(deadline, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(AdapterError::io(format!("navigation to {url} failed: {err}"))),
            Err(_) => Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                .with_hint(format!("{url} did not load within {}ms", deadline.as_millis()))
                .retriable(true)),
        }
    }

    async fn current_url(&self) -> Result<String, AdapterError> {
        let url = self
            .page
            .url()
            .await
            .map_err(|err| AdapterError::io(format!("url lookup failed: {err}")))?;
        Ok(url.unwrap_or_default())
    }

    async fn query(&self, spec: &QuerySpec) -> Result<Vec<NodeRef>, AdapterError> {
        let tokens: Vec<String> = self.eval(scripts::query(spec)).await?;
        Ok(tokens.into_iter().map(NodeRef).collect())
    }

    async fn inspect(&self, node: &NodeRef) -> Result<NodeState, AdapterError> {
        let state: Option<NodeState> = self.eval(scripts::inspect(node.as_str())).await?;
        state.ok_or_else(|| AdapterError::stale(format!("node {node} is no longer attached")))
    }

    async fn click(&self, node: &NodeRef) -> Result<(), AdapterError> {
        let element = self.element(node).await?;
        element
            .click()
            .await
            .map_err(|err| AdapterError::io(format!("click on {node} failed: {err}")))?;
        Ok(())
    }

    async fn clear_text(&self, node: &NodeRef) -> Result<(), AdapterError> {
        let cleared: bool = self.eval(scripts::clear_text(node.as_str())).await?;
        if cleared {
            Ok(())
        } else {
            Err(AdapterError::stale(format!("node {node} is no longer attached")))
        }
    }

    async fn type_text(&self, node: &NodeRef, text: &str) -> Result<(), AdapterError> {
        let element = self.element(node).await?;
        element
            .focus()
            .await
            .map_err(|err| AdapterError::io(format!("focus on {node} failed: {err}")))?;
        element
            .type_str(text)
            .await
            .map_err(|err| AdapterError::io(format!("typing into {node} failed: {err}")))?;
        Ok(())
    }

    async fn set_input_files(
        &self,
        node: &NodeRef,
        files: &[PathBuf],
    ) -> Result<(), AdapterError> {
        let element = self.element(node).await?;
        let mut params = SetFileInputFilesParams::new(
            files
                .iter()
                .map(|path| path.to_string_lossy().into_owned())
                .collect::<Vec<_>>(),
        );
        params.object_id = Some(element.remote_object_id.clone());
        self.page
            .execute(params)
            .await
            .map_err(|err| AdapterError::io(format!("setFileInputFiles failed: {err}")))?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), AdapterError> {
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            self.page
                .execute(key_event(kind, key)?)
                .await
                .map_err(|err| AdapterError::io(format!("key {key} failed: {err}")))?;
        }
        Ok(())
    }

    async fn inject_file_input(&self, spec: &FileInputSpec) -> Result<NodeRef, AdapterError> {
        let token: String = self.eval(scripts::inject_file_input(spec)).await?;
        Ok(NodeRef(token))
    }

    async fn replace_with_clone(
        &self,
        node: &NodeRef,
        rebind: &CloneRebind,
    ) -> Result<(), AdapterError> {
        let replaced: bool = self
            .eval(scripts::replace_with_clone(node.as_str(), rebind))
            .await?;
        if replaced {
            Ok(())
        } else {
            Err(AdapterError::stale(format!("node {node} detached before cloning")))
        }
    }

    async fn page_text(&self) -> Result<String, AdapterError> {
        self.eval(scripts::page_text()).await
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AdapterError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        self.page
            .screenshot(params)
            .await
            .map_err(|err| AdapterError::io(format!("screenshot failed: {err}")))
    }

    async fn content(&self) -> Result<String, AdapterError> {
        self.page
            .content()
            .await
            .map_err(|err| AdapterError::io(format!("content failed: {err}")))
    }

    async fn close(&self) -> Result<(), AdapterError> {
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            if let Err(err) = browser.close().await {
                warn!(target: "cdp-adapter", %err, "browser close failed");
            }
            let _ = browser.wait().await;
        }
        self.handler.abort();
        Ok(())
    }
}
