//! Media acquisition

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rand::seq::SliceRandom;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::errors::RunError;

pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(90);

/// A media file ready for upload.
#[derive(Debug, Clone)]
pub struct Media {
    pub path: PathBuf,
    /// Remove the file once the run is over
    pub temporary: bool,
}

impl Media {
    pub async fn cleanup(&self) {
        if !self.temporary {
            return;
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => info!(path = %self.path.display(), "media cleaned up"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), %err, "media cleanup failed"),
        }
    }
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<Media, RunError>;
}

/// An existing local file.
pub struct LocalMedia {
    path: PathBuf,
}

impl LocalMedia {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MediaSource for LocalMedia {
    async fn acquire(&self) -> Result<Media, RunError> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|err| RunError::media(format!("{}: {err}", self.path.display())))?;
        if !meta.is_file() {
            return Err(RunError::media(format!("{} is not a file", self.path.display())));
        }
        Ok(Media {
            path: self.path.clone(),
            temporary: false,
        })
    }
}

/// Picks one URL at random from a links file and downloads it.
pub struct LinkListMedia {
    links_file: PathBuf,
    target: PathBuf,
    keep: bool,
    client: reqwest::Client,
}

impl LinkListMedia {
    pub fn new(links_file: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Result<Self, RunError> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|err| RunError::media(err.to_string()))?;
        Ok(Self {
            links_file: links_file.into(),
            target: target.into(),
            keep: false,
            client,
        })
    }

    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    async fn pick_link(&self) -> Result<String, RunError> {
        let raw = tokio::fs::read_to_string(&self.links_file)
            .await
            .map_err(|err| RunError::media(format!("{}: {err}", self.links_file.display())))?;
        let links = parse_links(&raw);
        links
            .choose(&mut rand::thread_rng())
            .map(|s| s.to_string())
            .ok_or_else(|| RunError::media(format!("{} is empty", self.links_file.display())))
    }

    async fn download(&self, link: &str) -> Result<(), RunError> {
        let resp = self
            .client
            .get(link)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| RunError::media(format!("download failed: {err}")))?;
        let mut file = tokio::fs::File::create(&self.target)
            .await
            .map_err(|err| RunError::media(format!("{}: {err}", self.target.display())))?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| RunError::media(format!("download failed: {err}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|err| RunError::media(err.to_string()))?;
        }
        file.flush().await.map_err(|err| RunError::media(err.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl MediaSource for LinkListMedia {
    async fn acquire(&self) -> Result<Media, RunError> {
        let link = self.pick_link().await?;
        info!(%link, target = %self.target.display(), "downloading media");
        if let Err(err) = self.download(&link).await {
            let _ = tokio::fs::remove_file(&self.target).await;
            return Err(err);
        }
        Ok(Media {
            path: self.target.clone(),
            temporary: !self.keep,
        })
    }
}

fn parse_links(raw: &str) -> Vec<&str> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}
