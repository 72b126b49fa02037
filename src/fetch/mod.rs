//! Stores resolved targets on disk.
//!
//! Direct targets are streamed over HTTP and synced chunk by chunk. Browser
//! targets are started by clicking the trigger on the page the resolver left
//! open, then detected in the scratch directory by [`wait_for_completion`].

mod convert;
mod poll;

pub use convert::{is_webp, normalize_image};
pub use poll::{
    wait_for_completion, DownloadPolicy, ScratchDir, Snapshot, SnapshotSource, WaitOutcome,
};

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::browser::{BrowserError, BrowserSession};
use crate::http::HttpClient;
use crate::resolver::{normalize_name, DownloadTarget, FetchPlan};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("download stalled after {polls} polls ({salvaged} files salvaged)")]
    Stalled { polls: u32, salvaged: usize },

    #[error("download unfinished after {waited:?} ({salvaged} files salvaged)")]
    TimedOut { waited: Duration, salvaged: usize },
}

impl FetchError {
    /// Failures of shared resources that should end the session.
    pub fn is_resource_failure(&self) -> bool {
        match self {
            FetchError::Io(_) => true,
            FetchError::Browser(e) => e.is_crash(),
            _ => false,
        }
    }

    /// Files moved into the destination despite the failure.
    pub fn salvaged(&self) -> usize {
        match self {
            FetchError::Stalled { salvaged, .. } | FetchError::TimedOut { salvaged, .. } => {
                *salvaged
            }
            _ => 0,
        }
    }
}

/// Files written for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub files: Vec<PathBuf>,
    pub bytes: u64,
}

/// Rename, falling back to copy + remove across filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

pub struct Fetcher {
    http: HttpClient,
    destination: PathBuf,
    scratch: ScratchDir,
    policy: DownloadPolicy,
}

impl Fetcher {
    pub fn new(
        http: HttpClient,
        destination: impl Into<PathBuf>,
        scratch: impl Into<PathBuf>,
        policy: DownloadPolicy,
    ) -> Self {
        let scratch = ScratchDir::new(scratch, &policy.in_progress_suffix);
        Self {
            http,
            destination: destination.into(),
            scratch,
            policy,
        }
    }

    pub async fn fetch(
        &self,
        browser: &mut dyn BrowserSession,
        target: &DownloadTarget,
    ) -> Result<Fetched, FetchError> {
        let fetched = match &target.plan {
            FetchPlan::Direct { url } => {
                let path = self.destination.join(&target.local_filename);
                let bytes = self.fetch_direct(url, &path).await?;
                Fetched {
                    files: vec![path],
                    bytes,
                }
            }
            FetchPlan::BrowserDownload { trigger } => {
                self.fetch_browser(browser, trigger, &target.local_filename)
                    .await?
            }
        };

        let mut files = Vec::with_capacity(fetched.files.len());
        for file in fetched.files {
            files.push(normalize_image(file).await);
        }
        Ok(Fetched {
            files,
            bytes: fetched.bytes,
        })
    }

    /// Stream `url` into `path`, syncing every chunk. A partial file is
    /// removed when the transfer fails.
    async fn fetch_direct(&self, url: &str, path: &Path) -> Result<u64, FetchError> {
        let response = self.http.get(url).await?;
        let mut file = File::create(path).await?;

        match self.stream_into(response, &mut file).await {
            Ok(bytes) => {
                debug!("Stored {} bytes from {} at {}", bytes, url, path.display());
                Ok(bytes)
            }
            Err(e) => {
                drop(file);
                if let Err(remove) = tokio::fs::remove_file(path).await {
                    warn!("Could not remove partial {}: {}", path.display(), remove);
                }
                Err(e)
            }
        }
    }

    async fn stream_into(
        &self,
        response: reqwest::Response,
        file: &mut File,
    ) -> Result<u64, FetchError> {
        let chunk_size = self.policy.chunk_size.max(1);
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(item) = stream.next().await {
            let bytes = item?;
            for chunk in bytes.chunks(chunk_size) {
                file.write_all(chunk).await?;
                file.flush().await?;
                file.sync_data().await?;
                written += chunk.len() as u64;
            }
        }
        Ok(written)
    }

    async fn fetch_browser(
        &self,
        browser: &mut dyn BrowserSession,
        trigger: &str,
        prefix: &str,
    ) -> Result<Fetched, FetchError> {
        self.scratch.clear().await?;
        browser.click(trigger).await?;

        let mut scratch = self.scratch.clone();
        match wait_for_completion(&mut scratch, &self.policy).await? {
            WaitOutcome::Complete { polls, bytes } => {
                let files = self.collect(prefix).await?;
                info!(
                    "Browser download finished after {} polls: {} files, {} bytes",
                    polls,
                    files.len(),
                    bytes
                );
                Ok(Fetched { files, bytes })
            }
            WaitOutcome::Stalled { polls } => {
                let salvaged = self.collect(prefix).await?.len();
                Err(FetchError::Stalled { polls, salvaged })
            }
            WaitOutcome::TimedOut { waited, .. } => {
                let salvaged = self.collect(prefix).await?.len();
                Err(FetchError::TimedOut { waited, salvaged })
            }
        }
    }

    /// Move finished scratch files into the destination under `prefix` and
    /// drop in-progress leftovers.
    async fn collect(&self, prefix: &str) -> Result<Vec<PathBuf>, FetchError> {
        let mut moved = Vec::new();
        for file in self.scratch.files().await? {
            if self.scratch.is_in_progress(&file) {
                debug!("Removing unfinished {}", file.display());
                tokio::fs::remove_file(&file).await?;
                continue;
            }
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .map(normalize_name)
                .unwrap_or_else(|| "download".to_string());
            let target = self.destination.join(format!("{}{}", prefix, name));
            move_file(&file, &target).await?;
            moved.push(target);
        }
        Ok(moved)
    }
}
