//! Completion detection for downloads started by a browser click.
//!
//! The browser gives no completion signal, so the scratch directory is
//! sampled at a fixed interval until its total size stops changing and no
//! in-progress file is left.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadPolicy {
    pub poll_interval_ms: u64,
    /// Consecutive polls without progress before giving up.
    pub max_stalls: u32,
    pub max_wait_secs: u64,
    /// Suffix the browser gives files still being written.
    pub in_progress_suffix: String,
    /// Write size for streamed downloads.
    pub chunk_size: usize,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            max_stalls: 12,
            max_wait_secs: 280,
            in_progress_suffix: ".crdownload".to_string(),
            chunk_size: 8 * 1024,
        }
    }
}

impl DownloadPolicy {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

/// One reading of the download directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub total_bytes: u64,
    pub in_progress: bool,
}

#[async_trait]
pub trait SnapshotSource: Send {
    async fn snapshot(&mut self) -> std::io::Result<Snapshot>;
}

/// Directory the browser downloads into.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    path: PathBuf,
    in_progress_suffix: String,
}

impl ScratchDir {
    pub fn new(path: impl Into<PathBuf>, in_progress_suffix: &str) -> Self {
        Self {
            path: path.into(),
            in_progress_suffix: in_progress_suffix.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_in_progress(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(&self.in_progress_suffix))
            .unwrap_or(false)
    }

    /// Regular files currently in the directory, sorted by name.
    pub async fn files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.path).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Remove everything so the next download starts from an empty directory.
    pub async fn clear(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.path).await?;
        for file in self.files().await? {
            tokio::fs::remove_file(file).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotSource for ScratchDir {
    async fn snapshot(&mut self) -> std::io::Result<Snapshot> {
        let mut snapshot = Snapshot {
            total_bytes: 0,
            in_progress: false,
        };
        for file in self.files().await? {
            // The browser renames a part file when it finishes
            let len = match tokio::fs::metadata(&file).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            snapshot.total_bytes += len;
            if self.is_in_progress(&file) {
                snapshot.in_progress = true;
            }
        }
        Ok(snapshot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Complete { polls: u32, bytes: u64 },
    Stalled { polls: u32 },
    TimedOut { polls: u32, waited: Duration },
}

/// Poll `source` until the download settles, stalls, or runs out of time.
///
/// A download is complete on the first reading that repeats the previous
/// non-zero total with no in-progress file present.
pub async fn wait_for_completion<S: SnapshotSource>(
    source: &mut S,
    policy: &DownloadPolicy,
) -> std::io::Result<WaitOutcome> {
    let started = Instant::now();
    let mut previous: Option<u64> = None;
    let mut stalls = 0u32;
    let mut polls = 0u32;

    loop {
        let reading = source.snapshot().await?;
        polls += 1;
        debug!(
            "Download poll {}: {} bytes{}",
            polls,
            reading.total_bytes,
            if reading.in_progress { " (in progress)" } else { "" }
        );

        let unchanged = previous == Some(reading.total_bytes);
        if unchanged && reading.total_bytes > 0 && !reading.in_progress {
            return Ok(WaitOutcome::Complete {
                polls,
                bytes: reading.total_bytes,
            });
        }

        if unchanged {
            stalls += 1;
            if stalls >= policy.max_stalls {
                return Ok(WaitOutcome::Stalled { polls });
            }
        } else {
            stalls = 0;
        }
        previous = Some(reading.total_bytes);

        let waited = started.elapsed();
        if waited + policy.poll_interval() > policy.max_wait() {
            return Ok(WaitOutcome::TimedOut { polls, waited });
        }
        tokio::time::sleep(policy.poll_interval()).await;
    }
}
