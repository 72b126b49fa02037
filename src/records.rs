//! Append-only audit records.
//!
//! Diagnostics go through `tracing`; these files are the durable trail of
//! what the agent saw and did. Each line is
//! `<timestamp>\t<severity>\t<message>`.

use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::pacing::PaceState;

const ACTIVITY_LOG: &str = "activity.log";
const ACTIONABLE_LOG: &str = "actionable.log";
const DOWNLOAD_LOG: &str = "downloads.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

/// Result marker used in download records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadMark {
    /// File stored.
    Stored,
    /// Asset gone or not downloadable.
    Missing,
    /// Leftover file moved out of the scratch directory.
    Salvaged,
}

impl DownloadMark {
    fn as_str(&self) -> &'static str {
        match self {
            DownloadMark::Stored => "[ V ]",
            DownloadMark::Missing => "[ - ]",
            DownloadMark::Salvaged => "[ / ]",
        }
    }
}

/// Writer for the record files under one directory.
#[derive(Debug, Clone)]
pub struct RecordLog {
    dir: PathBuf,
}

impl RecordLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn append(&self, file: &str, severity: Severity, message: &str) -> std::io::Result<()> {
        let line = format!(
            "{}\t{}\t{}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            severity.as_str(),
            message
        );
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))
            .await?;
        handle.write_all(line.as_bytes()).await?;
        handle.flush().await
    }

    /// Every reply the scanner looked at.
    pub async fn activity(&self, severity: Severity, message: &str) -> std::io::Result<()> {
        self.append(ACTIVITY_LOG, severity, message).await
    }

    /// Replies worth a human look (links or notable text).
    pub async fn actionable(&self, severity: Severity, message: &str) -> std::io::Result<()> {
        self.append(ACTIONABLE_LOG, severity, message).await
    }

    /// One line per download attempt, with the pauses that preceded it.
    pub async fn download(
        &self,
        mark: DownloadMark,
        pace: &PaceState,
        thread_url: &str,
        reply: u32,
        source: &str,
    ) -> std::io::Result<()> {
        let arrow = if mark == DownloadMark::Missing { "-!->" } else { "->" };
        let message = format!(
            "{} <- {:.0}\" \t<- {:.0}\"\t: {} #{}  \t{}\t{}",
            mark.as_str(),
            pace.previous_pause,
            pace.previous_previous_pause,
            thread_url,
            reply,
            arrow,
            source
        );
        let severity = match mark {
            DownloadMark::Missing => Severity::Warn,
            _ => Severity::Info,
        };
        self.append(DOWNLOAD_LOG, severity, &message).await
    }

    /// Append a page dump to `dump-<name>.html` for manual diagnosis.
    pub async fn dump_page(&self, name: &str, context: &str, html: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.join(format!("dump-{}.html", name));
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let header = format!(
            "<!-- {} {} -->\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            context
        );
        handle.write_all(header.as_bytes()).await?;
        handle.write_all(html.as_bytes()).await?;
        handle.write_all(b"\n").await?;
        handle.flush().await?;
        Ok(path)
    }
}
