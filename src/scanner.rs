//! Reads the new replies of one thread and dispatches their links.

use std::time::Duration;

use regex::RegexSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::browser::{load_page, BrowserError, BrowserSession};
use crate::config::SiteConfig;
use crate::error::SessionError;
use crate::fetch::{FetchError, Fetcher};
use crate::forum::{parse_thread, CompiledSelectors, ReplyParseError, ReplyRecord, Selectors, ThreadPage};
use crate::pacing::PaceState;
use crate::records::{DownloadMark, RecordLog, Severity};
use crate::resolver::{Outcome, Resolver};
use crate::tracker::{Diff, ReportedCount};

/// What to scan in one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRequest {
    pub thread_id: u64,
    pub delta: u32,
    pub is_new_thread: bool,
    /// Watermark before this visit; posts at or below it were already seen.
    pub previous_count: u32,
}

impl ScanRequest {
    pub fn from_diff(thread_id: u64, diff: &Diff) -> Self {
        Self {
            thread_id,
            delta: diff.delta,
            is_new_thread: diff.is_new_thread,
            previous_count: diff.previous_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanWindow {
    /// A thread that only has its opening post.
    HeadOnly,
    /// The last `take` rendered replies.
    Tail { take: usize },
}

pub fn plan_window(request: &ScanRequest) -> ScanWindow {
    if request.is_new_thread && request.delta == 1 {
        ScanWindow::HeadOnly
    } else {
        ScanWindow::Tail {
            take: request.delta as usize,
        }
    }
}

type Post = Result<ReplyRecord, ReplyParseError>;

/// Posts of `page` covered by `window`. The head is included when fewer
/// replies are rendered than requested; posts at or below the previous
/// watermark are dropped.
pub fn select_posts(page: &ThreadPage, window: ScanWindow, previous_count: u32) -> Vec<Post> {
    let mut posts: Vec<Post> = Vec::new();
    match window {
        ScanWindow::HeadOnly => posts.extend(page.head.clone()),
        ScanWindow::Tail { take } => {
            let rendered = page.replies.len();
            if rendered < take {
                posts.extend(page.head.clone());
            }
            posts.extend(page.replies[rendered.saturating_sub(take)..].iter().cloned());
        }
    }
    posts.retain(|post| match post {
        Ok(reply) => reply.ordinal > previous_count,
        Err(_) => true,
    });
    posts
}

/// Regex lists applied to reply text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentRules {
    /// Matching replies are logged but their links are not followed.
    pub ignore: Vec<String>,
    /// Matching replies go to the actionable log even without links.
    pub notable: Vec<String>,
}

impl Default for ContentRules {
    fn default() -> Self {
        Self {
            ignore: Vec::new(),
            notable: vec![
                r"(?i)\bpass(word)?\b".to_string(),
                r"(?i)\bpw\s*[:=]".to_string(),
                "비번".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentFilter {
    ignore: RegexSet,
    notable: RegexSet,
}

impl ContentFilter {
    pub fn new(rules: &ContentRules) -> Result<Self, regex::Error> {
        Ok(Self {
            ignore: RegexSet::new(&rules.ignore)?,
            notable: RegexSet::new(&rules.notable)?,
        })
    }

    pub fn is_ignored(&self, reply: &ReplyRecord) -> bool {
        self.ignore.is_match(&reply.plain_text())
            || reply.links.iter().any(|l| self.ignore.is_match(l))
    }

    pub fn is_notable(&self, reply: &ReplyRecord) -> bool {
        self.notable.is_match(&reply.plain_text())
    }
}

/// Counters for one thread visit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub thread_id: u64,
    pub scanned: usize,
    pub failed: usize,
    pub ignored: usize,
    pub notable: usize,
    pub links: usize,
    pub stored: usize,
    pub skipped: usize,
    pub fatal: usize,
    /// The thread page never rendered; see the page dump.
    pub unreadable: bool,
}

/// Split a fetch failure into session-ending and per-link.
fn escalate(err: FetchError) -> Result<FetchError, SessionError> {
    if !err.is_resource_failure() {
        return Ok(err);
    }
    Err(match err {
        FetchError::Io(e) => SessionError::Io(e),
        FetchError::Browser(e) => e.into(),
        other => SessionError::Io(std::io::Error::other(other.to_string())),
    })
}

pub struct ThreadScanner {
    site: SiteConfig,
    selectors: CompiledSelectors,
    thread_ready: String,
    page_timeout: Duration,
    filter: ContentFilter,
    resolver: Resolver,
    fetcher: Fetcher,
    records: RecordLog,
}

impl ThreadScanner {
    pub fn new(
        site: SiteConfig,
        selectors: &Selectors,
        page_timeout: Duration,
        filter: ContentFilter,
        resolver: Resolver,
        fetcher: Fetcher,
        records: RecordLog,
    ) -> Result<Self, String> {
        Ok(Self {
            site,
            selectors: selectors.compile()?,
            thread_ready: selectors.thread_ready.clone(),
            page_timeout,
            filter,
            resolver,
            fetcher,
            records,
        })
    }

    /// Visit one thread. Only session-level failures are returned as errors.
    pub async fn scan(
        &self,
        browser: &mut dyn BrowserSession,
        pace: &PaceState,
        request: ScanRequest,
    ) -> Result<ScanReport, SessionError> {
        let mut report = ScanReport {
            thread_id: request.thread_id,
            ..ScanReport::default()
        };
        let thread_url = self.site.thread_url(request.thread_id);
        let window = plan_window(&request);
        debug!("Scanning {} with {:?}", thread_url, window);

        let html = match load_page(browser, &thread_url, &self.thread_ready, self.page_timeout).await {
            Ok(html) => html,
            Err(BrowserError::Timeout { .. }) | Err(BrowserError::NotFound(_)) => {
                self.dump_unreadable(browser, &thread_url, request.thread_id).await?;
                report.unreadable = true;
                return Ok(report);
            }
            Err(e) => return Err(e.into()),
        };

        let posts = {
            let page = parse_thread(&html, request.thread_id, &self.selectors);
            self.check_totals(&page);
            select_posts(&page, window, request.previous_count)
        };

        for post in posts {
            match post {
                Ok(reply) => {
                    self.handle_reply(browser, pace, &thread_url, &reply, &mut report)
                        .await?
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("{}", e);
                    self.records
                        .activity(Severity::Error, &format!("{}\n{}", e, e.raw))
                        .await?;
                }
            }
        }

        info!(
            "Thread {}: {} replies, {} links, {} stored, {} skipped, {} failed",
            request.thread_id,
            report.scanned,
            report.links,
            report.stored,
            report.skipped,
            report.failed + report.fatal
        );
        Ok(report)
    }

    fn check_totals(&self, page: &ThreadPage) {
        let rendered = page.last_rendered_ordinal();
        if let (Some(ReportedCount::Count(displayed)), Some(rendered)) = (page.displayed_total, rendered) {
            if displayed != rendered {
                warn!(
                    "Thread {} displays {} replies but renders up to #{}; using the rendered list",
                    page.thread_id, displayed, rendered
                );
            }
        }
    }

    async fn dump_unreadable(
        &self,
        browser: &mut dyn BrowserSession,
        thread_url: &str,
        thread_id: u64,
    ) -> Result<(), SessionError> {
        error!("Thread container missing on {}", thread_url);
        let html = match browser.content().await {
            Ok(html) => html,
            Err(e) if e.is_crash() => return Err(e.into()),
            Err(e) => format!("<!-- page source unavailable: {} -->", e),
        };
        let dump = self
            .records
            .dump_page(&thread_id.to_string(), &format!("thread container missing on {}", thread_url), &html)
            .await?;
        self.records
            .activity(
                Severity::Error,
                &format!("Cannot scan {}: page dumped to {}", thread_url, dump.display()),
            )
            .await?;
        Ok(())
    }

    async fn handle_reply(
        &self,
        browser: &mut dyn BrowserSession,
        pace: &PaceState,
        thread_url: &str,
        reply: &ReplyRecord,
        report: &mut ScanReport,
    ) -> Result<(), SessionError> {
        report.scanned += 1;
        let text = reply.plain_text();
        let line = format!(
            "{}#{:03} [{}] {}",
            reply.thread_id,
            reply.ordinal,
            reply.author.as_deref().unwrap_or("-"),
            text
        );
        self.records.activity(Severity::Info, &line).await?;

        let notable = self.filter.is_notable(reply);
        if notable {
            report.notable += 1;
        }
        if notable || !reply.links.is_empty() {
            let mut entry = line.clone();
            for link in &reply.links {
                entry.push_str("\n\t");
                entry.push_str(link);
            }
            self.records.actionable(Severity::Info, &entry).await?;
        }

        if self.filter.is_ignored(reply) {
            debug!("Ignoring links of {}#{}", reply.thread_id, reply.ordinal);
            report.ignored += 1;
            return Ok(());
        }

        for link in &reply.links {
            report.links += 1;
            self.dispatch(browser, pace, thread_url, reply, link, report)
                .await?;
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        browser: &mut dyn BrowserSession,
        pace: &PaceState,
        thread_url: &str,
        reply: &ReplyRecord,
        link: &str,
        report: &mut ScanReport,
    ) -> Result<(), SessionError> {
        let outcome = self
            .resolver
            .resolve(browser, link, reply.thread_id, reply.ordinal)
            .await?;

        let target = match outcome {
            Outcome::Target(target) => target,
            Outcome::Skip(reason) => {
                report.skipped += 1;
                let source = format!("{} ({})", link, reason);
                self.records
                    .download(DownloadMark::Missing, pace, thread_url, reply.ordinal, &source)
                    .await?;
                return Ok(());
            }
            Outcome::Fatal(reason) => {
                report.fatal += 1;
                let message = format!("{}#{:03} {}: {}", reply.thread_id, reply.ordinal, link, reason);
                self.records.actionable(Severity::Error, &message).await?;
                self.records
                    .download(DownloadMark::Missing, pace, thread_url, reply.ordinal, link)
                    .await?;
                return Ok(());
            }
        };

        match self.fetcher.fetch(browser, &target).await {
            Ok(fetched) => {
                for file in &fetched.files {
                    report.stored += 1;
                    self.records
                        .download(DownloadMark::Stored, pace, thread_url, reply.ordinal, link)
                        .await?;
                    self.records
                        .actionable(Severity::Info, &file.display().to_string())
                        .await?;
                }
            }
            Err(err) => {
                let err = escalate(err)?;
                warn!("Download of {} failed: {}", link, err);
                let mark = if err.salvaged() > 0 {
                    report.stored += err.salvaged();
                    DownloadMark::Salvaged
                } else {
                    report.skipped += 1;
                    DownloadMark::Missing
                };
                let source = format!("{} ({})", link, err);
                self.records
                    .download(mark, pace, thread_url, reply.ordinal, &source)
                    .await?;
            }
        }
        Ok(())
    }
}
