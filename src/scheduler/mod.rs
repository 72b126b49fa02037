//! The crawl control loop.
//!
//! A session logs in, then repeats index cycles: load the thread index, diff
//! every thread against the tracker, scan the threads that grew, and sleep
//! for a pause adapted to how many new replies turned up. Sessions end after
//! a randomly drawn number of cycles (extended while the board is busy) or
//! on a session-level error, followed by a cooldown.

mod context;

pub use context::{SchedulerContext, SessionConfig, SessionState};

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::browser::{load_page, BrowserError, BrowserLauncher, BrowserSession};
use crate::config::{Credentials, Settings, SiteConfig};
use crate::error::{CooldownKind, SessionError};
use crate::fetch::Fetcher;
use crate::forum::{parse_index, CompiledSelectors, Selectors};
use crate::http::HttpClient;
use crate::pacing::{PacingConfig, PauseDecision};
use crate::records::{RecordLog, Severity};
use crate::resolver::{HostRegistry, Resolver};
use crate::scanner::{ContentFilter, ScanRequest, ThreadScanner};
use crate::tracker::ReplyTracker;

/// What one index cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub threads: usize,
    pub threads_scanned: usize,
    pub new_replies: u32,
    pub elapsed: Duration,
    pub pause: PauseDecision,
}

/// Replies per ten seconds over the scan time plus the pause before it.
pub fn reply_rate(new_replies: u32, elapsed: Duration, previous_pause: f64) -> f64 {
    let window = elapsed.as_secs_f64() + previous_pause;
    if window > 0.0 {
        10.0 * new_replies as f64 / window
    } else {
        0.0
    }
}

pub struct Scheduler {
    launcher: Arc<dyn BrowserLauncher>,
    tracker: ReplyTracker,
    scanner: ThreadScanner,
    site: SiteConfig,
    credentials: Option<Credentials>,
    selectors: Selectors,
    compiled: CompiledSelectors,
    pacing: PacingConfig,
    session: SessionConfig,
    page_timeout: Duration,
    retention: Duration,
    records: RecordLog,
}

impl Scheduler {
    /// Wire every component from resolved settings.
    pub fn from_settings(
        settings: &Settings,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Result<Self, SessionError> {
        settings.validate().map_err(SessionError::Config)?;
        settings.ensure_directories()?;

        let http = HttpClient::new(
            &settings.user_agent,
            Duration::from_secs(settings.request_timeout),
        )
        .map_err(SessionError::Config)?;
        let records = RecordLog::new(&settings.log_dir);
        let registry = HostRegistry::from_config(
            &settings.hosts,
            Arc::clone(&settings.symbol_alphabet),
            settings.backup_dir.clone(),
            settings.destination_dir.clone(),
            Arc::clone(&settings.password_candidates),
        )
        .map_err(SessionError::Config)?;
        let resolver = Resolver::new(http.clone(), registry, records.clone());
        let fetcher = Fetcher::new(
            http,
            &settings.destination_dir,
            &settings.scratch_dir,
            settings.download.clone(),
        );
        let filter = ContentFilter::new(&settings.content)
            .map_err(|e| SessionError::Config(e.to_string()))?;
        let page_timeout = Duration::from_secs(settings.page_timeout_secs);
        let scanner = ThreadScanner::new(
            settings.site.clone(),
            &settings.selectors,
            page_timeout,
            filter,
            resolver,
            fetcher,
            records.clone(),
        )
        .map_err(SessionError::Config)?;
        let tracker = ReplyTracker::open(&settings.database_path())?
            .with_finished_sentinel(settings.finished_sentinel);

        Ok(Self {
            launcher,
            tracker,
            scanner,
            site: settings.site.clone(),
            credentials: settings.credentials.clone(),
            compiled: settings.selectors.compile().map_err(SessionError::Config)?,
            selectors: settings.selectors.clone(),
            pacing: settings.pacing.clone(),
            session: settings.session.clone(),
            page_timeout,
            retention: settings.retention(),
            records,
        })
    }

    pub fn tracker(&self) -> &ReplyTracker {
        &self.tracker
    }

    /// Sessions and cooldowns, forever.
    pub async fn run_forever(&self, ctx: &mut SchedulerContext) {
        loop {
            let kind = match self.run_session(ctx).await {
                Ok(cycles) => {
                    info!("Session finished after {} cycles", cycles);
                    self.collect_garbage();
                    CooldownKind::Short
                }
                Err(e) => {
                    error!("Session aborted: {}", e);
                    if let Err(log_err) = self
                        .records
                        .activity(Severity::Error, &format!("Session aborted: {}", e))
                        .await
                    {
                        warn!("Cannot write activity record: {}", log_err);
                    }
                    e.cooldown()
                }
            };
            let pause = ctx.cooldown(&self.session, kind);
            info!("Cooling down ({:?}) for {:.0}s", kind, pause.as_secs_f64());
            tokio::time::sleep(pause).await;
        }
    }

    /// Remove watermarks past the retention window.
    pub fn collect_garbage(&self) -> u64 {
        match self.tracker.delete_expired(self.retention) {
            Ok(removed) => {
                info!("Removed {} expired thread watermarks", removed);
                removed
            }
            Err(e) => {
                warn!("Watermark cleanup failed: {}", e);
                0
            }
        }
    }

    /// One browser session. Returns the number of cycles run.
    pub async fn run_session(&self, ctx: &mut SchedulerContext) -> Result<u32, SessionError> {
        ctx.begin_session(&self.session);
        info!("Starting session with {} planned cycles", ctx.planned_cycles);

        let mut browser = self.launcher.launch().await?;
        let result = self.drive(browser.as_mut(), ctx).await;
        if let Err(e) = browser.close().await {
            debug!("Browser close failed: {}", e);
        }
        result
    }

    async fn drive(
        &self,
        browser: &mut dyn BrowserSession,
        ctx: &mut SchedulerContext,
    ) -> Result<u32, SessionError> {
        ctx.session.authenticated = self.login(browser).await?;

        loop {
            let report = self.run_cycle(browser, ctx).await?;
            ctx.cycles_run += 1;
            if !ctx.should_continue(&self.session, report.pause.fluctuated) {
                return Ok(ctx.cycles_run);
            }
            tokio::time::sleep(Duration::from_secs_f64(report.pause.fluctuated)).await;
        }
    }

    /// Submit the three-field login form. Returns false when no credentials
    /// are configured.
    pub async fn login(&self, browser: &mut dyn BrowserSession) -> Result<bool, SessionError> {
        let Some(credentials) = &self.credentials else {
            warn!("No credentials configured, browsing anonymously");
            return Ok(false);
        };

        let attempt = async {
            browser.goto(&self.site.login_url()).await?;
            browser
                .fill(&self.selectors.login_email, &credentials.email)
                .await?;
            browser
                .fill(&self.selectors.login_password, &credentials.password)
                .await?;
            browser.click(&self.selectors.login_submit).await?;
            browser
                .wait_for(&self.selectors.logged_in, self.page_timeout)
                .await
        };

        match attempt.await {
            Ok(true) => {
                info!("Login successful");
                Ok(true)
            }
            Ok(false) => Err(SessionError::Login(format!(
                "{} did not appear after submitting the form",
                self.selectors.logged_in
            ))),
            Err(BrowserError::Crashed(reason)) => {
                Err(SessionError::Browser(BrowserError::Crashed(reason)))
            }
            Err(e) => Err(SessionError::Login(e.to_string())),
        }
    }

    /// Index, diff, scan, pace.
    pub async fn run_cycle(
        &self,
        browser: &mut dyn BrowserSession,
        ctx: &mut SchedulerContext,
    ) -> Result<CycleReport, SessionError> {
        let started = Instant::now();
        let html = load_page(
            browser,
            &self.site.board_url(),
            &self.selectors.thread_list_item,
            self.page_timeout,
        )
        .await?;
        let entries = parse_index(&html, &self.compiled);

        let mut new_replies = 0u32;
        let mut threads_scanned = 0usize;
        for entry in &entries {
            if ctx.session.finished_thread_ids.contains(&entry.thread_id) {
                continue;
            }
            let diff = self.tracker.diff(entry.thread_id, entry.count)?;
            if entry.count.is_finished() {
                ctx.session.finished_thread_ids.insert(entry.thread_id);
            }
            if diff.delta == 0 {
                continue;
            }

            let request = ScanRequest::from_diff(entry.thread_id, &diff);
            self.scanner.scan(browser, &ctx.pace, request).await?;
            threads_scanned += 1;
            new_replies = new_replies.saturating_add(diff.delta);
        }

        let elapsed = started.elapsed();
        let previous_pause = ctx.pace.previous_pause;
        let pause = ctx.pace.next(&self.pacing, new_replies, &mut ctx.rng);

        info!(
            "{:.1}({:.1})\t{} new\t: {:.1}\t-> {:.0}({:.0})",
            elapsed.as_secs_f64() + previous_pause,
            elapsed.as_secs_f64(),
            new_replies,
            reply_rate(new_replies, elapsed, previous_pause),
            pause.actual,
            pause.fluctuated
        );

        Ok(CycleReport {
            threads: entries.len(),
            threads_scanned,
            new_replies,
            elapsed,
            pause,
        })
    }
}
