//! Browser session abstraction.
//!
//! The forum and the gated storage host are only reachable through a real
//! browser, so every page interaction goes through [`BrowserSession`]. There
//! is exactly one session per crawl session and it is borrowed mutably by
//! whoever is driving it, which keeps two navigations from ever interleaving.

#[cfg(feature = "browser")]
mod chromium;
#[cfg(test)]
pub(crate) mod fake;

#[cfg(feature = "browser")]
pub use chromium::{ChromiumLauncher, ChromiumSession};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a browser session.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("element not found: {0}")]
    NotFound(String),

    #[error("browser process lost: {0}")]
    Crashed(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),
}

impl BrowserError {
    /// Whether the session is unusable after this error.
    pub fn is_crash(&self) -> bool {
        matches!(self, BrowserError::Crashed(_))
    }
}

pub type BrowserResult<T> = std::result::Result<T, BrowserError>;

/// A single browser tab driven by CSS selectors.
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigate and wait for the load event.
    async fn goto(&mut self, url: &str) -> BrowserResult<()>;

    /// Serialized DOM of the current page.
    async fn content(&mut self) -> BrowserResult<String>;

    /// Whether `selector` currently matches anything.
    async fn exists(&mut self, selector: &str) -> BrowserResult<bool>;

    /// Wait until `selector` matches or `timeout` elapses.
    /// Returns `Ok(false)` on timeout.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> BrowserResult<bool>;

    /// Clear an input and type `text` into it.
    async fn fill(&mut self, selector: &str, text: &str) -> BrowserResult<()>;

    async fn click(&mut self, selector: &str) -> BrowserResult<()>;

    async fn close(&mut self) -> BrowserResult<()>;
}

/// Starts fresh browser sessions for the scheduler.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> BrowserResult<Box<dyn BrowserSession>>;
}

/// Navigate to `url`, wait for `ready_selector`, and return the page HTML.
pub async fn load_page(
    browser: &mut dyn BrowserSession,
    url: &str,
    ready_selector: &str,
    timeout: Duration,
) -> BrowserResult<String> {
    browser.goto(url).await?;
    if !browser.wait_for(ready_selector, timeout).await? {
        return Err(BrowserError::Timeout {
            what: format!("{} on {}", ready_selector, url),
            after: timeout,
        });
    }
    browser.content().await
}
