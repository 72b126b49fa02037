//! Chromium-backed browser session (feature `browser`).

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{BrowserError, BrowserLauncher, BrowserResult, BrowserSession};

/// Interval between selector checks while waiting.
const WAIT_POLL: Duration = Duration::from_millis(250);

fn map_cdp(err: CdpError) -> BrowserError {
    match err {
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => {
            BrowserError::Crashed(err.to_string())
        }
        CdpError::Timeout => BrowserError::Timeout {
            what: "browser response".to_string(),
            after: Duration::ZERO,
        },
        other => BrowserError::Protocol(other.to_string()),
    }
}

/// Launch options for [`ChromiumLauncher`].
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    pub headless: bool,
    /// Native downloads land here.
    pub download_dir: PathBuf,
    /// Navigation timeout.
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> BrowserResult<Box<dyn BrowserSession>> {
        let session = ChromiumSession::launch(self).await?;
        Ok(Box::new(session))
    }
}

/// A single Chromium tab plus the CDP handler task that drives it.
pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    timeout: Duration,
}

impl ChromiumSession {
    pub async fn launch(options: &ChromiumLauncher) -> BrowserResult<Self> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(options.timeout)
            .arg("--disable-gpu");
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(ref ua) = options.user_agent {
            builder = builder.arg(format!("--user-agent={}", ua));
        }
        let config = builder.build().map_err(BrowserError::Protocol)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(map_cdp)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler stopped: {}", e);
                    break;
                }
            }
        });

        let download_behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(options.download_dir.to_string_lossy().to_string())
            .build()
            .map_err(BrowserError::Protocol)?;
        browser.execute(download_behavior).await.map_err(map_cdp)?;

        let page = browser.new_page("about:blank").await.map_err(map_cdp)?;
        debug!(
            "Browser launched (headless={}, downloads -> {})",
            options.headless,
            options.download_dir.display()
        );

        Ok(Self {
            browser,
            page,
            handler,
            timeout: options.timeout,
        })
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        match tokio::time::timeout(self.timeout, self.page.goto(url)).await {
            Ok(result) => result.map(|_| ()).map_err(map_cdp),
            Err(_) => Err(BrowserError::Timeout {
                what: url.to_string(),
                after: self.timeout,
            }),
        }
    }

    async fn content(&mut self) -> BrowserResult<String> {
        self.page.content().await.map_err(map_cdp)
    }

    async fn exists(&mut self, selector: &str) -> BrowserResult<bool> {
        match self.page.find_elements(selector).await {
            Ok(elements) => Ok(!elements.is_empty()),
            Err(e) => match map_cdp(e) {
                BrowserError::Crashed(msg) => Err(BrowserError::Crashed(msg)),
                _ => Ok(false),
            },
        }
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> BrowserResult<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.exists(selector).await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    async fn fill(&mut self, selector: &str, text: &str) -> BrowserResult<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::NotFound(selector.to_string()))?;
        element
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .map_err(map_cdp)?;
        element.click().await.map_err(map_cdp)?;
        element.type_str(text).await.map_err(map_cdp)?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> BrowserResult<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::NotFound(selector.to_string()))?;
        element.click().await.map_err(map_cdp)?;
        Ok(())
    }

    async fn close(&mut self) -> BrowserResult<()> {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser cleanly: {}", e);
        }
        self.handler.abort();
        Ok(())
    }
}
