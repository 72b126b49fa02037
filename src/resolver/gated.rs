//! Temporary file storage behind an optional password form. Only reachable
//! through the browser; the download itself is a native browser download.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::{
    browser_failure, normalize_domain, DownloadTarget, FetchPlan, HostStrategy, Outcome,
    ResolveEnv, ResolveError, ResolveRequest,
};
use crate::forum::compile;

/// Selectors on the storage host's download page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatedPage {
    pub password_input: String,
    pub password_submit: String,
    pub trigger: String,
    pub expired: String,
    pub delete_prompt: String,
    /// How long to wait for the trigger after each password submission.
    pub password_timeout_secs: u64,
}

impl Default for GatedPage {
    fn default() -> Self {
        Self {
            password_input: "#password".to_string(),
            password_submit: "body > div:nth-of-type(1) > div > form > p > input".to_string(),
            trigger: "body > div:nth-of-type(2) > div > p > a".to_string(),
            expired: "div#expired > p.notice".to_string(),
            delete_prompt: "div#delete > p.delete".to_string(),
            password_timeout_secs: 3,
        }
    }
}

pub struct GatedStorage {
    page: GatedPage,
    passwords: Arc<Vec<String>>,
}

impl GatedStorage {
    /// Fails if any configured selector does not parse.
    pub fn new(page: GatedPage, passwords: Arc<Vec<String>>) -> Result<Self, String> {
        for (field, css) in [
            ("password_input", &page.password_input),
            ("password_submit", &page.password_submit),
            ("trigger", &page.trigger),
            ("expired", &page.expired),
            ("delete_prompt", &page.delete_prompt),
        ] {
            compile(field, css)?;
        }
        Ok(Self { page, passwords })
    }

    /// Try each candidate until the trigger shows up.
    async fn unlock(&self, env: &mut ResolveEnv<'_>) -> Result<bool, crate::browser::BrowserError> {
        let timeout = Duration::from_secs(self.page.password_timeout_secs);
        for (attempt, password) in self.passwords.iter().enumerate() {
            env.browser.fill(&self.page.password_input, password).await?;
            env.browser.click(&self.page.password_submit).await?;
            if env.browser.wait_for(&self.page.trigger, timeout).await? {
                info!("Password candidate {} accepted", attempt + 1);
                return Ok(true);
            }
            debug!("Password candidate {} rejected", attempt + 1);
        }
        Ok(false)
    }
}

/// Storage pages that never lead to a file.
fn is_service_page(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let path = parsed.path().trim_matches('/');
    path.is_empty() || path.starts_with("success") || path.starts_with("delete")
}

#[async_trait]
impl HostStrategy for GatedStorage {
    fn tag(&self) -> &'static str {
        "gated"
    }

    async fn resolve(
        &self,
        request: &ResolveRequest<'_>,
        env: &mut ResolveEnv<'_>,
    ) -> Result<Outcome, ResolveError> {
        if is_service_page(request.url) {
            return Ok(Outcome::Skip(format!("not a download page: {}", request.url)));
        }
        let domain = normalize_domain(request.url).unwrap_or_default();
        let label = domain.split('.').next().unwrap_or("gated").to_string();

        if let Err(e) = env.browser.goto(request.url).await {
            return browser_failure(e, request.url);
        }

        let gated = match env.browser.exists(&self.page.password_input).await {
            Ok(found) => found,
            Err(e) => return browser_failure(e, request.url),
        };

        if gated {
            match self.unlock(env).await {
                Ok(true) => {}
                Ok(false) => {
                    return Ok(Outcome::Fatal("cannot locate download trigger".to_string()))
                }
                Err(e) => return browser_failure(e, request.url),
            }
        } else {
            let has_trigger = match env.browser.exists(&self.page.trigger).await {
                Ok(found) => found,
                Err(e) => return browser_failure(e, request.url),
            };
            if !has_trigger {
                let expired = env.browser.exists(&self.page.expired).await.unwrap_or(false);
                if expired {
                    return Ok(Outcome::Skip("link expired".to_string()));
                }
                let prompt = env
                    .browser
                    .exists(&self.page.delete_prompt)
                    .await
                    .unwrap_or(false);
                if prompt {
                    return Ok(Outcome::Fatal("deletion confirmation prompt".to_string()));
                }
                let html = match env.browser.content().await {
                    Ok(html) => html,
                    Err(e) => return browser_failure(e, request.url),
                };
                env.records
                    .dump_page(
                        &request.thread_id.to_string(),
                        &format!("no download trigger on {}", request.url),
                        &html,
                    )
                    .await?;
                return Ok(Outcome::Fatal("cannot locate download trigger".to_string()));
            }
        }

        Ok(Outcome::Target(DownloadTarget {
            plan: FetchPlan::BrowserDownload {
                trigger: self.page.trigger.clone(),
            },
            local_filename: format!("{}-{}-{:03}-", label, request.thread_id, request.reply),
            strategy_tag: "gated",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;
    use crate::http::{HttpClient, USER_AGENT};
    use crate::records::RecordLog;

    const URL: &str = "https://tmpstorage.com/f/abc123";

    const LOCKED: &str = r#"<html><body>
        <div><div><form><p><input id="password" type="password"></p><p><input type="submit"></p></form></div></div>
        </body></html>"#;

    const UNLOCKED: &str = r#"<html><body>
        <div><div>file.zip</div></div>
        <div><div><p><a href="/dl/abc123">Download</a></p></div></div>
        </body></html>"#;

    fn passwords(list: &[&str]) -> Arc<Vec<String>> {
        Arc::new(list.iter().map(|s| s.to_string()).collect())
    }

    async fn run(strategy: &GatedStorage, browser: &mut FakeBrowser, url: &str) -> Outcome {
        let dir = tempfile::tempdir().unwrap();
        let http = HttpClient::new(USER_AGENT, Duration::from_secs(5)).unwrap();
        let records = RecordLog::new(dir.path());
        let mut env = ResolveEnv {
            http: &http,
            browser,
            records: &records,
        };
        let request = ResolveRequest {
            url,
            thread_id: 42,
            reply: 7,
        };
        strategy.resolve(&request, &mut env).await.unwrap()
    }

    fn submit_selector() -> String {
        // The locked fixture puts the submit button in the second <p>
        "body > div:nth-of-type(1) > div > form > p:nth-of-type(2) > input".to_string()
    }

    fn page() -> GatedPage {
        GatedPage {
            password_submit: submit_selector(),
            ..GatedPage::default()
        }
    }

    #[tokio::test]
    async fn test_all_passwords_fail() {
        let page = page();
        let strategy =
            GatedStorage::new(page.clone(), passwords(&["one", "two", "three"])).unwrap();
        let mut browser = FakeBrowser::new()
            .with_page(URL, LOCKED)
            .with_password_gate(&page.password_input, &page.password_submit, "secret", UNLOCKED);

        let outcome = run(&strategy, &mut browser, URL).await;
        assert_eq!(outcome, Outcome::Fatal("cannot locate download trigger".to_string()));
        assert_eq!(browser.clicks(&page.password_submit), 3);
        assert_eq!(browser.clicks(&page.trigger), 0);
    }

    #[tokio::test]
    async fn test_second_password_unlocks() {
        let page = page();
        let strategy =
            GatedStorage::new(page.clone(), passwords(&["one", "secret", "three"])).unwrap();
        let mut browser = FakeBrowser::new()
            .with_page(URL, LOCKED)
            .with_password_gate(&page.password_input, &page.password_submit, "secret", UNLOCKED);

        let outcome = run(&strategy, &mut browser, URL).await;
        assert_eq!(
            outcome,
            Outcome::Target(DownloadTarget {
                plan: FetchPlan::BrowserDownload {
                    trigger: page.trigger.clone()
                },
                local_filename: "tmpstorage-42-007-".to_string(),
                strategy_tag: "gated",
            })
        );
        assert_eq!(browser.clicks(&page.password_submit), 2);
        assert!(!browser.actions.iter().any(|a| a.contains("three")));
    }

    #[tokio::test]
    async fn test_open_page_with_trigger() {
        let strategy = GatedStorage::new(GatedPage::default(), passwords(&[])).unwrap();
        let mut browser = FakeBrowser::new().with_page(URL, UNLOCKED);
        let outcome = run(&strategy, &mut browser, URL).await;
        assert!(matches!(outcome, Outcome::Target(_)));
    }

    #[tokio::test]
    async fn test_expired_and_delete_pages() {
        let strategy = GatedStorage::new(GatedPage::default(), passwords(&[])).unwrap();

        let mut browser = FakeBrowser::new().with_page(
            URL,
            r#"<div id="expired"><p class="notice">gone</p></div>"#,
        );
        assert_eq!(
            run(&strategy, &mut browser, URL).await,
            Outcome::Skip("link expired".to_string())
        );

        let mut browser = FakeBrowser::new().with_page(
            URL,
            r#"<div id="delete"><p class="delete">really?</p></div>"#,
        );
        assert_eq!(
            run(&strategy, &mut browser, URL).await,
            Outcome::Fatal("deletion confirmation prompt".to_string())
        );

        let mut browser = FakeBrowser::new().with_page(URL, "<p>new layout</p>");
        assert_eq!(
            run(&strategy, &mut browser, URL).await,
            Outcome::Fatal("cannot locate download trigger".to_string())
        );
    }

    #[tokio::test]
    async fn test_service_pages_skipped_without_navigation() {
        let strategy = GatedStorage::new(GatedPage::default(), passwords(&[])).unwrap();
        for url in [
            "https://tmpstorage.com/",
            "https://tmpstorage.com/success/xyz",
            "https://www.tmpstorage.com/delete/abc",
        ] {
            let mut browser = FakeBrowser::new();
            let outcome = run(&strategy, &mut browser, url).await;
            assert!(matches!(outcome, Outcome::Skip(_)), "{}", url);
            assert!(browser.actions.is_empty());
        }
    }

    #[tokio::test]
    async fn test_browser_crash_propagates() {
        let strategy = GatedStorage::new(GatedPage::default(), passwords(&[])).unwrap();
        let mut browser = FakeBrowser::new().crashing();
        let dir = tempfile::tempdir().unwrap();
        let http = HttpClient::new(USER_AGENT, Duration::from_secs(5)).unwrap();
        let records = RecordLog::new(dir.path());
        let mut env = ResolveEnv {
            http: &http,
            browser: &mut browser,
            records: &records,
        };
        let request = ResolveRequest {
            url: URL,
            thread_id: 1,
            reply: 1,
        };
        let err = strategy.resolve(&request, &mut env).await.unwrap_err();
        assert!(matches!(err, ResolveError::Browser(_)));
    }

    #[test]
    fn test_bad_selector_rejected() {
        let page = GatedPage {
            trigger: "<<<".to_string(),
            ..GatedPage::default()
        };
        assert!(GatedStorage::new(page, passwords(&[])).is_err());
    }
}
