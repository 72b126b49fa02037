//! Maps an outbound link to something the fetcher can store.
//!
//! Every link ends in an [`Outcome`]: a concrete [`DownloadTarget`], an
//! expected `Skip` (deleted asset, unsupported host, ...), or a `Fatal` for a
//! page whose layout was not recognized. Only failures of shared resources
//! (the browser process, the filesystem) come back as `Err`.

mod alphabet;
mod filename;
mod gallery;
mod gated;
mod redirector;
mod unsupported;

pub use alphabet::SymbolAlphabet;
pub use filename::{direct_image_name, extension_from_url, normalize_name, split_on_last};
pub use gallery::{GalleryEmbed, GalleryPage};
pub use gated::{GatedPage, GatedStorage};
pub use redirector::PageRedirector;
pub use unsupported::UnsupportedHost;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::browser::{BrowserError, BrowserSession};
use crate::http::{image_extension, split_content_type, HttpClient};
use crate::records::RecordLog;

/// How the fetcher obtains the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    /// Stream the URL over HTTP.
    Direct { url: String },
    /// Click `trigger` in the current browser page and wait for the native
    /// download to finish in the scratch directory.
    BrowserDownload { trigger: String },
}

/// A resolved download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub plan: FetchPlan,
    /// Final file name. For browser downloads this is a prefix and the
    /// downloaded file's own (normalized) name is appended.
    pub local_filename: String,
    pub strategy_tag: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Target(DownloadTarget),
    /// Expected terminal state; logged, never escalated.
    Skip(String),
    /// Unrecognized page; logged with a page dump.
    Fatal(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("browser lost while resolving: {0}")]
    Browser(BrowserError),

    #[error("filesystem failure while resolving: {0}")]
    Io(#[from] std::io::Error),
}

/// The link being resolved and where it was found.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub url: &'a str,
    pub thread_id: u64,
    pub reply: u32,
}

/// Shared resources a strategy may use.
pub struct ResolveEnv<'a> {
    pub http: &'a HttpClient,
    pub browser: &'a mut dyn BrowserSession,
    pub records: &'a RecordLog,
}

/// Host-specific resolution.
#[async_trait]
pub trait HostStrategy: Send + Sync {
    fn tag(&self) -> &'static str;

    async fn resolve(
        &self,
        request: &ResolveRequest<'_>,
        env: &mut ResolveEnv<'_>,
    ) -> Result<Outcome, ResolveError>;
}

/// Turn a browser error into an outcome; only a crash propagates.
pub(crate) fn browser_failure(err: BrowserError, url: &str) -> Result<Outcome, ResolveError> {
    match err {
        BrowserError::Crashed(_) => Err(ResolveError::Browser(err)),
        BrowserError::Timeout { .. } => Ok(Outcome::Skip(format!("{} ({})", err, url))),
        other => Ok(Outcome::Fatal(format!("{} ({})", other, url))),
    }
}

/// Host name with a leading `www.` removed.
pub fn normalize_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// Domains served by each built-in strategy, plus page markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostsConfig {
    pub redirector: Vec<String>,
    /// Script text that marks a deleted asset on redirector pages.
    pub deletion_marker: String,
    pub gated: Vec<String>,
    pub gated_page: GatedPage,
    pub gallery: Vec<String>,
    pub gallery_page: GalleryPage,
    pub unsupported: Vec<String>,
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            redirector: vec!["imgdb.in".to_string()],
            deletion_marker: "/?err=1".to_string(),
            gated: vec!["tmpstorage.com".to_string()],
            gated_page: GatedPage::default(),
            gallery: vec!["ibb.co".to_string()],
            gallery_page: GalleryPage::default(),
            unsupported: vec![
                "tmpfiles.org".to_string(),
                "sendvid.com".to_string(),
                "freethread.net".to_string(),
                "image.kilho.net".to_string(),
            ],
        }
    }
}

/// Domain -> strategy lookup.
#[derive(Default, Clone)]
pub struct HostRegistry {
    strategies: HashMap<String, Arc<dyn HostStrategy>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, domain: &str, strategy: Arc<dyn HostStrategy>) {
        let domain = domain.trim().to_ascii_lowercase();
        let domain = domain.strip_prefix("www.").unwrap_or(&domain).to_string();
        self.strategies.insert(domain, strategy);
    }

    pub fn lookup(&self, domain: &str) -> Option<&Arc<dyn HostStrategy>> {
        self.strategies.get(domain)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Registry with the built-in strategies for the configured domains.
    pub fn from_config(
        hosts: &HostsConfig,
        alphabet: Arc<SymbolAlphabet>,
        backup_dir: PathBuf,
        destination_dir: PathBuf,
        passwords: Arc<Vec<String>>,
    ) -> Result<Self, String> {
        let mut registry = Self::new();

        let redirector: Arc<dyn HostStrategy> = Arc::new(PageRedirector::new(
            alphabet,
            backup_dir,
            destination_dir,
            hosts.deletion_marker.clone(),
        ));
        for domain in &hosts.redirector {
            registry.register(domain, Arc::clone(&redirector));
        }

        let gated: Arc<dyn HostStrategy> =
            Arc::new(GatedStorage::new(hosts.gated_page.clone(), passwords)?);
        for domain in &hosts.gated {
            registry.register(domain, Arc::clone(&gated));
        }

        let gallery: Arc<dyn HostStrategy> =
            Arc::new(GalleryEmbed::new(hosts.gallery_page.clone())?);
        for domain in &hosts.gallery {
            registry.register(domain, Arc::clone(&gallery));
        }

        for domain in &hosts.unsupported {
            registry.register(domain, Arc::new(UnsupportedHost::new(domain)));
        }

        Ok(registry)
    }
}

/// Entry point: content-type fast path, then registry dispatch.
pub struct Resolver {
    http: HttpClient,
    registry: HostRegistry,
    records: RecordLog,
}

impl Resolver {
    pub fn new(http: HttpClient, registry: HostRegistry, records: RecordLog) -> Self {
        Self {
            http,
            registry,
            records,
        }
    }

    pub async fn resolve(
        &self,
        browser: &mut dyn BrowserSession,
        url: &str,
        thread_id: u64,
        reply: u32,
    ) -> Result<Outcome, ResolveError> {
        match self.http.content_type(url).await {
            Ok(Some(content_type)) => {
                if let Some((category, subtype)) = split_content_type(&content_type) {
                    if category == "image" {
                        debug!("{} is a direct image ({})", url, content_type);
                        return Ok(Outcome::Target(DownloadTarget {
                            plan: FetchPlan::Direct {
                                url: url.to_string(),
                            },
                            local_filename: direct_image_name(
                                thread_id,
                                reply,
                                image_extension(&subtype),
                            ),
                            strategy_tag: "direct",
                        }));
                    }
                }
            }
            Ok(None) => debug!("{} sent no content type", url),
            Err(e) => warn!("Content type probe failed for {}: {}", url, e),
        }

        let Some(domain) = normalize_domain(url) else {
            warn!("Unparseable link at {}#{}: {}", thread_id, reply, url);
            return Ok(Outcome::Skip(format!("unparseable link: {}", url)));
        };

        let Some(strategy) = self.registry.lookup(&domain) else {
            warn!("Unknown source at {}#{}: {}", thread_id, reply, url);
            return Ok(Outcome::Skip(format!("unknown host: {}", url)));
        };

        let request = ResolveRequest {
            url,
            thread_id,
            reply,
        };
        let mut env = ResolveEnv {
            http: &self.http,
            browser,
            records: &self.records,
        };
        let outcome = strategy.resolve(&request, &mut env).await?;

        match &outcome {
            Outcome::Target(target) => debug!(
                "{} resolved by {} -> {}",
                url,
                strategy.tag(),
                target.local_filename
            ),
            Outcome::Skip(reason) => warn!("Skipping {} ({}): {}", url, strategy.tag(), reason),
            Outcome::Fatal(reason) => error!("Cannot resolve {} ({}): {}", url, strategy.tag(), reason),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;
    use crate::http::USER_AGENT;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver(dir: &std::path::Path, registry: HostRegistry) -> Resolver {
        Resolver::new(
            HttpClient::new(USER_AGENT, Duration::from_secs(5)).unwrap(),
            registry,
            RecordLog::new(dir),
        )
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("https://www.imgdb.in/a3Fx").as_deref(), Some("imgdb.in"));
        assert_eq!(normalize_domain("http://IBB.co/x").as_deref(), Some("ibb.co"));
        assert_eq!(normalize_domain("not a url"), None);
    }

    #[tokio::test]
    async fn test_direct_image_fast_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pic"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1u8; 8], "image/png"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver(dir.path(), HostRegistry::new());
        let url = format!("{}/pic", server.uri());
        let mut browser = FakeBrowser::new();

        let outcome = resolver.resolve(&mut browser, &url, 99, 1).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Target(DownloadTarget {
                plan: FetchPlan::Direct { url: url.clone() },
                local_filename: "99-001.png".to_string(),
                strategy_tag: "direct",
            })
        );
        assert!(browser.actions.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_host_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver(dir.path(), HostRegistry::new());
        let url = format!("{}/page", server.uri());
        let mut browser = FakeBrowser::new();

        let outcome = resolver.resolve(&mut browser, &url, 1, 2).await.unwrap();
        assert_eq!(outcome, Outcome::Skip(format!("unknown host: {}", url)));
    }

    #[test]
    fn test_default_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = HostRegistry::from_config(
            &HostsConfig::default(),
            Arc::new(SymbolAlphabet::default()),
            dir.path().to_path_buf(),
            dir.path().to_path_buf(),
            Arc::new(Vec::new()),
        )
        .unwrap();
        assert_eq!(registry.len(), 7);
        assert_eq!(registry.lookup("sendvid.com").unwrap().tag(), "unsupported");
        assert_eq!(registry.lookup("imgdb.in").unwrap().tag(), "redirector");
        assert_eq!(registry.lookup("tmpstorage.com").unwrap().tag(), "gated");
        assert_eq!(registry.lookup("ibb.co").unwrap().tag(), "gallery");
    }

    #[tokio::test]
    async fn test_registered_host_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut registry = HostRegistry::new();
        registry.register("127.0.0.1", Arc::new(UnsupportedHost::new("127.0.0.1")));
        let resolver = resolver(dir.path(), registry);
        let url = format!("{}/v/abc", server.uri());
        let mut browser = FakeBrowser::new();

        let outcome = resolver.resolve(&mut browser, &url, 3, 4).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Skip("unusual upload on 127.0.0.1 quoted at #4".to_string())
        );
    }

    #[test]
    fn test_browser_failure_mapping() {
        assert!(browser_failure(BrowserError::Crashed("x".into()), "u").is_err());
        assert!(matches!(
            browser_failure(
                BrowserError::Timeout {
                    what: "u".into(),
                    after: Duration::from_secs(1)
                },
                "u"
            ),
            Ok(Outcome::Skip(_))
        ));
        assert!(matches!(
            browser_failure(BrowserError::NotFound("#x".into()), "u"),
            Ok(Outcome::Fatal(_))
        ));
    }
}
