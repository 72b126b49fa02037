//! Hosts that serve an HTML page pointing at the real asset through a
//! canonical link, and a redirect script once the asset is deleted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{error, info};
use url::Url;

use super::filename::{extension_from_url, split_on_last};
use super::{
    DownloadTarget, FetchPlan, HostStrategy, Outcome, ResolveEnv, ResolveError, ResolveRequest,
    SymbolAlphabet,
};
use crate::http::{image_extension, split_content_type};

#[derive(Debug, PartialEq, Eq)]
enum PageShape {
    Canonical(String),
    Deleted,
    Unknown,
}

fn inspect(html: &str, deletion_marker: &str) -> PageShape {
    let doc = Html::parse_document(html);

    for css in ["link[rel=canonical][href]", "link[href]"] {
        if let Ok(selector) = Selector::parse(css) {
            if let Some(href) = doc
                .select(&selector)
                .filter_map(|e| e.value().attr("href"))
                .find(|h| !h.trim().is_empty())
            {
                return PageShape::Canonical(href.trim().to_string());
            }
        }
    }

    if let Ok(scripts) = Selector::parse("script") {
        if doc
            .select(&scripts)
            .any(|s| s.text().collect::<String>().contains(deletion_marker))
        {
            return PageShape::Deleted;
        }
    }

    PageShape::Unknown
}

/// First file in `dir` whose name starts with `index`, in name order.
async fn find_backup(dir: &Path, index: &str) -> std::io::Result<Option<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut best: Option<PathBuf> = None;
    while let Some(entry) = entries.next_entry().await? {
        let matches = entry
            .file_name()
            .to_str()
            .map(|n| n.starts_with(index))
            .unwrap_or(false);
        if !matches || !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        if best.as_ref().map_or(true, |b| path < *b) {
            best = Some(path);
        }
    }
    Ok(best)
}

pub struct PageRedirector {
    alphabet: Arc<SymbolAlphabet>,
    backup_dir: PathBuf,
    destination_dir: PathBuf,
    deletion_marker: String,
}

impl PageRedirector {
    pub fn new(
        alphabet: Arc<SymbolAlphabet>,
        backup_dir: PathBuf,
        destination_dir: PathBuf,
        deletion_marker: String,
    ) -> Self {
        Self {
            alphabet,
            backup_dir,
            destination_dir,
            deletion_marker,
        }
    }

    fn file_name(index: &str, request: &ResolveRequest<'_>, ext: &str) -> String {
        format!("{}-{:03}-{}.{}", index, request.reply, request.thread_id, ext)
    }

    /// Copy an archived copy of a deleted asset into the destination.
    async fn restore(
        &self,
        index: &str,
        request: &ResolveRequest<'_>,
    ) -> Result<Option<PathBuf>, ResolveError> {
        let Some(backup) = find_backup(&self.backup_dir, index).await? else {
            return Ok(None);
        };
        let backup_name = backup
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let (_, ext) = split_on_last(&backup_name, '.');
        let restored = self
            .destination_dir
            .join(Self::file_name(index, request, ext));
        tokio::fs::copy(&backup, &restored).await?;
        info!("Restored {} from {}", restored.display(), backup.display());
        Ok(Some(restored))
    }
}

#[async_trait]
impl HostStrategy for PageRedirector {
    fn tag(&self) -> &'static str {
        "redirector"
    }

    async fn resolve(
        &self,
        request: &ResolveRequest<'_>,
        env: &mut ResolveEnv<'_>,
    ) -> Result<Outcome, ResolveError> {
        let body = match env.http.get_text(request.url).await {
            Ok(body) => body,
            Err(e) => return Ok(Outcome::Skip(format!("page unavailable: {}", e))),
        };
        let index = self.alphabet.stable_index(request.url);

        match inspect(&body, &self.deletion_marker) {
            PageShape::Canonical(href) => {
                let target = match Url::parse(request.url).and_then(|base| base.join(&href)) {
                    Ok(joined) => joined.to_string(),
                    Err(_) => href,
                };
                let ext = match env.http.content_type(&target).await {
                    Ok(Some(content_type)) => match split_content_type(&content_type) {
                        Some((category, subtype)) if category == "image" => {
                            image_extension(&subtype).to_string()
                        }
                        Some((_, subtype)) => {
                            error!(
                                "{} is not an image ({}), quoted at {}#{}",
                                target, content_type, request.thread_id, request.reply
                            );
                            subtype
                        }
                        None => extension_from_url(&target),
                    },
                    _ => extension_from_url(&target),
                };
                Ok(Outcome::Target(DownloadTarget {
                    plan: FetchPlan::Direct { url: target },
                    local_filename: Self::file_name(&index, request, &ext),
                    strategy_tag: "redirector",
                }))
            }
            PageShape::Deleted => match self.restore(&index, request).await? {
                Some(path) => Ok(Outcome::Skip(format!(
                    "asset deleted, restored from backup as {}",
                    path.display()
                ))),
                None => Ok(Outcome::Skip(format!("asset deleted, no backup for {}", index))),
            },
            PageShape::Unknown => {
                let dump = env
                    .records
                    .dump_page(
                        &request.thread_id.to_string(),
                        &format!("unrecognized redirector page {}", request.url),
                        &body,
                    )
                    .await?;
                Ok(Outcome::Fatal(format!(
                    "unrecognized page layout at {} (dumped to {})",
                    request.url,
                    dump.display()
                )))
            }
        }
    }
}
