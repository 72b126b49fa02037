use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use super::filename::{last_path_segment, normalize_name};
use super::{
    DownloadTarget, FetchPlan, HostStrategy, Outcome, ResolveEnv, ResolveError, ResolveRequest,
};
use crate::forum::compile;

/// Selectors on an image gallery viewer page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryPage {
    pub image: String,
    pub not_found: String,
    pub views: String,
}

impl Default for GalleryPage {
    fn default() -> Self {
        Self {
            image: "div#image-viewer-container > img".to_string(),
            not_found: "div.page-not-found".to_string(),
            views: "span[data-text=image-views]".to_string(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Viewer {
    Image { src: String, views: u64 },
    NotFound,
    Unknown,
}

/// Image galleries that embed the file in a viewer page.
pub struct GalleryEmbed {
    image: Selector,
    not_found: Selector,
    views: Selector,
}

impl GalleryEmbed {
    pub fn new(page: GalleryPage) -> Result<Self, String> {
        Ok(Self {
            image: compile("image", &page.image)?,
            not_found: compile("not_found", &page.not_found)?,
            views: compile("views", &page.views)?,
        })
    }

    fn inspect(&self, html: &str) -> Viewer {
        let doc = Html::parse_document(html);
        if let Some(src) = doc
            .select(&self.image)
            .next()
            .and_then(|img| img.value().attr("src"))
        {
            let views = doc
                .select(&self.views)
                .next()
                .map(|v| v.text().collect::<String>())
                .and_then(|t| t.chars().filter(char::is_ascii_digit).collect::<String>().parse().ok())
                .unwrap_or(0);
            return Viewer::Image {
                src: src.to_string(),
                views,
            };
        }
        if doc.select(&self.not_found).next().is_some() {
            return Viewer::NotFound;
        }
        Viewer::Unknown
    }
}

#[async_trait]
impl HostStrategy for GalleryEmbed {
    fn tag(&self) -> &'static str {
        "gallery"
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

        match self.inspect(&body) {
            Viewer::Image { src, views } => {
                let target = match Url::parse(request.url).and_then(|base| base.join(&src)) {
                    Ok(joined) => joined.to_string(),
                    Err(_) => src,
                };
                let original = last_path_segment(&target).unwrap_or_else(|| "image".to_string());
                Ok(Outcome::Target(DownloadTarget {
                    local_filename: format!(
                        "ibb-{}-{:02}-{}-{}",
                        request.thread_id,
                        request.reply,
                        views,
                        normalize_name(&original)
                    ),
                    plan: FetchPlan::Direct { url: target },
                    strategy_tag: "gallery",
                }))
            }
            Viewer::NotFound => Ok(Outcome::Skip(format!(
                "gallery image not found, quoted at #{}",
                request.reply
            ))),
            Viewer::Unknown => {
                env.records
                    .dump_page(
                        &request.thread_id.to_string(),
                        &format!("unrecognized gallery page {}", request.url),
                        &body,
                    )
                    .await?;
                Ok(Outcome::Fatal(format!(
                    "unrecognized page layout at {}",
                    request.url
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;
    use crate::http::{HttpClient, USER_AGENT};
    use crate::records::RecordLog;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn resolve_page(html: &'static str) -> (Outcome, String, tempfile::TempDir) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let http = HttpClient::new(USER_AGENT, Duration::from_secs(5)).unwrap();
        let records = RecordLog::new(dir.path());
        let mut browser = FakeBrowser::new();
        let mut env = ResolveEnv {
            http: &http,
            browser: &mut browser,
            records: &records,
        };
        let url = format!("{}/x1Y2", server.uri());
        let request = ResolveRequest {
            url: &url,
            thread_id: 42,
            reply: 5,
        };
        let strategy = GalleryEmbed::new(GalleryPage::default()).unwrap();
        let outcome = strategy.resolve(&request, &mut env).await.unwrap();
        (outcome, server.uri(), dir)
    }

    #[tokio::test]
    async fn test_viewer_image_with_views() {
        let (outcome, _, _dir) = resolve_page(
            r#"<div id="image-viewer-container"><img src="https://i.ibb.test/ab/my.cat.photo.jpg"></div>
               <span data-text="image-views">1,204</span>"#,
        )
        .await;
        assert_eq!(
            outcome,
            Outcome::Target(DownloadTarget {
                plan: FetchPlan::Direct {
                    url: "https://i.ibb.test/ab/my.cat.photo.jpg".to_string()
                },
                local_filename: "ibb-42-05-1204-my-cat-photo.jpg".to_string(),
                strategy_tag: "gallery",
            })
        );
    }

    #[tokio::test]
    async fn test_views_default_to_zero() {
        let (outcome, _, _dir) = resolve_page(
            r#"<div id="image-viewer-container"><img src="/i/pic.png"></div>"#,
        )
        .await;
        match outcome {
            Outcome::Target(target) => {
                assert_eq!(target.local_filename, "ibb-42-05-0-pic.png");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_not_found_and_unknown() {
        let (outcome, _, _dir) = resolve_page(r#"<div class="page-not-found">404</div>"#).await;
        assert!(matches!(outcome, Outcome::Skip(_)));

        let (outcome, _, dir) = resolve_page("<p>something else</p>").await;
        assert!(matches!(outcome, Outcome::Fatal(_)));
        assert!(dir.path().join("dump-42.html").exists());
    }
}
