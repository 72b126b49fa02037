//! Thin reqwest wrapper for pages and files that do not need a browser.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use tracing::debug;

/// Default user agent; a desktop browser string so hosts serve normal pages.
pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0 Safari/537.36";

/// HTTP client shared by the resolver and the direct fetch path.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

/// Split a Content-Type header into `(type, subtype)`, lowercased, parameters dropped.
pub fn split_content_type(header: &str) -> Option<(String, String)> {
    let essence = header.split(';').next()?.trim().to_ascii_lowercase();
    let (category, subtype) = essence.split_once('/')?;
    if category.is_empty() || subtype.is_empty() {
        return None;
    }
    Some((category.to_string(), subtype.to_string()))
}

/// File extension for an image subtype.
pub fn image_extension(subtype: &str) -> &str {
    match subtype {
        "svg+xml" => "svg",
        "x-icon" | "vnd.microsoft.icon" => "ico",
        other => other,
    }
}

impl HttpClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, String> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .cookie_store(true)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client })
    }

    /// GET `url` and return its Content-Type header without reading the body.
    pub async fn content_type(&self, url: &str) -> Result<Option<String>, reqwest::Error> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        debug!("Content-Type of {}: {:?}", url, content_type);
        Ok(content_type)
    }

    /// GET `url` and return the body as text.
    pub async fn get_text(&self, url: &str) -> Result<String, reqwest::Error> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    /// GET `url` for streaming; non-success statuses are errors.
    pub async fn get(&self, url: &str) -> Result<Response, reqwest::Error> {
        self.client.get(url).send().await?.error_for_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_split_content_type() {
        assert_eq!(
            split_content_type("image/PNG; charset=binary"),
            Some(("image".to_string(), "png".to_string()))
        );
        assert_eq!(split_content_type("text/html"), Some(("text".into(), "html".into())));
        assert_eq!(split_content_type("garbage"), None);
        assert_eq!(split_content_type("image/"), None);
    }

    #[test]
    fn test_image_extension() {
        assert_eq!(image_extension("png"), "png");
        assert_eq!(image_extension("svg+xml"), "svg");
    }

    #[tokio::test]
    async fn test_content_type_probe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(vec![0u8; 16], "image/png"),
            )
            .mount(&server)
            .await;

        let client = HttpClient::new(USER_AGENT, Duration::from_secs(5)).unwrap();
        let ct = client
            .content_type(&format!("{}/a.png", server.uri()))
            .await
            .unwrap();
        assert_eq!(ct.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_error_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpClient::new(USER_AGENT, Duration::from_secs(5)).unwrap();
        assert!(client.get_text(&server.uri()).await.is_err());
    }
}
