//! CSS selectors describing the board's markup.

use scraper::Selector;
use serde::{Deserialize, Serialize};

/// Selector strings, overridable from the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    /// Anchor for one thread on the index page; its href ends with the thread id.
    pub thread_list_item: String,
    /// Reply-count badge inside a thread list item.
    pub reply_count: String,
    /// Present once a thread page has rendered.
    pub thread_ready: String,
    /// Head post container.
    pub head: String,
    /// Numbered reply container.
    pub reply: String,
    /// Ordinal label inside a reply.
    pub offset: String,
    pub author: String,
    /// Content container inside a head post or reply.
    pub content: String,
    /// Outbound link anchors inside a content container.
    pub link: String,
    /// Displayed reply total on a thread page.
    pub displayed_total: String,
    /// Present only when logged in.
    pub logged_in: String,
    pub login_email: String,
    pub login_password: String,
    pub login_submit: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            thread_list_item: "a.thread-list-item".to_string(),
            reply_count: "span.count".to_string(),
            thread_ready: "div.th-contents".to_string(),
            head: "div.thread-head".to_string(),
            reply: "div.thread-reply".to_string(),
            offset: "span.reply-offset".to_string(),
            author: "span.reply-author".to_string(),
            content: "div.th-contents".to_string(),
            link: "a.link".to_string(),
            displayed_total: "span.thread-count".to_string(),
            logged_in: ".user-email".to_string(),
            login_email: "#app form input:nth-of-type(1)".to_string(),
            login_password: "#app form input:nth-of-type(2)".to_string(),
            login_submit: "#app form input:nth-of-type(3)".to_string(),
        }
    }
}

/// Parse one selector, reporting which field was bad.
pub fn compile(field: &str, css: &str) -> Result<Selector, String> {
    Selector::parse(css).map_err(|e| format!("invalid selector for {}: {:?} ({:?})", field, css, e))
}

/// Selectors used for HTML parsing, compiled once.
#[derive(Debug, Clone)]
pub struct CompiledSelectors {
    pub thread_list_item: Selector,
    pub reply_count: Selector,
    pub head: Selector,
    pub reply: Selector,
    pub offset: Selector,
    pub author: Selector,
    pub content: Selector,
    pub link: Selector,
    pub displayed_total: Selector,
}

impl Selectors {
    pub fn compile(&self) -> Result<CompiledSelectors, String> {
        Ok(CompiledSelectors {
            thread_list_item: compile("thread_list_item", &self.thread_list_item)?,
            reply_count: compile("reply_count", &self.reply_count)?,
            head: compile("head", &self.head)?,
            reply: compile("reply", &self.reply)?,
            offset: compile("offset", &self.offset)?,
            author: compile("author", &self.author)?,
            content: compile("content", &self.content)?,
            link: compile("link", &self.link)?,
            displayed_total: compile("displayed_total", &self.displayed_total)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_compile() {
        assert!(Selectors::default().compile().is_ok());
    }

    #[test]
    fn test_bad_selector_names_field() {
        let selectors = Selectors {
            reply: "div..broken".to_string(),
            ..Default::default()
        };
        let err = selectors.compile().unwrap_err();
        assert!(err.contains("reply"));
    }
}
