use scraper::{ElementRef, Html};
use thiserror::Error;

use super::CompiledSelectors;
use crate::tracker::ReportedCount;

/// One piece of a post body, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    /// Absolute hyperlink.
    Link { href: String, text: String },
    /// In-page or relative reference, e.g. a `>>12` quote of another reply.
    Anchor { target: String, text: String },
}

/// A parsed head post or reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRecord {
    pub thread_id: u64,
    /// 1-based; the head post is 1.
    pub ordinal: u32,
    pub author: Option<String>,
    pub fragments: Vec<Fragment>,
    /// Outbound link targets, deduplicated, in document order.
    pub links: Vec<String>,
}

impl ReplyRecord {
    /// Text fragments joined by spaces; link labels excluded.
    pub fn plain_text(&self) -> String {
        self.fragments
            .iter()
            .filter_map(|f| match f {
                Fragment::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A post that could not be parsed. Carries the raw markup for the audit log.
#[derive(Debug, Clone, Error)]
#[error("thread {thread_id}, post #{position}: {reason}")]
pub struct ReplyParseError {
    pub thread_id: u64,
    /// Position among rendered posts (0 = head).
    pub position: usize,
    pub reason: String,
    pub raw: String,
}

/// Everything read from one thread page.
#[derive(Debug, Clone)]
pub struct ThreadPage {
    pub thread_id: u64,
    /// Reply total as displayed on the page, if present.
    pub displayed_total: Option<ReportedCount>,
    pub head: Option<Result<ReplyRecord, ReplyParseError>>,
    /// Numbered replies in rendered order.
    pub replies: Vec<Result<ReplyRecord, ReplyParseError>>,
}

impl ThreadPage {
    /// Ordinal of the last rendered post (1 when only the head exists).
    pub fn last_rendered_ordinal(&self) -> Option<u32> {
        self.replies
            .iter()
            .rev()
            .find_map(|r| r.as_ref().ok().map(|r| r.ordinal))
            .or_else(|| {
                self.head
                    .as_ref()
                    .and_then(|h| h.as_ref().ok().map(|h| h.ordinal))
            })
    }
}

fn is_absolute(href: &str) -> bool {
    href.starts_with("http://") || href.starts_with("https://")
}

fn digits(text: &str) -> Option<u32> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn fragments_of(content: ElementRef<'_>) -> Vec<Fragment> {
    let mut fragments = Vec::new();

    for node in content.descendants() {
        if let Some(text) = node.value().as_text() {
            let inside_anchor = node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .map(|e| e.name() == "a")
                    .unwrap_or(false)
            });
            let trimmed = text.trim();
            if !inside_anchor && !trimmed.is_empty() {
                fragments.push(Fragment::Text(trimmed.to_string()));
            }
        } else if let Some(element) = ElementRef::wrap(node) {
            if element.value().name() != "a" {
                continue;
            }
            let href = element.value().attr("href").unwrap_or_default().to_string();
            let text = element.text().collect::<String>().trim().to_string();
            if is_absolute(&href) {
                fragments.push(Fragment::Link { href, text });
            } else {
                let target = if href.is_empty() { text.clone() } else { href };
                fragments.push(Fragment::Anchor { target, text });
            }
        }
    }

    fragments
}

fn parse_post(
    element: ElementRef<'_>,
    thread_id: u64,
    position: usize,
    selectors: &CompiledSelectors,
) -> Result<ReplyRecord, ReplyParseError> {
    let fail = |reason: &str| ReplyParseError {
        thread_id,
        position,
        reason: reason.to_string(),
        raw: element.html(),
    };

    let ordinal = if position == 0 {
        1
    } else {
        match element.select(&selectors.offset).next() {
            Some(label) => {
                let text: String = label.text().collect();
                digits(&text).ok_or_else(|| fail("offset label has no number"))?
            }
            // Without labels the head is #1 and replies follow in order
            None => position as u32 + 1,
        }
    };

    let content = element
        .select(&selectors.content)
        .next()
        .ok_or_else(|| fail("no content container"))?;

    let author = element
        .select(&selectors.author)
        .next()
        .map(|a| a.text().collect::<String>().trim().to_string())
        .filter(|a| !a.is_empty());

    let mut links: Vec<String> = Vec::new();
    for anchor in content.select(&selectors.link) {
        if let Some(href) = anchor.value().attr("href") {
            if is_absolute(href) && !links.iter().any(|l| l == href) {
                links.push(href.to_string());
            }
        }
    }

    Ok(ReplyRecord {
        thread_id,
        ordinal,
        author,
        fragments: fragments_of(content),
        links,
    })
}

/// Parse a thread page into its head post and numbered replies.
pub fn parse_thread(html: &str, thread_id: u64, selectors: &CompiledSelectors) -> ThreadPage {
    let doc = Html::parse_document(html);

    let displayed_total = doc
        .select(&selectors.displayed_total)
        .next()
        .map(|e| ReportedCount::parse(&e.text().collect::<String>()));

    let head = doc
        .select(&selectors.head)
        .next()
        .map(|e| parse_post(e, thread_id, 0, selectors));

    let replies = doc
        .select(&selectors.reply)
        .enumerate()
        .map(|(i, e)| parse_post(e, thread_id, i + 1, selectors))
        .collect();

    ThreadPage {
        thread_id,
        displayed_total,
        head,
        replies,
    }
}
