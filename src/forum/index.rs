use scraper::Html;
use tracing::warn;

use super::CompiledSelectors;
use crate::tracker::ReportedCount;

/// One row of the thread index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub thread_id: u64,
    pub count: ReportedCount,
}

/// Thread id from an index href such as `/caution/123456`.
fn thread_id_from_href(href: &str) -> Option<u64> {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    path.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

/// Extract every thread and its reply badge from the index page.
/// Rows without a parseable id or badge are skipped.
pub fn parse_index(html: &str, selectors: &CompiledSelectors) -> Vec<IndexEntry> {
    let doc = Html::parse_document(html);
    let mut entries = Vec::new();

    for item in doc.select(&selectors.thread_list_item) {
        let Some(href) = item.value().attr("href") else {
            warn!("Thread list item without href: {}", item.html());
            continue;
        };
        let Some(thread_id) = thread_id_from_href(href) else {
            warn!("Cannot read thread id from {}", href);
            continue;
        };
        let Some(badge) = item.select(&selectors.reply_count).next() else {
            warn!("Thread {} has no reply badge", thread_id);
            continue;
        };
        let text: String = badge.text().collect();
        if text.trim().is_empty() {
            // Counted as closed, but usually a layout change
            warn!(
                "Thread {} has an empty reply badge, treating it as finished",
                thread_id
            );
        }
        entries.push(IndexEntry {
            thread_id,
            count: ReportedCount::parse(&text),
        });
    }

    entries
}
