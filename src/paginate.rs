//! Reverse-chronological windowing of one view into fixed-size pages
//! with RFC 5005 §3 navigation links.
//!
//! Page index 0 holds the newest slice; the highest index holds the
//! oldest entries, absorbs the division remainder and keeps the bare
//! view URI. Every younger page inserts `-<index>` before the trailing
//! slash of the URI.

use crate::atom::{Feed, Link, REL_FIRST, REL_LAST, REL_NEXT, REL_PREVIOUS, REL_SELF};

/// One file-persisted slice of a view.
#[derive(Debug, Clone)]
pub struct Page {
    pub feed: Feed,
    /// 0 = newest slice.
    pub index: usize,
    pub page_count: usize,
}

impl Page {
    /// The URI this page is persisted under, taken from its self link.
    pub fn self_uri(&self) -> &str {
        self.feed
            .links
            .iter()
            .find(|l| l.rel.as_deref() == Some(REL_SELF))
            .map(|l| l.href.as_str())
            .unwrap_or(&self.feed.id)
    }
}

/// An empty view still publishes one (empty) page.
pub fn page_count(total: usize, per_page: usize) -> usize {
    if total == 0 {
        1
    } else {
        1 + (total - 1) / per_page
    }
}

/// URI of page `index` of a view: the oldest page keeps the bare view
/// URI, younger pages get `-<index>` spliced in before the trailing
/// slash.
pub fn page_uri(view_uri: &str, index: usize, count: usize) -> String {
    if index + 1 == count {
        view_uri.to_owned()
    } else {
        format!("{}-{}/", view_uri.trim_end_matches('/'), index)
    }
}

/// Split a view (entries already sorted descending by publish date) into
/// pages. Every page except the oldest holds exactly `per_page` entries.
pub fn paginate(view: &Feed, per_page: usize) -> Vec<Page> {
    let per_page = per_page.max(1);
    let total = view.entries.len();
    let count = page_count(total, per_page);

    (0..count)
        .map(|index| {
            let lower = index * per_page;
            let upper = ((index + 1) * per_page).min(total);

            let mut feed = view.clone();
            feed.entries = view.entries[lower..upper].to_vec();
            // Logical content time of the slice; drives the publisher's
            // freshness check, so an edited old entry must count.
            if let Some(updated) = feed.entries.iter().map(|e| e.updated).max() {
                feed.updated = updated;
            }
            feed.links.push(nav_link(REL_SELF, view, index, count));
            if count > 1 {
                feed.links.push(nav_link(REL_FIRST, view, 0, count));
                if index > 0 {
                    feed.links.push(nav_link(REL_PREVIOUS, view, index - 1, count));
                }
                if index + 1 < count {
                    feed.links.push(nav_link(REL_NEXT, view, index + 1, count));
                }
                feed.links.push(nav_link(REL_LAST, view, count - 1, count));
            }
            // Known omission: a single-page view carries no RFC 5005 §2
            // complete-feed marker.

            Page {
                feed,
                index,
                page_count: count,
            }
        })
        .collect()
}

fn nav_link(rel: &str, view: &Feed, index: usize, count: usize) -> Link {
    let mut link = Link::new(rel, page_uri(&view.id, index, count));
    link.title = Some((index + 1).to_string());
    link
}
