//! View derivation: the named, filtered sub-feeds touched by a set of
//! modified entries.
//!
//! Views are ephemeral. Every publish recomputes them from the canonical
//! feed; only the *set of keys* depends on the modified entries, the
//! entry lists always come from the full feed so that untouched entries
//! are never dropped from shared views.

use chrono::NaiveDate;
use chrono_tz::Tz;
use std::collections::BTreeMap;

use crate::atom::{Category, Entry, Feed, Link, Text, REL_EDIT, REL_SELF};
use crate::ident::Id;

pub const URI_POSTS: &str = "posts";
pub const URI_TAGS: &str = "tags";
pub const URI_DAYS: &str = "days";

/// Name of the CGI the edit links point back at.
pub const CGI_NAME: &str = "linklog.cgi";

/// A named filter over the canonical feed. The variant doubles as the
/// predicate deciding entry membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    /// Every entry.
    Posts,
    /// Exactly the entry with this id.
    Post(Id),
    /// The tag index root. Matches nothing; its content is the
    /// aggregated category counts, not an entry list.
    TagIndex,
    /// Entries carrying this tag term.
    Tag(String),
    /// Entries published on this calendar day (in the publish timezone).
    Day(NaiveDate),
}

impl View {
    /// The URI key, doubling as relative directory path of the published
    /// page tree.
    pub fn uri(&self) -> String {
        match self {
            View::Posts => format!("{URI_POSTS}/"),
            View::Post(id) => format!("{URI_POSTS}/{id}/"),
            View::TagIndex => format!("{URI_TAGS}/"),
            View::Tag(term) => format!("{URI_TAGS}/{term}/"),
            View::Day(day) => format!("{URI_DAYS}/{day}/"),
        }
    }

    /// The membership predicate.
    pub fn matches(&self, entry: &Entry, tz: &Tz) -> bool {
        match self {
            View::Posts => true,
            View::Post(id) => entry.id == *id,
            View::TagIndex => false,
            View::Tag(term) => entry.categories.iter().any(|c| c.term == *term),
            View::Day(day) => entry_day(entry, tz) == *day,
        }
    }
}

/// Calendar day an entry belongs to, bucketed in the publish timezone.
pub fn entry_day(entry: &Entry, tz: &Tz) -> NaiveDate {
    entry.effective_published().with_timezone(tz).date_naive()
}

/// The set of views affected by `modified`: the all-posts view, each
/// entry's own view, one view per tag (plus the tag-index root as a
/// placeholder so an empty index still gets published) and one per
/// publish day. Keyed and ordered by URI for determinism.
pub fn derive_views(modified: &[&Entry], tz: &Tz) -> BTreeMap<String, View> {
    let mut views = BTreeMap::new();
    for entry in modified {
        register(&mut views, View::Posts);
        register(&mut views, View::Post(entry.id.clone()));
        for cat in &entry.categories {
            register(&mut views, View::TagIndex);
            register(&mut views, View::Tag(cat.term.clone()));
        }
        register(&mut views, View::Day(entry_day(entry, tz)));
    }
    views
}

fn register(views: &mut BTreeMap<String, View>, view: View) {
    views.entry(view.uri()).or_insert(view);
}

/// Materialize each view as a feed: metadata cloned from the seed,
/// `id` replaced by the view URI, subtitle adjusted for tag/day views,
/// entries filtered by the predicate and decorated for output. The
/// tag-index view instead aggregates term counts over *all* canonical
/// entries.
pub fn compute_views(feed: &Feed, views: &BTreeMap<String, View>, tz: &Tz) -> Vec<Feed> {
    views
        .iter()
        .map(|(uri, view)| compute_view(feed, uri, view, tz))
        .collect()
}

/// Materialize one view. Exposed separately for the publisher's
/// self-heal sweep over single-entry pages.
pub fn compute_view(feed: &Feed, uri: &str, view: &View, tz: &Tz) -> Feed {
    let cat_scheme = feed
        .xml_base
        .as_deref()
        .map(|base| format!("{base}{URI_TAGS}/"));

    let mut out = Feed {
        entries: Vec::new(),
        categories: Vec::new(),
        ..feed.clone()
    };
    out.id = uri.to_owned();

    match view {
        View::Tag(term) => out.subtitle = Some(Text::plain(format!("#{term}"))),
        View::Day(day) => out.subtitle = Some(Text::plain(format!("📅 {day}"))),
        View::TagIndex => out.categories = feed.aggregate_categories(),
        View::Posts | View::Post(_) => {}
    }

    if *view != View::TagIndex {
        out.entries = feed
            .entries
            .iter()
            .filter(|e| view.matches(e, tz))
            .map(|e| decorate_entry(e, cat_scheme.as_deref()))
            .collect();
    }
    out
}

/// Output decoration applied to entry copies only, never persisted back:
/// self and edit links plus the tag scheme on each category.
fn decorate_entry(entry: &Entry, cat_scheme: Option<&str>) -> Entry {
    let mut out = entry.clone();
    let self_uri = format!("{URI_POSTS}/{}/", out.id);
    out.links.push(Link::new(REL_SELF, self_uri.clone()));
    out.links
        .push(Link::new(REL_EDIT, format!("{CGI_NAME}/{self_uri}")));
    if let Some(scheme) = cat_scheme {
        for cat in &mut out.categories {
            cat.scheme = Some(scheme.to_owned());
        }
    }
    out
}

/// Tag terms for the `tags/index.json` autocomplete sidecar,
/// hash-prefixed, one per known term.
pub fn tag_index_terms(feed: &Feed) -> Vec<String> {
    feed.aggregate_categories()
        .into_iter()
        .map(|c| format!("#{}", c.term))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Text;
    use chrono::DateTime;
    use pretty_assertions::assert_eq;

    fn utc() -> Tz {
        chrono_tz::UTC
    }

    fn entry(id: &str, published: &str, terms: &[&str]) -> Entry {
        Entry {
            id: Id::from(id),
            title: Text::plain(id),
            updated: DateTime::parse_from_rfc3339(published).unwrap(),
            published: Some(DateTime::parse_from_rfc3339(published).unwrap()),
            categories: terms.iter().map(|t| Category::term(*t)).collect(),
            ..Entry::default()
        }
    }

    #[test]
    fn test_derive_views_for_single_tagged_entry() {
        let e = entry("id_0", "2010-12-31T00:11:22Z", &["🐳"]);
        let views = derive_views(&[&e], &utc());

        let keys: Vec<&str> = views.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "days/2010-12-31/",
                "posts/",
                "posts/id_0/",
                "tags/",
                "tags/🐳/"
            ]
        );
    }

    #[test]
    fn test_derive_views_untagged_entry_has_no_tag_views() {
        let e = entry("id_0", "2010-12-31T00:11:22Z", &[]);
        let views = derive_views(&[&e], &utc());
        assert_eq!(views.len(), 3);
        assert!(!views.contains_key("tags/"));
    }

    #[test]
    fn test_derive_views_is_idempotent_across_entries() {
        let a = entry("a", "2010-12-31T00:11:22Z", &["x"]);
        let b = entry("b", "2010-12-31T23:59:59Z", &["x"]);
        let views = derive_views(&[&a, &b], &utc());
        // posts/, posts/a/, posts/b/, tags/, tags/x/, days/2010-12-31/
        assert_eq!(views.len(), 6);
    }

    #[test]
    fn test_day_bucketing_respects_timezone() {
        let e = entry("a", "2010-12-31T23:30:00Z", &[]);
        let berlin: Tz = "Europe/Berlin".parse().unwrap();
        let views = derive_views(&[&e], &berlin);
        assert!(views.contains_key("days/2011-01-01/"));
    }

    #[test]
    fn test_compute_views_filters_from_full_feed() {
        let mut feed = Feed::default();
        feed.append(entry("new", "2021-06-01T00:00:00Z", &["x"])).unwrap();
        feed.append(entry("old", "2020-06-01T00:00:00Z", &["y"])).unwrap();

        // Re-derive for the new entry only.
        let modified = feed.find_by_id(&Id::from("new")).unwrap().clone();
        let views = derive_views(&[&modified], &utc());
        let computed = compute_views(&feed, &views, &utc());

        let posts = computed.iter().find(|f| f.id == "posts/").unwrap();
        assert_eq!(posts.entries.len(), 2, "all-posts view must keep untouched entries");

        let single = computed.iter().find(|f| f.id == "posts/new/").unwrap();
        assert_eq!(single.entries.len(), 1);

        let tag = computed.iter().find(|f| f.id == "tags/x/").unwrap();
        assert_eq!(tag.entries.len(), 1);
        assert_eq!(tag.subtitle.as_ref().unwrap().body, "#x");
    }

    #[test]
    fn test_compute_views_deleted_entry_yields_empty_single_view() {
        let mut feed = Feed::default();
        feed.append(entry("gone", "2021-06-01T00:00:00Z", &["x"])).unwrap();
        let prior = feed.delete_by_id(&Id::from("gone")).unwrap();

        let views = derive_views(&[&prior], &utc());
        let computed = compute_views(&feed, &views, &utc());

        for f in &computed {
            match f.id.as_str() {
                "tags/" => {}
                _ => assert!(
                    f.entries.iter().all(|e| e.id.as_str() != "gone") && f.entries.is_empty(),
                    "view {} still lists the deleted entry",
                    f.id
                ),
            }
        }
        let single = computed.iter().find(|f| f.id == "posts/gone/").unwrap();
        assert!(single.entries.is_empty());
    }

    #[test]
    fn test_tag_index_aggregates_all_entries() {
        let mut feed = Feed::default();
        feed.append(entry("a", "2021-06-01T00:00:00Z", &["x", "y"])).unwrap();
        feed.append(entry("b", "2020-06-01T00:00:00Z", &["x"])).unwrap();

        // Only entry b modified; the index still counts every entry.
        let modified = feed.find_by_id(&Id::from("b")).unwrap().clone();
        let views = derive_views(&[&modified], &utc());
        let computed = compute_views(&feed, &views, &utc());

        let index = computed.iter().find(|f| f.id == "tags/").unwrap();
        assert!(index.entries.is_empty());
        assert_eq!(index.categories.len(), 2);
        assert_eq!(index.categories[0].term, "x");
        assert_eq!(index.categories[0].label.as_deref(), Some("2"));
        assert_eq!(index.categories[1].term, "y");
        assert_eq!(index.categories[1].label.as_deref(), Some("1"));
    }

    #[test]
    fn test_decoration_adds_self_and_edit_links() {
        let mut feed = Feed::default();
        feed.xml_base = Some("https://example.com/".to_owned());
        feed.append(entry("abc", "2021-06-01T00:00:00Z", &["x"])).unwrap();

        let modified = feed.entries[0].clone();
        let views = derive_views(&[&modified], &utc());
        let computed = compute_views(&feed, &views, &utc());
        let posts = computed.iter().find(|f| f.id == "posts/").unwrap();
        let e = &posts.entries[0];

        assert!(e
            .links
            .iter()
            .any(|l| l.rel.as_deref() == Some(REL_SELF) && l.href == "posts/abc/"));
        assert!(e
            .links
            .iter()
            .any(|l| l.rel.as_deref() == Some(REL_EDIT)));
        assert_eq!(
            e.categories[0].scheme.as_deref(),
            Some("https://example.com/tags/")
        );
        // Canonical feed untouched.
        assert!(feed.entries[0].links.is_empty());
    }

    #[test]
    fn test_tag_index_terms_are_hash_prefixed() {
        let mut feed = Feed::default();
        feed.append(entry("a", "2021-06-01T00:00:00Z", &["x", "🐳"])).unwrap();
        assert_eq!(tag_index_terms(&feed), vec!["#x", "#🐳"]);
    }
}
