//! The Atom data model: one [`Entry`] per bookmarked item, one [`Feed`]
//! for the canonical store and for every derived view alike.
//!
//! Entries are immutable-by-replacement: edits swap fields in place via
//! [`Feed::find_by_id_mut`] and deletes remove the entry from the
//! sequence. The feed keeps its entries sorted descending by publish
//! date before any serialization.

use chrono::{DateTime, FixedOffset, Utc};
use thiserror::Error;
use url::Url;

use crate::ident::Id;

/// Link relations used across feed pages, per the IANA registry and
/// RFC 5005 §3.
pub const REL_SELF: &str = "self";
pub const REL_ALTERNATE: &str = "alternate";
pub const REL_EDIT: &str = "edit";
pub const REL_FIRST: &str = "first";
pub const REL_LAST: &str = "last";
pub const REL_NEXT: &str = "next";
pub const REL_PREVIOUS: &str = "previous";

/// Errors rejected before any mutation is applied to the canonical feed.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Entry id must not be empty")]
    EmptyId,

    #[error("Entry {0} already exists")]
    DuplicateId(Id),

    #[error("Entry {id} carries {count} links, at most one is allowed")]
    TooManyLinks { id: Id, count: usize },

    #[error("Entry link is not an absolute URL with a host: {0}")]
    InvalidLink(String),

    #[error("Tag term {0:?} must not contain path separators or dot segments")]
    InvalidTag(String),
}

/// Human-readable text with an optional plain/html discriminator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Text {
    pub body: String,
    pub kind: Option<TextKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    Plain,
    Html,
}

impl Text {
    pub fn plain(body: impl Into<String>) -> Self {
        Text {
            body: body.into(),
            kind: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl TextKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TextKind::Plain => "text",
            TextKind::Html => "html",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(TextKind::Plain),
            "html" => Some(TextKind::Html),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Link {
    pub href: String,
    pub rel: Option<String>,
    pub title: Option<String>,
    pub mime_type: Option<String>,
}

impl Link {
    pub fn new(rel: &str, href: impl Into<String>) -> Self {
        Link {
            href: href.into(),
            rel: Some(rel.to_owned()),
            title: None,
            mime_type: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Category {
    pub term: String,
    pub scheme: Option<String>,
    pub label: Option<String>,
}

impl Category {
    pub fn term(term: impl Into<String>) -> Self {
        Category {
            term: term.into(),
            scheme: None,
            label: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Person {
    pub name: String,
    pub email: Option<String>,
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generator {
    pub uri: Option<String>,
    pub version: Option<String>,
    pub body: String,
}

/// `georss:point`, "lat lon".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// The RFC3339 zero instant used where Atom requires an `updated` but
/// none is known yet.
pub fn epoch() -> DateTime<FixedOffset> {
    DateTime::<Utc>::UNIX_EPOCH.fixed_offset()
}

/// One bookmarked link or note.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: Id,
    pub title: Text,
    pub summary: Option<Text>,
    pub content: Option<Text>,
    pub updated: DateTime<FixedOffset>,
    pub published: Option<DateTime<FixedOffset>>,
    pub links: Vec<Link>,
    pub categories: Vec<Category>,
    pub authors: Vec<Person>,
    pub media_thumbnail: Option<String>,
    pub geo_point: Option<GeoPoint>,
    pub lang: Option<String>,
}

impl Default for Entry {
    fn default() -> Self {
        Entry {
            id: Id::default(),
            title: Text::default(),
            summary: None,
            content: None,
            updated: epoch(),
            published: None,
            links: Vec::new(),
            categories: Vec::new(),
            authors: Vec::new(),
            media_thumbnail: None,
            geo_point: None,
            lang: None,
        }
    }
}

impl Entry {
    /// Publish instant, falling back to `updated` when unset.
    pub fn effective_published(&self) -> DateTime<FixedOffset> {
        self.published.unwrap_or(self.updated)
    }

    /// Validation applied before the entry may enter a feed: non-empty id,
    /// at most one link, and a present link must be absolute with a host.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if self.links.len() > 1 {
            return Err(ValidationError::TooManyLinks {
                id: self.id.clone(),
                count: self.links.len(),
            });
        }
        if let Some(link) = self.links.first() {
            validate_external_link(&link.href)?;
        }
        // Terms become path segments of the published tag pages; a
        // separator or dot segment would escape the tags/ subtree.
        for cat in &self.categories {
            let term = cat.term.as_str();
            if term.contains(['/', '\\']) || term == "." || term == ".." {
                return Err(ValidationError::InvalidTag(term.to_owned()));
            }
        }
        Ok(())
    }
}

/// An external bookmark target must be an absolute URL with a non-empty
/// host. Relative references and opaque schemes are rejected.
pub fn validate_external_link(href: &str) -> Result<(), ValidationError> {
    let url = Url::parse(href).map_err(|_| ValidationError::InvalidLink(href.to_owned()))?;
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(ValidationError::InvalidLink(href.to_owned())),
    }
}

/// The ordered entry collection plus feed-level metadata.
///
/// The same type backs the canonical store and every derived view; a view
/// differs only in `id` (its URI key), `subtitle` and the filtered entry
/// slice.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub title: Text,
    pub subtitle: Option<Text>,
    pub id: String,
    pub xml_base: Option<String>,
    pub lang: Option<String>,
    pub updated: DateTime<FixedOffset>,
    pub generator: Option<Generator>,
    pub links: Vec<Link>,
    pub categories: Vec<Category>,
    pub authors: Vec<Person>,
    pub entries: Vec<Entry>,
}

impl Default for Feed {
    fn default() -> Self {
        Feed {
            title: Text::default(),
            subtitle: None,
            id: String::new(),
            xml_base: None,
            lang: None,
            updated: epoch(),
            generator: None,
            links: Vec::new(),
            categories: Vec::new(),
            authors: Vec::new(),
            entries: Vec::new(),
        }
    }
}

impl Feed {
    /// Validate `entry`, insert it and restore descending publish order.
    ///
    /// Returns a reference to the stored entry. Nothing is mutated when
    /// validation fails.
    pub fn append(&mut self, entry: Entry) -> Result<&Entry, ValidationError> {
        entry.validate()?;
        if self.find_by_id(&entry.id).is_some() {
            return Err(ValidationError::DuplicateId(entry.id));
        }
        let id = entry.id.clone();
        self.entries.push(entry);
        self.sort_entries();
        // The sort moved it; look it up again.
        Ok(self.find_by_id(&id).unwrap_or_else(|| unreachable!()))
    }

    /// Absent ids yield `None`, not an error.
    pub fn find_by_id(&self, id: &Id) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == *id)
    }

    pub fn find_by_id_mut(&mut self, id: &Id) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.id == *id)
    }

    /// Lookup by id, by self-link tail (`…/posts/<token>/`) or by exact
    /// external link URL. Used by callers that only hold a request token.
    pub fn find_by_id_self_or_url(&self, token: &str) -> Option<&Entry> {
        let tail = format!("/{}/", token);
        self.entries.iter().find(|e| {
            e.id.as_str() == token
                || e.links.iter().any(|l| match l.rel.as_deref() {
                    Some(REL_SELF) => l.href.ends_with(&tail),
                    Some(REL_ALTERNATE) | None => l.href == token,
                    _ => false,
                })
        })
    }

    /// Remove the entry, bump the feed-level `updated` and return the
    /// prior entry, or `None` if absent.
    pub fn delete_by_id(&mut self, id: &Id) -> Option<Entry> {
        let idx = self.entries.iter().position(|e| e.id == *id)?;
        let prior = self.entries.remove(idx);
        self.updated = Utc::now().fixed_offset();
        Some(prior)
    }

    /// Descending by publish date, the invariant every serialization
    /// relies on.
    pub fn sort_entries(&mut self) {
        self.entries
            .sort_by(|a, b| b.effective_published().cmp(&a.effective_published()));
    }

    /// Term → use-count over all entries, for the tag-index view. Empty
    /// terms are skipped; output is sorted by term, label is the decimal
    /// count.
    pub fn aggregate_categories(&self) -> Vec<Category> {
        let mut counts = std::collections::BTreeMap::<&str, usize>::new();
        for entry in &self.entries {
            for cat in &entry.categories {
                if !cat.term.is_empty() {
                    *counts.entry(cat.term.as_str()).or_insert(0) += 1;
                }
            }
        }
        counts
            .into_iter()
            .map(|(term, count)| Category {
                term: term.to_owned(),
                scheme: None,
                label: Some(count.to_string()),
            })
            .collect()
    }
}
