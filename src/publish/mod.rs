//! The publication writer: materialize every affected view as gzipped,
//! stylesheet-linked Atom page files under the publication root.
//!
//! Pages are only rewritten when stale: each published file carries its
//! page's logical `updated` instant as mtime, so freshness is one
//! `stat` away. Writes go to a `~` temp file beside the destination and
//! land by rename.

pub mod lock;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use filetime::FileTime;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::atom::{page_document, AtomError, Entry, Feed};
use crate::paginate::{paginate, Page};
use crate::views::{compute_view, compute_views, derive_views, tag_index_terms, View, URI_POSTS, URI_TAGS};
use lock::{LockError, LockFile};

/// File name every page is persisted under inside its URI directory.
const PAGE_FILE: &str = "index.xml";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Atom(#[from] AtomError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Feed base URL {0:?} must be absolute and end in '/'")]
    BaseUrl(String),

    #[error("tags/index.json: {0}")]
    TagIndex(#[from] serde_json::Error),
}

fn io_at(path: &Path, source: io::Error) -> PublishError {
    PublishError::Io {
        path: path.to_owned(),
        source,
    }
}

/// Everything the writer needs to know about the deployment.
#[derive(Debug, Clone)]
pub struct Publisher {
    /// Root of the published page tree.
    pub pub_dir: PathBuf,
    /// Skin directory under `assets/` the stylesheet reference points at.
    pub skin: String,
    /// Entries per page.
    pub per_page: usize,
    /// Timezone used for day bucketing.
    pub tz: Tz,
    /// Lock file guarding concurrent publication runs.
    pub lock_path: PathBuf,
}

impl Publisher {
    /// Publish every view touched by `modified`, then sweep all
    /// single-post pages so interrupted earlier runs heal. Returns the
    /// number of page files written.
    pub fn publish_for_modified(
        &self,
        feed: &Feed,
        modified: &[&Entry],
        force: bool,
    ) -> Result<usize, PublishError> {
        check_base(feed)?;
        let _lock = LockFile::acquire(&self.lock_path)?;

        let views = derive_views(modified, &self.tz);
        let mut written = 0;
        for view in compute_views(feed, &views, &self.tz) {
            written += self.publish_view(&view, force)?;
        }

        if views.contains_key(&format!("{URI_TAGS}/")) {
            self.write_tag_index(feed)?;
        }

        // Earlier interrupted runs may have left single-post pages
        // stale; the mtime check makes this sweep cheap.
        for entry in &feed.entries {
            let view = View::Post(entry.id.clone());
            let computed = compute_view(feed, &view.uri(), &view, &self.tz);
            written += self.publish_view(&computed, false)?;
        }

        info!(written, views = views.len(), "publication run complete");
        Ok(written)
    }

    fn publish_view(&self, view: &Feed, force: bool) -> Result<usize, PublishError> {
        let mut written = 0;
        for page in paginate(view, self.per_page) {
            if self.publish_page(&page, force)? {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Write (or remove) one page file. Returns whether the file was
    /// touched.
    pub fn publish_page(&self, page: &Page, force: bool) -> Result<bool, PublishError> {
        let uri = page.self_uri().to_owned();
        let segments: Vec<&str> = uri.split('/').filter(|s| !s.is_empty()).collect();
        let dir = segments
            .iter()
            .fold(self.pub_dir.clone(), |d, s| d.join(s));
        let dest = dir.join(PAGE_FILE);

        if is_tombstone(&segments, page) {
            return self.unpublish(&dir, &dest);
        }

        let updated = FileTime::from_unix_time(
            page.feed.updated.timestamp(),
            page.feed.updated.timestamp_subsec_nanos(),
        );
        if !force && is_fresh(&dest, updated) {
            debug!(uri = %uri, "page fresh, skipping");
            return Ok(false);
        }

        let stylesheet = format!(
            "{}assets/{}/posts.xslt",
            "../".repeat(segments.len()),
            self.skin
        );
        let bare_entry = is_single_post(&segments);
        let doc = page_document(&page.feed, &stylesheet, bare_entry)?;

        fs::create_dir_all(&dir).map_err(|e| io_at(&dir, e))?;
        let tmp = dir.join(format!("{PAGE_FILE}~"));
        let file = fs::File::create(&tmp).map_err(|e| io_at(&tmp, e))?;
        let mut encoder = GzEncoder::new(file, Compression::best());
        encoder.write_all(&doc).map_err(|e| io_at(&tmp, e))?;
        encoder.finish().map_err(|e| io_at(&tmp, e))?;

        filetime::set_file_mtime(&tmp, updated).map_err(|e| io_at(&tmp, e))?;
        fs::rename(&tmp, &dest).map_err(|e| io_at(&dest, e))?;
        debug!(uri = %uri, bytes = doc.len(), "page written");
        Ok(true)
    }

    fn unpublish(&self, dir: &Path, dest: &Path) -> Result<bool, PublishError> {
        match fs::remove_file(dest) {
            Ok(()) => {
                // Only falls when nothing else lives there.
                let _ = fs::remove_dir(dir);
                info!(path = %dest.display(), "page un-published");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_at(dest, e)),
        }
    }

    fn write_tag_index(&self, feed: &Feed) -> Result<(), PublishError> {
        let dir = self.pub_dir.join(URI_TAGS);
        fs::create_dir_all(&dir).map_err(|e| io_at(&dir, e))?;
        let path = dir.join("index.json");
        let body = serde_json::to_vec(&tag_index_terms(feed))?;
        // Same temp-then-rename dance as the pages; a reader must never
        // see a truncated sidecar.
        let tmp = dir.join("index.json~");
        fs::write(&tmp, body).map_err(|e| io_at(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_at(&path, e))?;
        Ok(())
    }
}

/// `posts/<id>/` and nothing else.
fn is_single_post(segments: &[&str]) -> bool {
    segments.len() == 2 && segments[0] == URI_POSTS
}

/// A single-post page whose entry is gone (or survives only as an
/// unpublished tombstone) gets removed instead of written.
fn is_tombstone(segments: &[&str], page: &Page) -> bool {
    if !is_single_post(segments) {
        return false;
    }
    match page.feed.entries.as_slice() {
        [] => true,
        [only] => only.published.is_none(),
        _ => false,
    }
}

fn is_fresh(dest: &Path, updated: FileTime) -> bool {
    match fs::metadata(dest) {
        Ok(meta) => FileTime::from_last_modification_time(&meta) >= updated,
        Err(_) => false,
    }
}

fn check_base(feed: &Feed) -> Result<(), PublishError> {
    let base = feed
        .xml_base
        .as_deref()
        .ok_or_else(|| PublishError::BaseUrl(String::new()))?;
    let ok = base.ends_with('/')
        && Url::parse(base)
            .map(|u| u.host_str().is_some_and(|h| !h.is_empty()))
            .unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(PublishError::BaseUrl(base.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Category, Text};
    use crate::ident::Id;
    use crate::paginate::page_count;
    use chrono::DateTime;
    use flate2::read::GzDecoder;
    use pretty_assertions::assert_eq;
    use std::io::Read;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "linklog-publish-{name}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn publisher(dir: &Path) -> Publisher {
        Publisher {
            pub_dir: dir.join("pub"),
            skin: "default".to_owned(),
            per_page: 100,
            tz: chrono_tz::UTC,
            lock_path: dir.join("lock"),
        }
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

    fn feed() -> Feed {
        let mut feed = Feed {
            title: Text::plain("testfeed"),
            xml_base: Some("https://example.com/".to_owned()),
            ..Feed::default()
        };
        feed.append(entry("aaa2345", "2021-06-01T12:00:00Z", &["x"]))
            .unwrap();
        feed.append(entry("bbb2345", "2021-06-02T12:00:00Z", &[]))
            .unwrap();
        feed
    }

    fn gunzip(path: &Path) -> String {
        let mut out = String::new();
        GzDecoder::new(fs::File::open(path).unwrap())
            .read_to_string(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_publish_writes_gzipped_pages_for_all_views() {
        let dir = scratch("all-views");
        let p = publisher(&dir);
        let f = feed();
        let modified: Vec<&Entry> = f.entries.iter().collect();

        let written = p.publish_for_modified(&f, &modified, false).unwrap();
        assert!(written >= 6, "wrote only {written} pages");

        for uri in [
            "posts",
            "posts/aaa2345",
            "posts/bbb2345",
            "tags",
            "tags/x",
            "days/2021-06-01",
            "days/2021-06-02",
        ] {
            assert!(
                p.pub_dir.join(uri).join("index.xml").is_file(),
                "missing page {uri}"
            );
        }

        let doc = gunzip(&p.pub_dir.join("posts").join("index.xml"));
        assert!(doc.contains("xml-stylesheet"));
        assert!(doc.contains("href='../assets/default/posts.xslt'"));
        assert!(doc.contains("<feed"));

        // Single-post pages are bare entries with a deeper stylesheet ref.
        let single = gunzip(&p.pub_dir.join("posts/aaa2345").join("index.xml"));
        assert!(!single.contains("<feed"));
        assert!(single.contains("href='../../assets/default/posts.xslt'"));

        // Lock released.
        assert!(!p.lock_path.exists());
    }

    #[test]
    fn test_publish_writes_tag_index_sidecar() {
        let dir = scratch("tag-index");
        let p = publisher(&dir);
        let f = feed();
        let modified: Vec<&Entry> = f.entries.iter().collect();
        p.publish_for_modified(&f, &modified, false).unwrap();

        let body = fs::read_to_string(p.pub_dir.join("tags/index.json")).unwrap();
        let terms: Vec<String> = serde_json::from_str(&body).unwrap();
        assert_eq!(terms, vec!["#x"]);
    }

    #[test]
    fn test_tag_index_lands_by_rename() {
        let dir = scratch("tag-index-rename");
        let p = publisher(&dir);
        let f = feed();
        let modified: Vec<&Entry> = f.entries.iter().collect();
        p.publish_for_modified(&f, &modified, false).unwrap();
        // Rewrite with the tree already populated; the temp file must
        // never survive a completed run.
        p.publish_for_modified(&f, &modified, true).unwrap();

        assert!(p.pub_dir.join("tags/index.json").is_file());
        assert!(!p.pub_dir.join("tags/index.json~").exists());
        // Whatever is at the destination is a complete document.
        let body = fs::read_to_string(p.pub_dir.join("tags/index.json")).unwrap();
        assert!(serde_json::from_str::<Vec<String>>(&body).is_ok());
    }

    #[test]
    fn test_freshness_skips_unchanged_pages() {
        let dir = scratch("freshness");
        let p = publisher(&dir);
        let f = feed();
        let modified: Vec<&Entry> = f.entries.iter().collect();

        p.publish_for_modified(&f, &modified, false).unwrap();
        let written = p.publish_for_modified(&f, &modified, false).unwrap();
        assert_eq!(written, 0, "second run rewrote fresh pages");

        let forced = p.publish_for_modified(&f, &modified, true).unwrap();
        assert!(forced > 0);
    }

    #[test]
    fn test_page_mtime_equals_page_updated() {
        let dir = scratch("mtime");
        let p = publisher(&dir);
        let f = feed();
        let modified: Vec<&Entry> = f.entries.iter().collect();
        p.publish_for_modified(&f, &modified, false).unwrap();

        let meta = fs::metadata(p.pub_dir.join("posts/bbb2345/index.xml")).unwrap();
        let mtime = FileTime::from_last_modification_time(&meta);
        assert_eq!(
            mtime.unix_seconds(),
            DateTime::parse_from_rfc3339("2021-06-02T12:00:00Z")
                .unwrap()
                .timestamp()
        );
    }

    #[test]
    fn test_delete_unpublishes_single_post_page() {
        let dir = scratch("unpublish");
        let p = publisher(&dir);
        let mut f = feed();
        let modified: Vec<&Entry> = f.entries.iter().collect();
        p.publish_for_modified(&f, &modified, false).unwrap();

        let gone = f.delete_by_id(&Id::from("aaa2345")).unwrap();
        p.publish_for_modified(&f, &[&gone], true).unwrap();

        assert!(!p.pub_dir.join("posts/aaa2345").exists());
        // The shared views survive, without the deleted entry.
        let doc = gunzip(&p.pub_dir.join("posts").join("index.xml"));
        assert!(!doc.contains("aaa2345"));
        assert!(doc.contains("bbb2345"));
    }

    #[test]
    fn test_publish_rejects_missing_or_relative_base() {
        let dir = scratch("base");
        let p = publisher(&dir);
        let mut f = feed();

        f.xml_base = None;
        assert!(matches!(
            p.publish_for_modified(&f, &[], false),
            Err(PublishError::BaseUrl(_))
        ));

        f.xml_base = Some("/no/host/".to_owned());
        assert!(matches!(
            p.publish_for_modified(&f, &[], false),
            Err(PublishError::BaseUrl(_))
        ));

        f.xml_base = Some("https://example.com/sub".to_owned());
        assert!(matches!(
            p.publish_for_modified(&f, &[], false),
            Err(PublishError::BaseUrl(_))
        ));
    }

    #[test]
    fn test_pagination_on_disk_layout() {
        let dir = scratch("paging");
        let mut p = publisher(&dir);
        p.per_page = 10;

        let mut f = Feed {
            title: Text::plain("big"),
            xml_base: Some("https://example.com/".to_owned()),
            ..Feed::default()
        };
        for i in 0..25 {
            let at = DateTime::parse_from_rfc3339("2021-06-01T00:00:00Z").unwrap()
                + chrono::Duration::seconds(i);
            f.append(entry(&format!("x{i:02}abcd"), &at.to_rfc3339(), &[]))
                .unwrap();
        }
        let modified: Vec<&Entry> = f.entries.iter().collect();
        p.publish_for_modified(&f, &modified, false).unwrap();

        assert_eq!(page_count(25, 10), 3);
        assert!(p.pub_dir.join("posts-0/index.xml").is_file());
        assert!(p.pub_dir.join("posts-1/index.xml").is_file());
        assert!(p.pub_dir.join("posts/index.xml").is_file());
        // Oldest page absorbs the remainder.
        let oldest = gunzip(&p.pub_dir.join("posts/index.xml"));
        assert_eq!(oldest.matches("<entry").count(), 5);
    }
}
