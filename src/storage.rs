//! Canonical feed persistence: one Atom XML file, gzip or plain.
//!
//! The stored document is the source of truth. Derived feed metadata
//! (the view id, base URL, generator, aggregated categories, the feed
//! `updated`) is stripped before saving and reestablished by the caller
//! from configuration, so a config change never requires a data
//! migration.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::atom::{epoch, parse_feed, storage_document, AtomError, Feed};
use crate::ident::{Id, ID_LEN};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path}: not valid UTF-8")]
    Encoding { path: PathBuf },

    #[error(transparent)]
    Atom(#[from] AtomError),
}

fn io_at(path: &Path, source: io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_owned(),
        source,
    }
}

/// Load the canonical feed. A missing file is an empty feed, not an
/// error; first runs have nothing to load yet.
pub fn load_feed(path: &Path) -> Result<Feed, StorageError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no feed file yet, starting empty");
            return Ok(Feed::default());
        }
        Err(e) => return Err(io_at(path, e)),
    };

    let xml = if raw.starts_with(&GZIP_MAGIC) {
        let mut xml = String::new();
        GzDecoder::new(raw.as_slice())
            .read_to_string(&mut xml)
            .map_err(|e| io_at(path, e))?;
        xml
    } else {
        String::from_utf8(raw).map_err(|_| StorageError::Encoding {
            path: path.to_owned(),
        })?
    };

    let mut feed = parse_feed(&xml)?;
    migrate_legacy_ids(&mut feed);
    feed.sort_entries();
    debug!(path = %path.display(), entries = feed.entries.len(), "feed loaded");
    Ok(feed)
}

/// Pre-migration stores used 6-character base64url ids. Rewrite them on
/// load; saving afterwards makes the migration stick.
fn migrate_legacy_ids(feed: &mut Feed) {
    for entry in &mut feed.entries {
        if entry.id.as_str().chars().count() == ID_LEN {
            continue;
        }
        match Id::from_legacy_base64(entry.id.as_str()) {
            Ok(id) => {
                info!(old = %entry.id, new = %id, "migrated legacy entry id");
                entry.id = id;
            }
            Err(e) => warn!(id = %entry.id, error = %e, "unrecognized entry id kept as-is"),
        }
    }
}

/// Persist the canonical feed: strip derived metadata, serialize, write
/// to a `~` temp file and rename over the destination. The previous
/// version is kept as `.bak`, best effort.
pub fn save_feed(feed: &Feed, path: &Path) -> Result<(), StorageError> {
    let mut canonical = feed.clone();
    canonical.id = String::new();
    canonical.xml_base = None;
    canonical.generator = None;
    canonical.categories = Vec::new();
    canonical.updated = epoch();
    canonical.sort_entries();

    let doc = storage_document(&canonical)?;

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| io_at(dir, e))?;
    }
    if path.exists() {
        let bak = path.with_extension("atom.bak");
        if let Err(e) = fs::copy(path, &bak) {
            warn!(path = %bak.display(), error = %e, "could not keep backup");
        }
    }

    let tmp = tmp_path(path);
    fs::write(&tmp, &doc).map_err(|e| io_at(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_at(path, e))?;
    debug!(path = %path.display(), entries = canonical.entries.len(), "feed saved");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("~");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Category, Entry, Link, Text, REL_ALTERNATE};
    use chrono::DateTime;
    use flate2::{write::GzEncoder, Compression};
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "linklog-storage-{name}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn entry(id: &str, published: &str) -> Entry {
        Entry {
            id: Id::from(id),
            title: Text::plain(format!("entry {id}")),
            updated: DateTime::parse_from_rfc3339(published).unwrap(),
            published: Some(DateTime::parse_from_rfc3339(published).unwrap()),
            categories: vec![Category::term("tag")],
            links: vec![Link::new(REL_ALTERNATE, "https://example.com/x")],
            ..Entry::default()
        }
    }

    #[test]
    fn test_round_trip_preserves_entries() {
        let dir = scratch("roundtrip");
        let path = dir.join("pub.atom");

        let mut feed = Feed {
            title: Text::plain("store"),
            ..Feed::default()
        };
        feed.append(entry("aaa2345", "2021-06-01T12:00:00Z")).unwrap();
        feed.append(entry("bbb2345", "2021-06-02T12:00:00Z")).unwrap();

        save_feed(&feed, &path).unwrap();
        let loaded = load_feed(&path).unwrap();

        assert_eq!(loaded.title, feed.title);
        assert_eq!(loaded.entries.len(), 2);
        assert_eq!(loaded.entries[0].id.as_str(), "bbb2345");
        assert_eq!(loaded.entries[0].updated, feed.entries[0].updated);
        assert_eq!(loaded.entries[0].categories[0].term, "tag");
        assert_eq!(
            loaded.entries[0].links[0].href,
            "https://example.com/x"
        );
    }

    #[test]
    fn test_save_strips_derived_metadata() {
        let dir = scratch("strip");
        let path = dir.join("pub.atom");

        let mut feed = Feed {
            title: Text::plain("store"),
            id: "posts/".to_owned(),
            xml_base: Some("https://example.com/".to_owned()),
            updated: DateTime::parse_from_rfc3339("2021-06-01T12:00:00Z").unwrap(),
            ..Feed::default()
        };
        feed.categories = vec![Category::term("derived")];
        feed.append(entry("aaa2345", "2021-06-01T12:00:00Z")).unwrap();

        save_feed(&feed, &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("xml:base"));
        assert!(!text.contains("derived"));
        assert!(!text.contains("posts/"));

        let loaded = load_feed(&path).unwrap();
        assert_eq!(loaded.updated, epoch());
        // The in-memory feed is untouched.
        assert!(feed.xml_base.is_some());
    }

    #[test]
    fn test_load_missing_file_is_empty_feed() {
        let dir = scratch("missing");
        let feed = load_feed(&dir.join("absent.atom")).unwrap();
        assert!(feed.entries.is_empty());
    }

    #[test]
    fn test_load_autodetects_gzip() {
        let dir = scratch("gzip");
        let path = dir.join("pub.atom");

        let mut feed = Feed::default();
        feed.append(entry("aaa2345", "2021-06-01T12:00:00Z")).unwrap();
        let doc = storage_document(&feed).unwrap();

        let mut enc = GzEncoder::new(fs::File::create(&path).unwrap(), Compression::best());
        enc.write_all(&doc).unwrap();
        enc.finish().unwrap();

        let loaded = load_feed(&path).unwrap();
        assert_eq!(loaded.entries.len(), 1);
    }

    #[test]
    fn test_load_migrates_legacy_ids() {
        let dir = scratch("legacy");
        let path = dir.join("pub.atom");

        let mut feed = Feed::default();
        feed.append(entry("voo8Uo", "2021-06-01T12:00:00Z")).unwrap();
        fs::write(&path, storage_document(&feed).unwrap()).unwrap();

        let loaded = load_feed(&path).unwrap();
        let id = &loaded.entries[0].id;
        assert_eq!(id.as_str().chars().count(), ID_LEN);
        assert_eq!(*id, Id::from_legacy_base64("voo8Uo").unwrap());
    }

    #[test]
    fn test_save_keeps_backup_of_previous_version() {
        let dir = scratch("backup");
        let path = dir.join("pub.atom");

        let mut feed = Feed::default();
        feed.append(entry("aaa2345", "2021-06-01T12:00:00Z")).unwrap();
        save_feed(&feed, &path).unwrap();

        feed.append(entry("bbb2345", "2021-06-02T12:00:00Z")).unwrap();
        save_feed(&feed, &path).unwrap();

        let bak = load_feed(&dir.join("pub.atom.bak")).unwrap();
        assert_eq!(bak.entries.len(), 1);
        let cur = load_feed(&path).unwrap();
        assert_eq!(cur.entries.len(), 2);
    }
}
