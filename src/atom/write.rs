//! Atom serialization: indented XML with the publication preamble.
//!
//! Every published page opens with the XML declaration, an
//! `xml-stylesheet` processing instruction and a long decoy comment.
//! The comment is load-bearing: browsers sniff the first 512 bytes for a
//! feed root element and would refuse to apply the stylesheet, so the
//! root must sit beyond that window.

use quick_xml::events::{BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

use super::model::{Category, Entry, Feed, GeoPoint, Link, Person, Text};
use super::AtomError;
use crate::views::URI_POSTS;
use chrono::SecondsFormat;
use url::Url;

pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
pub const MEDIA_NS: &str = "http://search.yahoo.com/mrss/";
pub const GEORSS_NS: &str = "http://www.georss.org/georss";

/// Pads the root element past the 512-byte feed-sniffing window.
// https://bugzilla.mozilla.org/show_bug.cgi?id=338621#c72
const SNIFF_DECOY: &str = " https://developer.mozilla.org/en/docs/XSL_Transformations_in_Mozilla_FAQ#Why_isn.27t_my_stylesheet_applied.3F

  Note that Firefox will override your XSLT stylesheet if your XML is
  detected as an RSS or Atom feed. A known workaround is to add a
  sufficiently long XML comment to the beginning of your XML file in
  order to 'push' the <.feed> or <.rss> tag out of the first 512 bytes,
  which is analyzed by Firefox to determine if it's a feed or not. See
  the discussion on bug
  https://bugzilla.mozilla.org/show_bug.cgi?id=338621#c72 for more
  information.

  For best results serve both atom feed and xslt as 'text/xml' or
  'application/xml' without charset specified.
";

/// Serialize one page document: preamble plus either the whole feed or,
/// for a single-post view holding one entry, the bare entry.
pub fn page_document(
    feed: &Feed,
    stylesheet_href: &str,
    bare_entry: bool,
) -> Result<Vec<u8>, AtomError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    write_preamble(&mut writer, Some(stylesheet_href))?;
    match feed.entries.first() {
        Some(entry) if bare_entry && feed.entries.len() == 1 => {
            write_entry(&mut writer, entry, feed, true)?;
        }
        _ => write_feed(&mut writer, feed)?,
    }
    Ok(writer.into_inner().into_inner())
}

/// Serialize the canonical storage document: declaration only, no
/// stylesheet and no decoy, since nothing ever serves it to a browser.
pub fn storage_document(feed: &Feed) -> Result<Vec<u8>, AtomError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    write_preamble(&mut writer, None)?;
    write_feed(&mut writer, feed)?;
    Ok(writer.into_inner().into_inner())
}

fn write_preamble<W: std::io::Write>(
    writer: &mut Writer<W>,
    stylesheet_href: Option<&str>,
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    if let Some(href) = stylesheet_href {
        writer.write_event(Event::PI(BytesPI::new(format!(
            "xml-stylesheet type='text/xsl' href='{href}'"
        ))))?;
        writer.write_event(Event::Comment(BytesText::from_escaped(SNIFF_DECOY)))?;
    }
    Ok(())
}

fn write_feed<W: std::io::Write>(writer: &mut Writer<W>, feed: &Feed) -> Result<(), quick_xml::Error> {
    let mut root = BytesStart::new("feed");
    root.push_attribute(("xmlns", ATOM_NS));
    root.push_attribute(("xmlns:media", MEDIA_NS));
    root.push_attribute(("xmlns:georss", GEORSS_NS));
    if let Some(base) = &feed.xml_base {
        root.push_attribute(("xml:base", base.as_str()));
    }
    if let Some(lang) = &feed.lang {
        root.push_attribute(("xml:lang", lang.as_str()));
    }
    writer.write_event(Event::Start(root))?;

    write_text(writer, "title", &feed.title)?;
    if let Some(subtitle) = &feed.subtitle {
        write_text(writer, "subtitle", subtitle)?;
    }
    write_simple(writer, "id", &absolute_feed_id(feed))?;
    write_simple(writer, "updated", &rfc3339(feed.updated))?;
    if let Some(generator) = &feed.generator {
        let mut start = BytesStart::new("generator");
        if let Some(uri) = &generator.uri {
            start.push_attribute(("uri", uri.as_str()));
        }
        if let Some(version) = &generator.version {
            start.push_attribute(("version", version.as_str()));
        }
        writer.write_event(Event::Start(start))?;
        writer.write_event(Event::Text(BytesText::new(&generator.body)))?;
        writer.write_event(Event::End(BytesEnd::new("generator")))?;
    }
    for link in &feed.links {
        write_link(writer, link)?;
    }
    for category in &feed.categories {
        write_category(writer, category)?;
    }
    for person in &feed.authors {
        write_person(writer, person)?;
    }
    for entry in &feed.entries {
        write_entry(writer, entry, feed, false)?;
    }

    writer.write_event(Event::End(BytesEnd::new("feed")))?;
    Ok(())
}

fn write_entry<W: std::io::Write>(
    writer: &mut Writer<W>,
    entry: &Entry,
    feed: &Feed,
    root: bool,
) -> Result<(), quick_xml::Error> {
    let mut start = BytesStart::new("entry");
    if root {
        start.push_attribute(("xmlns", ATOM_NS));
        start.push_attribute(("xmlns:media", MEDIA_NS));
        start.push_attribute(("xmlns:georss", GEORSS_NS));
        if let Some(base) = &feed.xml_base {
            start.push_attribute(("xml:base", base.as_str()));
        }
    }
    if let Some(lang) = &entry.lang {
        start.push_attribute(("xml:lang", lang.as_str()));
    }
    writer.write_event(Event::Start(start))?;

    write_text(writer, "title", &entry.title)?;
    write_simple(writer, "id", &absolute_entry_id(entry, feed))?;
    write_simple(writer, "updated", &rfc3339(entry.updated))?;
    if let Some(published) = entry.published {
        write_simple(writer, "published", &rfc3339(published))?;
    }
    for link in &entry.links {
        write_link(writer, link)?;
    }
    for category in &entry.categories {
        write_category(writer, category)?;
    }
    for person in &entry.authors {
        write_person(writer, person)?;
    }
    if let Some(summary) = &entry.summary {
        write_text(writer, "summary", summary)?;
    }
    if let Some(content) = &entry.content {
        write_text(writer, "content", content)?;
    }
    if let Some(url) = &entry.media_thumbnail {
        let mut thumb = BytesStart::new("media:thumbnail");
        thumb.push_attribute(("url", url.as_str()));
        writer.write_event(Event::Empty(thumb))?;
    }
    if let Some(GeoPoint { lat, lon }) = entry.geo_point {
        write_simple(writer, "georss:point", &format!("{lat:.6} {lon:.6}"))?;
    }

    writer.write_event(Event::End(BytesEnd::new("entry")))?;
    Ok(())
}

fn write_text<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &Text,
) -> Result<(), quick_xml::Error> {
    let mut start = BytesStart::new(name);
    if let Some(kind) = text.kind {
        start.push_attribute(("type", kind.as_str()));
    }
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Text(BytesText::new(&text.body)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_simple<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_link<W: std::io::Write>(writer: &mut Writer<W>, link: &Link) -> Result<(), quick_xml::Error> {
    let mut start = BytesStart::new("link");
    start.push_attribute(("href", link.href.as_str()));
    if let Some(rel) = &link.rel {
        start.push_attribute(("rel", rel.as_str()));
    }
    if let Some(mime_type) = &link.mime_type {
        start.push_attribute(("type", mime_type.as_str()));
    }
    if let Some(title) = &link.title {
        start.push_attribute(("title", title.as_str()));
    }
    writer.write_event(Event::Empty(start))?;
    Ok(())
}

fn write_category<W: std::io::Write>(
    writer: &mut Writer<W>,
    category: &Category,
) -> Result<(), quick_xml::Error> {
    let mut start = BytesStart::new("category");
    start.push_attribute(("term", category.term.as_str()));
    if let Some(scheme) = &category.scheme {
        start.push_attribute(("scheme", scheme.as_str()));
    }
    if let Some(label) = &category.label {
        start.push_attribute(("label", label.as_str()));
    }
    writer.write_event(Event::Empty(start))?;
    Ok(())
}

fn write_person<W: std::io::Write>(
    writer: &mut Writer<W>,
    person: &Person,
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new("author")))?;
    write_simple(writer, "name", &person.name)?;
    if let Some(email) = &person.email {
        write_simple(writer, "email", email)?;
    }
    if let Some(uri) = &person.uri {
        write_simple(writer, "uri", uri)?;
    }
    writer.write_event(Event::End(BytesEnd::new("author")))?;
    Ok(())
}

fn rfc3339(at: chrono::DateTime<chrono::FixedOffset>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Feed validators require expanded ids; a view id is its relative URI
/// and gets resolved against `xml:base` when one is set.
fn absolute_feed_id(feed: &Feed) -> String {
    resolve(feed.xml_base.as_deref(), &feed.id)
}

/// Entry ids expand to the permalink of their single-post page.
fn absolute_entry_id(entry: &Entry, feed: &Feed) -> String {
    match feed.xml_base.as_deref() {
        Some(base) => resolve(Some(base), &format!("{URI_POSTS}/{}/", entry.id)),
        None => entry.id.to_string(),
    }
}

fn resolve(base: Option<&str>, reference: &str) -> String {
    if Url::parse(reference).is_ok() {
        return reference.to_owned();
    }
    match base.and_then(|b| Url::parse(b).ok()) {
        Some(base) => base
            .join(reference)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| reference.to_owned()),
        None => reference.to_owned(),
    }
}
