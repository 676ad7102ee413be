//! Parse stored Atom documents back into the model.
//!
//! Only feed-rooted documents occur in storage, so that is all this
//! parser accepts. Unknown elements are skipped wholesale; the writer
//! and parser agree on prefixes, but matching happens on local names so
//! a renamed namespace prefix still parses.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::model::{Category, Entry, Feed, Generator, GeoPoint, Link, Person, Text, TextKind};
use super::AtomError;
use crate::ident::Id;
use chrono::{DateTime, FixedOffset};

pub fn parse_feed(xml: &str) -> Result<Feed, AtomError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                return match start.local_name().as_ref() {
                    b"feed" => read_feed(&mut reader, &start),
                    other => Err(AtomError::Malformed(format!(
                        "unexpected root element {:?}",
                        String::from_utf8_lossy(other)
                    ))),
                };
            }
            Event::Eof => {
                return Err(AtomError::Malformed("document has no root element".into()))
            }
            // Declaration, stylesheet instruction, decoy comment.
            _ => {}
        }
    }
}

fn read_feed(reader: &mut Reader<&[u8]>, root: &BytesStart) -> Result<Feed, AtomError> {
    let mut feed = Feed::default();
    for attr in root.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let value = attr.decode_and_unescape_value(reader.decoder())?.into_owned();
        match attr.key.as_ref() {
            b"xml:base" => feed.xml_base = Some(value),
            b"xml:lang" => feed.lang = Some(value),
            _ => {}
        }
    }

    loop {
        match reader.read_event()? {
            Event::Start(start) => match start.local_name().as_ref() {
                b"title" => feed.title = read_text_construct(reader, &start)?,
                b"subtitle" => feed.subtitle = Some(read_text_construct(reader, &start)?),
                b"id" => feed.id = element_text(reader, &start)?,
                b"updated" => feed.updated = timestamp(&element_text(reader, &start)?)?,
                b"generator" => feed.generator = Some(read_generator(reader, &start)?),
                b"author" => feed.authors.push(read_person(reader, &start)?),
                b"link" => {
                    feed.links.push(read_link(reader, &start)?);
                    skip(reader, &start)?;
                }
                b"category" => {
                    feed.categories.push(read_category(reader, &start)?);
                    skip(reader, &start)?;
                }
                b"entry" => feed.entries.push(read_entry(reader, &start)?),
                _ => skip(reader, &start)?,
            },
            Event::Empty(start) => match start.local_name().as_ref() {
                b"link" => feed.links.push(read_link(reader, &start)?),
                b"category" => feed.categories.push(read_category(reader, &start)?),
                _ => {}
            },
            Event::End(_) => return Ok(feed),
            Event::Eof => return Err(AtomError::Malformed("unclosed feed element".into())),
            _ => {}
        }
    }
}

fn read_entry(reader: &mut Reader<&[u8]>, root: &BytesStart) -> Result<Entry, AtomError> {
    let mut entry = Entry::default();
    for attr in root.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == b"xml:lang" {
            entry.lang = Some(attr.decode_and_unescape_value(reader.decoder())?.into_owned());
        }
    }

    loop {
        match reader.read_event()? {
            Event::Start(start) => match start.local_name().as_ref() {
                b"title" => entry.title = read_text_construct(reader, &start)?,
                b"summary" => entry.summary = Some(read_text_construct(reader, &start)?),
                b"content" => entry.content = Some(read_text_construct(reader, &start)?),
                b"id" => entry.id = Id::from(element_text(reader, &start)?),
                b"updated" => entry.updated = timestamp(&element_text(reader, &start)?)?,
                b"published" => {
                    entry.published = Some(timestamp(&element_text(reader, &start)?)?)
                }
                b"author" => entry.authors.push(read_person(reader, &start)?),
                b"link" => {
                    entry.links.push(read_link(reader, &start)?);
                    skip(reader, &start)?;
                }
                b"category" => {
                    entry.categories.push(read_category(reader, &start)?);
                    skip(reader, &start)?;
                }
                b"point" => entry.geo_point = Some(geo_point(&element_text(reader, &start)?)?),
                _ => skip(reader, &start)?,
            },
            Event::Empty(start) => match start.local_name().as_ref() {
                b"link" => entry.links.push(read_link(reader, &start)?),
                b"category" => entry.categories.push(read_category(reader, &start)?),
                b"thumbnail" => {
                    entry.media_thumbnail = attribute(reader, &start, b"url")?;
                }
                _ => {}
            },
            Event::End(_) => return Ok(entry),
            Event::Eof => return Err(AtomError::Malformed("unclosed entry element".into())),
            _ => {}
        }
    }
}

fn read_person(reader: &mut Reader<&[u8]>, _root: &BytesStart) -> Result<Person, AtomError> {
    let mut person = Person::default();
    loop {
        match reader.read_event()? {
            Event::Start(start) => match start.local_name().as_ref() {
                b"name" => person.name = element_text(reader, &start)?,
                b"email" => person.email = Some(element_text(reader, &start)?),
                b"uri" => person.uri = Some(element_text(reader, &start)?),
                _ => skip(reader, &start)?,
            },
            Event::End(_) => return Ok(person),
            Event::Eof => return Err(AtomError::Malformed("unclosed author element".into())),
            _ => {}
        }
    }
}

fn read_generator(
    reader: &mut Reader<&[u8]>,
    root: &BytesStart,
) -> Result<Generator, AtomError> {
    let mut generator = Generator {
        uri: attribute(reader, root, b"uri")?,
        version: attribute(reader, root, b"version")?,
        body: String::new(),
    };
    generator.body = element_text(reader, root)?;
    Ok(generator)
}

fn read_link(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Link, AtomError> {
    let mut link = Link::default();
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let value = attr.decode_and_unescape_value(reader.decoder())?.into_owned();
        match attr.key.as_ref() {
            b"href" => link.href = value,
            b"rel" => link.rel = Some(value),
            b"title" => link.title = Some(value),
            b"type" => link.mime_type = Some(value),
            _ => {}
        }
    }
    Ok(link)
}

fn read_category(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Category, AtomError> {
    let mut category = Category::default();
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let value = attr.decode_and_unescape_value(reader.decoder())?.into_owned();
        match attr.key.as_ref() {
            b"term" => category.term = value,
            b"scheme" => category.scheme = Some(value),
            b"label" => category.label = Some(value),
            _ => {}
        }
    }
    Ok(category)
}

fn read_text_construct(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
) -> Result<Text, AtomError> {
    let kind = attribute(reader, start, b"type")?.and_then(|t| TextKind::parse(&t));
    Ok(Text {
        body: element_text(reader, start)?,
        kind,
    })
}

fn attribute(
    reader: &Reader<&[u8]>,
    start: &BytesStart,
    name: &[u8],
) -> Result<Option<String>, AtomError> {
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == name {
            return Ok(Some(
                attr.decode_and_unescape_value(reader.decoder())?.into_owned(),
            ));
        }
    }
    Ok(None)
}

/// Concatenated character data up to the matching end tag. Nested markup
/// is dropped, only its text survives.
fn element_text(reader: &mut Reader<&[u8]>, _start: &BytesStart) -> Result<String, AtomError> {
    let mut body = String::new();
    let mut depth = 0usize;
    loop {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    return Ok(body);
                }
                depth -= 1;
            }
            Event::Text(t) => body.push_str(&t.unescape()?),
            Event::CData(t) => {
                body.push_str(&String::from_utf8_lossy(&t));
            }
            Event::Eof => return Err(AtomError::Malformed("unclosed element".into())),
            _ => {}
        }
    }
}

fn skip(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<(), AtomError> {
    reader.read_to_end(start.name())?;
    Ok(())
}

fn timestamp(s: &str) -> Result<DateTime<FixedOffset>, AtomError> {
    DateTime::parse_from_rfc3339(s.trim())
        .map_err(|e| AtomError::Malformed(format!("bad timestamp {s:?}: {e}")))
}

fn geo_point(s: &str) -> Result<GeoPoint, AtomError> {
    let mut parts = s.split_whitespace();
    let (Some(lat), Some(lon), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(AtomError::Malformed(format!("bad georss point {s:?}")));
    };
    let parse = |v: &str| {
        v.parse::<f64>()
            .map_err(|e| AtomError::Malformed(format!("bad georss point {s:?}: {e}")))
    };
    Ok(GeoPoint {
        lat: parse(lat)?,
        lon: parse(lon)?,
    })
}
