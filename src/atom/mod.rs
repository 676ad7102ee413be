//! Atom feed model, parser and writer.
//!
//! [`model`] carries the data types shared by the canonical store and
//! every derived view, [`read`] parses stored documents back and
//! [`write`] renders both storage and publication documents.

pub mod model;
pub mod read;
pub mod write;

pub use model::{
    epoch, validate_external_link, Category, Entry, Feed, Generator, GeoPoint, Link, Person, Text,
    TextKind, ValidationError, REL_ALTERNATE, REL_EDIT, REL_FIRST, REL_LAST, REL_NEXT,
    REL_PREVIOUS, REL_SELF,
};
pub use read::parse_feed;
pub use write::{page_document, storage_document};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtomError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed feed document: {0}")]
    Malformed(String),
}
