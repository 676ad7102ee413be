//! linklog — feed-publication engine for a self-hosted link log.
//!
//! The canonical state is a single Atom feed file. Every mutation
//! (add, edit, delete) re-derives the affected views — all posts, one
//! page per entry, per tag, per calendar day plus a tag index — splits
//! them into RFC 5005 paged feeds and republishes them as gzipped,
//! XSLT-linked XML files a dumb web server can serve as-is.

pub mod atom;
pub mod config;
pub mod ident;
pub mod paginate;
pub mod publish;
pub mod storage;
pub mod tags;
pub mod views;

pub use atom::{Entry, Feed};
pub use config::Config;
pub use ident::Id;
pub use publish::{PublishError, Publisher};

use atom::{Generator, Person, Text};

/// Stamp the deployment-dependent feed metadata from the configuration
/// onto a loaded canonical feed. Storage strips these fields, so this
/// runs after every [`storage::load_feed`].
pub fn configure_feed(feed: &mut Feed, config: &Config) {
    feed.title = Text::plain(config.title.clone());
    feed.xml_base = Some(config.base_url.clone());
    feed.generator = Some(Generator {
        uri: Some("https://github.com/linklog/linklog".to_owned()),
        version: Some(env!("CARGO_PKG_VERSION").to_owned()),
        body: "linklog".to_owned(),
    });
    if !config.author.is_empty() && feed.authors.is_empty() {
        feed.authors.push(Person {
            name: config.author.clone(),
            email: None,
            uri: None,
        });
    }
    if let Some(updated) = feed.entries.iter().map(|e| e.updated).max() {
        feed.updated = updated;
    }
}

impl Publisher {
    /// Wire a publisher up from the configuration.
    pub fn from_config(config: &Config) -> Result<Self, config::ConfigError> {
        Ok(Publisher {
            pub_dir: config.pub_dir.clone(),
            skin: config.skin.clone(),
            per_page: config.links_per_page.max(1),
            tz: config.tz()?,
            lock_path: config.lock_path(),
        })
    }
}
