use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use linklog::atom::{Link, Text, TextKind, REL_ALTERNATE};
use linklog::{configure_feed, storage, tags, Config, Entry, Id, Publisher};

#[derive(Parser, Debug)]
#[command(name = "linklog", about = "Self-hosted link log with Atom feed publication")]
struct Args {
    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = "linklog.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Republish all feed pages
    Publish {
        /// Rewrite pages even when they are up to date
        #[arg(long)]
        force: bool,
    },
    /// Add a bookmark and publish the affected pages
    Add {
        /// External URL to bookmark (omit for a plain note)
        url: Option<String>,

        #[arg(long, default_value = "")]
        title: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Extra tags, merged with the #tags found in title and description
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Delete an entry and un-publish its pages
    Delete {
        /// Entry id, permalink token or bookmarked URL
        token: String,
    },
    /// Validate the configuration and the canonical feed
    Check,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config).context("Failed to load configuration")?;

    match args.command {
        Command::Publish { force } => publish(&config, force),
        Command::Add {
            url,
            title,
            description,
            tags,
        } => add(&config, url, &title, &description, &tags),
        Command::Delete { token } => delete(&config, &token),
        Command::Check => check(&config),
    }
}

fn publish(config: &Config, force: bool) -> Result<()> {
    let mut feed = storage::load_feed(&config.feed_path())?;
    configure_feed(&mut feed, config);

    let publisher = Publisher::from_config(config)?;
    let modified: Vec<&Entry> = feed.entries.iter().collect();
    let written = publisher.publish_for_modified(&feed, &modified, force)?;
    println!("{written} page(s) written");
    Ok(())
}

fn add(
    config: &Config,
    url: Option<String>,
    title: &str,
    description: &str,
    explicit_tags: &[String],
) -> Result<()> {
    let mut feed = storage::load_feed(&config.feed_path())?;
    configure_feed(&mut feed, config);

    let known: Vec<String> = feed
        .aggregate_categories()
        .into_iter()
        .map(|c| c.term)
        .collect();
    let normalised = tags::normalise(title, description, explicit_tags, &known);

    let now = Utc::now().fixed_offset();
    let mut entry = Entry {
        id: Id::new_unique(&feed, now)?,
        title: Text::plain(normalised.title),
        updated: now,
        published: Some(now),
        categories: normalised
            .tags
            .iter()
            .map(|t| linklog::atom::Category::term(t.clone()))
            .collect(),
        ..Entry::default()
    };
    if !normalised.body.is_empty() {
        entry.content = Some(Text {
            body: normalised.body,
            kind: Some(TextKind::Plain),
        });
    }
    if let Some(url) = url {
        entry.links.push(Link::new(REL_ALTERNATE, url));
    }

    let id = feed.append(entry)?.id.clone();
    storage::save_feed(&feed, &config.feed_path())?;

    let publisher = Publisher::from_config(config)?;
    let modified = feed
        .find_by_id(&id)
        .context("entry vanished after append")?;
    publisher.publish_for_modified(&feed, &[modified], false)?;
    println!("{id}");
    Ok(())
}

fn delete(config: &Config, token: &str) -> Result<()> {
    let mut feed = storage::load_feed(&config.feed_path())?;
    configure_feed(&mut feed, config);

    let Some(id) = feed.find_by_id_self_or_url(token).map(|e| e.id.clone()) else {
        bail!("No entry matches {token:?}");
    };
    let prior = feed
        .delete_by_id(&id)
        .context("entry vanished before delete")?;
    storage::save_feed(&feed, &config.feed_path())?;

    let publisher = Publisher::from_config(config)?;
    publisher.publish_for_modified(&feed, &[&prior], true)?;
    println!("deleted {id}");
    Ok(())
}

fn check(config: &Config) -> Result<()> {
    config.tz().context("Invalid timezone")?;
    let feed = storage::load_feed(&config.feed_path())?;
    for entry in &feed.entries {
        entry
            .validate()
            .with_context(|| format!("entry {}", entry.id))?;
    }
    println!(
        "ok: {} entries, {} tags",
        feed.entries.len(),
        feed.aggregate_categories().len()
    );
    Ok(())
}
