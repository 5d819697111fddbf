mod cache;
mod db;
mod error;
mod fetcher;
mod invalidate;
mod manifest;
mod output;
mod parser;
mod settings;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use settings::{FeedConfig, Settings};

#[derive(Parser)]
#[command(name = "enews_feed", about = "School e-newsletter and blog item feed builder")]
struct Cli {
    /// Config file (default: ./enews.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the cache database
    Init,
    /// Discover and download newsletters and posts into the document cache
    Fetch {
        /// Only this feed (slug from the config)
        #[arg(short, long)]
        feed: Option<String>,
        /// Max documents per feed
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Fetch, segment, dedupe and write one JSON item file per feed
    Run {
        /// Only this feed (slug from the config)
        #[arg(short, long)]
        feed: Option<String>,
        /// Items kept per feed (default: item_limit from the config)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Keep earliest dates across runs in the seen-items table
        #[arg(long)]
        remember: bool,
    },
    /// Run the pipeline over locally saved pages listed in a manifest
    Parse {
        /// JSON array of {url, title, kind, markup_path, date}
        manifest: PathBuf,
        /// Drop items cross-posted from other blogs than this one
        #[arg(long)]
        feed_url: Option<String>,
        /// Write here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Delete cached documents and parse results. Item filters are ANDed and
    /// matched against the written `<slug>-items.json` files.
    Invalidate {
        /// Source URL to drop (repeatable)
        #[arg(long = "url")]
        urls: Vec<String>,
        /// Drop every entry
        #[arg(
            long,
            conflicts_with_all = ["urls", "feeds", "item_id", "since_date", "most_recent_n"]
        )]
        all: bool,
        /// Feed slugs, comma-separated, or "all"
        #[arg(long = "feed", value_delimiter = ',', conflicts_with = "urls")]
        feeds: Vec<String>,
        /// Exact item identity (the `hash` field)
        #[arg(long, conflicts_with = "urls")]
        item_id: Option<String>,
        /// Items dated on or after this (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)
        #[arg(long, conflicts_with = "urls")]
        since_date: Option<String>,
        /// Only the N newest matching items
        #[arg(long, conflicts_with = "urls")]
        most_recent_n: Option<usize>,
        /// Directory holding the item files (default: output_dir from the config)
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Keep documents, drop only parse results
        #[arg(long)]
        parsed_only: bool,
        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Show cache statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect(&settings.database)?;
            db::init_schema(&conn)?;
            println!("Initialized {}", settings.database);
            if settings.feeds.is_empty() {
                println!(
                    "No feeds configured. Add [[feeds]] entries to {}.",
                    settings::DEFAULT_CONFIG_FILE
                );
            }
            for f in &settings.feeds {
                println!("  {:<8} {:<40} {}", f.slug, f.blog_url, f.description);
            }
            Ok(())
        }
        Commands::Fetch { feed, limit } => {
            let feeds = selected_feeds(&settings, feed.as_deref())?;
            let conn = db::connect(&settings.database)?;
            db::init_schema(&conn)?;
            let client = fetcher::client()?;
            let rules = settings.discovery();

            for f in feeds {
                let mut targets =
                    fetcher::discover(&client, &f.blog_url, &rules).await?;
                if let Some(n) = limit {
                    targets.truncate(n);
                }
                let (_, stats) =
                    fetcher::fetch_documents(&conn, &client, targets, settings.concurrency).await?;
                println!(
                    "{}: {} documents ({} cached, {} fetched, {} errors)",
                    f.slug, stats.total, stats.cached, stats.fetched, stats.errors
                );
            }
            Ok(())
        }
        Commands::Run { feed, limit, remember } => {
            let feeds = selected_feeds(&settings, feed.as_deref())?;
            let conn = db::connect(&settings.database)?;
            db::init_schema(&conn)?;
            let client = fetcher::client()?;
            let limit = limit.unwrap_or(settings.item_limit);

            let mut failed = 0;
            for f in &feeds {
                if let Err(e) = run_feed(&conn, &client, &settings, f, limit, remember).await {
                    warn!("Feed {} failed: {:#}", f.slug, e);
                    failed += 1;
                }
            }
            if failed > 0 && failed == feeds.len() {
                anyhow::bail!("All {} feeds failed", failed);
            }
            Ok(())
        }
        Commands::Parse { manifest, feed_url, out } => {
            let docs = manifest::load(&manifest)?;
            println!("Parsing {} documents...", docs.len());
            let result = settings.pipeline().run(&docs, feed_url.as_deref(), None);
            println!(
                "{} raw items, {} after dedupe ({} cross-posts removed)",
                result.raw_items,
                result.items.len(),
                result.cross_posts
            );

            let mut items = result.items;
            match out {
                Some(path) => {
                    output::write_items(&mut items, &path)?;
                    println!("Wrote {}", path.display());
                }
                None => {
                    output::sort_for_output(&mut items);
                    println!("{}", serde_json::to_string_pretty(&items)?);
                }
            }
            Ok(())
        }
        Commands::Invalidate {
            urls,
            all,
            feeds,
            item_id,
            since_date,
            most_recent_n,
            output_dir,
            parsed_only,
            dry_run,
        } => {
            let conn = db::connect(&settings.database)?;
            db::init_schema(&conn)?;

            if all {
                if dry_run {
                    let s = db::get_stats(&conn)?;
                    let n = if parsed_only { s.parsed } else { s.documents + s.parsed };
                    println!("Would remove {} cache entries", n);
                } else {
                    println!("Removed {} cache entries", db::invalidate_all(&conn, parsed_only)?);
                }
                return Ok(());
            }

            let selection = invalidate::Selection {
                feeds,
                item_id,
                since: since_date.as_deref().map(invalidate::parse_since).transpose()?,
                most_recent_n,
            };
            let urls = if selection.is_empty() {
                urls
            } else {
                check_feed_slugs(&settings, &selection.feeds)?;
                let dir = output_dir.unwrap_or_else(|| PathBuf::from(&settings.output_dir));
                let index = invalidate::load_correlation_index(&dir)?;
                if index.is_empty() {
                    anyhow::bail!(
                        "No items found in {}; cannot correlate cache entries",
                        dir.display()
                    );
                }
                let matched = selection.apply(&index);
                println!("Matched {} items", matched.len());
                if dry_run {
                    for c in &matched {
                        println!("  [{}] {} ({})", c.feed, c.title, c.key);
                    }
                }
                invalidate::source_urls(&matched)
            };

            if urls.is_empty() {
                println!("Nothing to invalidate. Pass --url, --all or an item filter.");
                return Ok(());
            }
            if dry_run {
                for u in &urls {
                    println!("  {}", u);
                }
                let n = db::count_for_urls(&conn, &urls, parsed_only)?;
                println!("Would remove {} cache entries for {} sources", n, urls.len());
            } else {
                let n = db::invalidate_urls(&conn, &urls, parsed_only)?;
                println!("Removed {} cache entries for {} sources", n, urls.len());
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.database)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Documents: {}", s.documents);
            println!("Parsed:    {}", s.parsed);
            println!("Seen:      {}", s.seen);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn selected_feeds<'a>(
    settings: &'a Settings,
    slug: Option<&str>,
) -> anyhow::Result<Vec<&'a FeedConfig>> {
    let feeds = settings.selected_feeds(slug);
    if feeds.is_empty() {
        match slug {
            Some(s) => anyhow::bail!("Unknown feed '{}'", s),
            None => anyhow::bail!("No feeds configured"),
        }
    }
    Ok(feeds)
}

fn check_feed_slugs(settings: &Settings, slugs: &[String]) -> anyhow::Result<()> {
    if settings.feeds.is_empty() {
        return Ok(());
    }
    for slug in slugs.iter().filter(|s| s.as_str() != "all") {
        if settings.feed(slug).is_none() {
            anyhow::bail!("Unknown feed '{}'", slug);
        }
    }
    Ok(())
}

async fn run_feed(
    conn: &rusqlite::Connection,
    client: &reqwest::Client,
    settings: &Settings,
    feed: &FeedConfig,
    limit: usize,
    remember: bool,
) -> anyhow::Result<()> {
    info!("── {} ──", feed.name);

    let t_fetch = Instant::now();
    let targets = fetcher::discover(client, &feed.blog_url, &settings.discovery()).await?;
    let (docs, stats) =
        fetcher::fetch_documents(conn, client, targets, settings.concurrency).await?;
    println!(
        "{}: {} documents ({} cached, {} fetched, {} errors) in {:.1}s",
        feed.slug,
        stats.total,
        stats.cached,
        stats.fetched,
        stats.errors,
        t_fetch.elapsed().as_secs_f64()
    );

    let parsed = db::SqliteCache::new(conn, db::PARSED);
    let result = settings.pipeline().run(&docs, Some(&feed.blog_url), Some(&parsed));
    let mut items = result.items;

    if remember {
        let index = db::SqliteSeenIndex::new(conn);
        let updated = parser::dedupe::remember_dates(&mut items, &index)
            .context("Seen-items index update failed")?;
        info!("{} items took an earlier date from previous runs", updated);
    }

    let deduped = items.len();
    let mut items = output::limit_recent(items, limit);
    let path = output::items_path(Path::new(&settings.output_dir), &feed.slug);
    output::write_items(&mut items, &path)?;

    println!(
        "{}: {} raw → {} unique ({} cross-posts) → wrote {} to {}",
        feed.slug,
        result.raw_items,
        deduped,
        result.cross_posts,
        items.len(),
        path.display()
    );
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
