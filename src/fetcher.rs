use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use rusqlite::Connection;
use scraper::{Html, Selector};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use url::Url;

use crate::cache::{cache_key, Cache};
use crate::db::{SqliteCache, DOCUMENTS};
use crate::parser::item::{DocumentKind, SourceDocument};

const USER_AGENT: &str = concat!("enews_feed/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

static LINK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static H1_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static OG_TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static PUBLISHED_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="article:published_time"]"#).unwrap());
static TIME_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("time[datetime]").unwrap());
static BODY_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());
static DATE_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b",
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub url: String,
    pub kind: DocumentKind,
}

pub struct FetchStats {
    pub total: usize,
    pub cached: usize,
    pub fetched: usize,
    pub errors: usize,
}

/// What counts as a newsletter or a post when reading a blog index.
#[derive(Debug, Clone)]
pub struct DiscoveryRules {
    pub newsletter_host: String,
    /// First path segments below the blog that mark listing pages.
    pub listing_segments: Vec<String>,
}

impl Default for DiscoveryRules {
    fn default() -> Self {
        Self {
            newsletter_host: "smore.com".into(),
            listing_segments: ["tag", "category", "page", "author"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl DiscoveryRules {
    pub fn is_newsletter_host(&self, host: &str) -> bool {
        let want = self.newsletter_host.trim().to_lowercase();
        let host = host.to_lowercase();
        !want.is_empty() && (host == want || host.ends_with(&format!(".{}", want)))
    }

    /// `path` names a post directly below `blog_path` (which ends in `/`).
    pub fn is_post_path(&self, blog_path: &str, path: &str) -> bool {
        let Some(rest) = path.strip_prefix(blog_path) else {
            return false;
        };
        let Some(first) = rest.split('/').next().filter(|s| !s.is_empty()) else {
            return false;
        };
        !self.listing_segments.iter().any(|l| l.eq_ignore_ascii_case(first))
    }
}

pub fn client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()?;
    Ok(client)
}

// ── Discovery ──

/// Fetch a feed's blog index and list the newsletters and posts it links to.
pub async fn discover(
    client: &reqwest::Client,
    blog_url: &str,
    rules: &DiscoveryRules,
) -> Result<Vec<Target>> {
    info!("Fetching blog index: {}", blog_url);
    let html = client
        .get(blog_url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
        .with_context(|| format!("Failed to fetch blog index {}", blog_url))?;

    let targets = extract_targets(blog_url, &html, rules)?;
    let newsletters = targets.iter().filter(|t| t.kind == DocumentKind::Newsletter).count();
    info!(
        "Found {} newsletters and {} blog posts",
        newsletters,
        targets.len() - newsletters
    );
    Ok(targets)
}

/// Newsletter links (`newsletter_host` or any subdomain of it) and posts
/// strictly below the blog's own path, deduplicated in page order. Tag,
/// category and pagination listings under the blog are not posts.
pub fn extract_targets(blog_url: &str, html: &str, rules: &DiscoveryRules) -> Result<Vec<Target>> {
    let base = Url::parse(blog_url).with_context(|| format!("Invalid blog URL {}", blog_url))?;
    let blog_path = format!("{}/", base.path().trim_end_matches('/'));
    let doc = Html::parse_document(html);

    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for a in doc.select(&LINK_SEL) {
        let Some(mut link) = a.value().attr("href").and_then(|h| base.join(h).ok()) else {
            continue;
        };
        link.set_fragment(None);
        let Some(host) = link.host_str() else {
            continue;
        };

        let kind = if rules.is_newsletter_host(host) {
            DocumentKind::Newsletter
        } else if Some(host) == base.host_str() && rules.is_post_path(&blog_path, link.path()) {
            DocumentKind::BlogPost
        } else {
            continue;
        };

        let url = link.to_string();
        if seen.insert(url.clone()) {
            targets.push(Target { url, kind });
        }
    }

    Ok(targets)
}

// ── Documents ──

/// Load each target from the document cache or fetch it. Results come back
/// in target order; failed fetches are logged and left out.
pub async fn fetch_documents(
    conn: &Connection,
    client: &reqwest::Client,
    targets: Vec<Target>,
    concurrency: usize,
) -> Result<(Vec<SourceDocument>, FetchStats)> {
    let cache = SqliteCache::new(conn, DOCUMENTS);
    let total = targets.len();
    let order: Vec<String> = targets.iter().map(|t| t.url.clone()).collect();

    let mut docs: HashMap<String, SourceDocument> = HashMap::new();
    let mut pending = Vec::new();
    for target in targets {
        match load_cached(&cache, &target.url) {
            Some(doc) => {
                docs.insert(target.url.clone(), doc);
            }
            None => pending.push(target),
        }
    }
    let cached = docs.len();

    let pb = ProgressBar::new(pending.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let (tx, mut rx) =
        tokio::sync::mpsc::channel::<(String, Result<SourceDocument>)>(concurrency.max(1) * 2);

    for target in pending {
        let client = client.clone();
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = match sem.acquire().await {
                Ok(_permit) => fetch_one(&client, &target).await,
                Err(e) => Err(e.into()),
            };
            let _ = tx.send((target.url, result)).await;
        });
    }
    drop(tx);

    // Single writer: every cache put happens on this task.
    let mut fetched = 0usize;
    let mut errors = 0usize;
    while let Some((url, result)) = rx.recv().await {
        match result {
            Ok(doc) => {
                match serde_json::to_vec(&doc) {
                    Ok(blob) => {
                        if let Err(e) = cache.put_for_url(&url, &blob) {
                            warn!("Could not cache {}: {}", url, e);
                        }
                    }
                    Err(e) => warn!("Could not serialize {}: {}", url, e),
                }
                docs.insert(url, doc);
                fetched += 1;
            }
            Err(e) => {
                warn!("Fetch failed for {}: {:#}", url, e);
                errors += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let ordered = order.iter().filter_map(|u| docs.remove(u)).collect();
    info!("Documents: {} total ({} cached, {} fetched, {} errors)", total, cached, fetched, errors);

    Ok((
        ordered,
        FetchStats {
            total,
            cached,
            fetched,
            errors,
        },
    ))
}

fn load_cached(cache: &SqliteCache<'_>, url: &str) -> Option<SourceDocument> {
    match cache.get(&cache_key(url)) {
        Ok(Some(blob)) => serde_json::from_slice(&blob)
            .map_err(|e| warn!("Ignoring unreadable cached document {}: {}", url, e))
            .ok(),
        Ok(None) => None,
        Err(e) => {
            warn!("Document cache lookup failed for {}: {}", url, e);
            None
        }
    }
}

async fn fetch_one(client: &reqwest::Client, target: &Target) -> Result<SourceDocument> {
    let html = client
        .get(&target.url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(document_from_html(&target.url, target.kind, html))
}

/// Build a `SourceDocument` from page markup: title and publication date are
/// read from the page itself.
pub fn document_from_html(url: &str, kind: DocumentKind, markup: String) -> SourceDocument {
    let doc = Html::parse_document(&markup);
    let title = match kind {
        DocumentKind::BlogPost => meta_content(&doc, &OG_TITLE_SEL)
            .or_else(|| first_text(&doc, &H1_SEL))
            .or_else(|| first_text(&doc, &TITLE_SEL)),
        DocumentKind::Newsletter => first_text(&doc, &TITLE_SEL),
    }
    .unwrap_or_default();
    let publication_date = extract_date(&doc);

    SourceDocument {
        url: url.to_string(),
        title,
        kind,
        markup,
        publication_date,
    }
}

fn meta_content(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn first_text(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .next()
        .map(|e| e.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
}

fn extract_date(doc: &Html) -> Option<DateTime<Utc>> {
    let attr_date = meta_content(doc, &PUBLISHED_SEL).or_else(|| {
        doc.select(&TIME_SEL)
            .next()
            .and_then(|t| t.value().attr("datetime"))
            .map(str::to_string)
    });
    if let Some(d) = attr_date.as_deref().and_then(parse_date_attr) {
        return Some(d);
    }

    let text: String = doc
        .select(&BODY_SEL)
        .next()
        .map(|b| b.text().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();
    parse_date_from_text(&text)
}

fn parse_date_attr(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

/// First "Month D, YYYY" style date in free text, as midnight UTC.
pub fn parse_date_from_text(text: &str) -> Option<DateTime<Utc>> {
    DATE_TEXT_RE.captures_iter(text).find_map(|caps| {
        let month = month_number(&caps[1])?;
        let day: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)?
            .and_hms_opt(0, 0, 0)
            .map(|d| d.and_utc())
    })
}

fn month_number(abbr: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let abbr = abbr.to_lowercase();
    MONTHS.iter().position(|m| *m == abbr).map(|i| i as u32 + 1)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn targets_from_blog_index() {
        let html = std::fs::read_to_string("tests/fixtures/blog_index.html").unwrap();
        let rules = DiscoveryRules::default();
        let targets =
            extract_targets("https://www.talawanda.org/ths-blog/", &html, &rules).unwrap();
        assert_eq!(
            targets,
            vec![
                Target {
                    url: "https://www.smore.com/n/abc".into(),
                    kind: DocumentKind::Newsletter
                },
                Target {
                    url: "https://www.smore.com/n/def".into(),
                    kind: DocumentKind::Newsletter
                },
                Target {
                    url: "https://www.talawanda.org/ths-blog/fall-musical".into(),
                    kind: DocumentKind::BlogPost
                },
                Target {
                    url: "https://app.smore.com/n/ghi".into(),
                    kind: DocumentKind::Newsletter
                },
            ]
        );
    }

    #[test]
    fn listing_pages_and_lookalike_hosts_skipped() {
        let rules = DiscoveryRules::default();
        let blog = "/ths-blog/";
        assert!(rules.is_post_path(blog, "/ths-blog/fall-musical"));
        assert!(rules.is_post_path(blog, "/ths-blog/2025/11/fall-musical"));
        assert!(!rules.is_post_path(blog, "/ths-blog/tag/sports"));
        assert!(!rules.is_post_path(blog, "/ths-blog/Page/2"));
        assert!(!rules.is_post_path(blog, "/ths-blog/"));
        assert!(!rules.is_post_path(blog, "/tms-blog/band-camp"));

        assert!(rules.is_newsletter_host("smore.com"));
        assert!(rules.is_newsletter_host("www.smore.com"));
        assert!(!rules.is_newsletter_host("notsmore.com"));
        assert!(!rules.is_newsletter_host("smore.com.evil.org"));
    }

    #[test]
    fn invalid_blog_url() {
        assert!(extract_targets("not a url", "", &DiscoveryRules::default()).is_err());
    }

    #[test]
    fn blog_document_metadata() {
        let html = std::fs::read_to_string("tests/fixtures/blog_post.html").unwrap();
        let doc = document_from_html(
            "https://www.talawanda.org/ths-blog/fall-musical",
            DocumentKind::BlogPost,
            html,
        );
        assert_eq!(doc.title, "Fall Musical Tickets");
        assert_eq!(
            doc.publication_date,
            Some(Utc.with_ymd_and_hms(2025, 10, 28, 13, 30, 0).unwrap())
        );
    }

    #[test]
    fn newsletter_document_metadata() {
        let html = std::fs::read_to_string("tests/fixtures/newsletter.html").unwrap();
        let doc = document_from_html("https://www.smore.com/n/abc", DocumentKind::Newsletter, html);
        assert_eq!(doc.title, "Talawanda High School November News");
        // First full date in the body text; "November 18" has no year.
        assert_eq!(
            doc.publication_date,
            Some(Utc.with_ymd_and_hms(2025, 11, 14, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn dates_in_text() {
        let d = |y, m, day| Some(Utc.with_ymd_and_hms(y, m, day, 0, 0, 0).unwrap());
        assert_eq!(parse_date_from_text("Posted November 5, 2025 by staff"), d(2025, 11, 5));
        assert_eq!(parse_date_from_text("Sept. 3rd 2024"), d(2024, 9, 3));
        assert_eq!(parse_date_from_text("on Dec 01, 2025"), d(2025, 12, 1));
        assert_eq!(parse_date_from_text("February 30, 2025 then March 2, 2025"), d(2025, 3, 2));
        assert_eq!(parse_date_from_text("no date here"), None);
    }

    #[test]
    fn date_attributes() {
        assert_eq!(
            parse_date_attr("2025-11-05"),
            Some(Utc.with_ymd_and_hms(2025, 11, 5, 0, 0, 0).unwrap())
        );
        assert_eq!(
            parse_date_attr("2025-11-05T10:00:00Z"),
            Some(Utc.with_ymd_and_hms(2025, 11, 5, 10, 0, 0).unwrap())
        );
        assert_eq!(parse_date_attr("soon"), None);
    }
}
