use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

const ITEMS_SUFFIX: &str = "-items.json";

/// What an output record says about where an item came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Correlated {
    pub key: String,
    pub source_url: String,
    pub feed: String,
    pub date: Option<DateTime<Utc>>,
    pub title: String,
}

#[derive(Deserialize)]
struct OutputRecord {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    source_url: String,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
    #[serde(default)]
    title: String,
}

/// Read every `<slug>-items.json` in `dir` into an identity → record map.
/// Unreadable files are skipped with a warning.
pub fn load_correlation_index(dir: &Path) -> Result<BTreeMap<String, Correlated>> {
    let mut index = BTreeMap::new();
    if !dir.exists() {
        warn!("Output directory {} does not exist", dir.display());
        return Ok(index);
    }

    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
    let mut files: Vec<_> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(ITEMS_SUFFIX))
        })
        .collect();
    files.sort();

    for path in files {
        let Some(feed) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(ITEMS_SUFFIX))
            .map(str::to_string)
        else {
            continue;
        };
        let records: Vec<OutputRecord> = match std::fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| Ok(serde_json::from_str::<Vec<OutputRecord>>(&raw)?))
        {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                continue;
            }
        };

        for r in records.into_iter().filter(|r| !r.hash.is_empty()) {
            index.insert(
                r.hash.clone(),
                Correlated {
                    key: r.hash,
                    source_url: r.source_url,
                    feed: feed.clone(),
                    date: r.date,
                    title: r.title,
                },
            );
        }
    }

    info!("Loaded correlation index: {} items from {}", index.len(), dir.display());
    Ok(index)
}

/// Filters over the correlation index. Every set filter must match.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Feed slugs; empty or `all` means every feed.
    pub feeds: Vec<String>,
    pub item_id: Option<String>,
    /// Inclusive lower bound on the item date. Undated items never match.
    pub since: Option<DateTime<Utc>>,
    /// Newest N of what the other filters left. Undated items never match.
    pub most_recent_n: Option<usize>,
}

impl Selection {
    fn feed_filter(&self) -> Option<&[String]> {
        let all = self.feeds.is_empty() || self.feeds.iter().any(|f| f == "all");
        (!all).then_some(self.feeds.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.feed_filter().is_none()
            && self.item_id.is_none()
            && self.since.is_none()
            && self.most_recent_n.is_none()
    }

    pub fn apply<'a>(&self, index: &'a BTreeMap<String, Correlated>) -> Vec<&'a Correlated> {
        let mut matched: Vec<&Correlated> = index
            .values()
            .filter(|c| self.feed_filter().map_or(true, |f| f.contains(&c.feed)))
            .filter(|c| self.item_id.as_deref().map_or(true, |id| c.key == id))
            .filter(|c| match self.since {
                Some(since) => c.date.is_some_and(|d| d >= since),
                None => true,
            })
            .collect();

        // Last, since it ranks what the other filters kept.
        if let Some(n) = self.most_recent_n {
            matched.retain(|c| c.date.is_some());
            matched.sort_by(|a, b| b.date.cmp(&a.date));
            matched.truncate(n);
        }
        matched
    }
}

/// Distinct source URLs of the matched items, sorted.
pub fn source_urls(matched: &[&Correlated]) -> Vec<String> {
    let mut urls: Vec<String> = matched
        .iter()
        .map(|c| c.source_url.clone())
        .filter(|u| !u.is_empty())
        .collect();
    urls.sort();
    urls.dedup();
    urls
}

/// `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS` (taken as UTC) or RFC 3339.
pub fn parse_since(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Ok(d.with_timezone(&Utc));
    }
    if let Ok(d) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(d.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .with_context(|| format!("Invalid date {:?}. Use YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS", s))
}
