use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::item::{DedupedItem, Item};
use crate::error::Result;

/// Case-insensitive title denylist for platform boilerplate.
#[derive(Debug, Clone, Default)]
pub struct NoiseFilter {
    patterns: Vec<String>,
}

impl NoiseFilter {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_noise(&self, title: &str) -> bool {
        let lower = title.to_lowercase();
        self.patterns.iter().any(|p| lower.contains(p.as_str()))
    }
}

/// Block-id key when present, otherwise a SHA-256 over title + fragment text.
pub fn identity_key(item: &Item) -> String {
    if !item.identity_key.is_empty() {
        return item.identity_key.clone();
    }
    content_digest(item)
}

pub fn content_digest(item: &Item) -> String {
    let mut hasher = Sha256::new();
    hasher.update(item.title.as_bytes());
    for text in item.fragments.iter().filter_map(|f| f.text.as_deref()) {
        hasher.update(text.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Collapse all items of one run to one record per identity, keeping the
/// observation with the earliest date. Output is in first-seen order.
pub fn dedupe(items: Vec<Item>, noise: &NoiseFilter) -> Vec<DedupedItem> {
    let total = items.len();
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<DedupedItem> = Vec::new();
    let mut noise_count = 0usize;

    for item in items {
        if noise.is_noise(&item.title) {
            debug!(title = %item.title, "Dropping noise item");
            noise_count += 1;
            continue;
        }

        let key = identity_key(&item);
        match slots.get(&key) {
            Some(&idx) => {
                if is_earlier(item.publication_date, out[idx].date()) {
                    debug!(
                        key = %key,
                        title = %item.title,
                        "Earlier observation replaces representative"
                    );
                    out[idx] = DedupedItem::new(item, key);
                }
            }
            None => {
                slots.insert(key.clone(), out.len());
                out.push(DedupedItem::new(item, key));
            }
        }
    }

    debug!(
        total,
        noise = noise_count,
        unique = out.len(),
        "Deduplicated items"
    );
    out
}

fn is_earlier(candidate: Option<DateTime<Utc>>, current: Option<DateTime<Utc>>) -> bool {
    match (candidate, current) {
        (Some(c), Some(k)) => c < k,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

// ── Legacy seen-index ──

/// Persistent identity → earliest-date map kept across runs.
pub trait SeenIndex {
    fn earliest(&self, key: &str) -> Result<Option<DateTime<Utc>>>;
    fn record(&self, key: &str, date: Option<DateTime<Utc>>) -> Result<()>;
}

/// Pull remembered dates into this run's records, then remember the result.
/// Never drops items.
pub fn remember_dates(items: &mut [DedupedItem], index: &dyn SeenIndex) -> Result<usize> {
    let mut backdated = 0;
    for item in items.iter_mut() {
        let remembered = index.earliest(item.key())?;
        if is_earlier(remembered, item.date()) {
            item.item.publication_date = remembered;
            backdated += 1;
        }
        index.record(item.key(), item.date())?;
    }
    Ok(backdated)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::parser::item::{DocumentKind, Fragment, FragmentKind};
    use chrono::TimeZone;

    fn item(title: &str, key: &str, date: Option<(i32, u32, u32)>) -> Item {
        Item {
            title: title.into(),
            identity_key: key.into(),
            fragments: vec![
                Fragment::text(FragmentKind::Title, title, ""),
                Fragment::text(FragmentKind::Paragraph, "body text", ""),
            ],
            image_urls: vec![],
            source_url: "https://www.smore.com/n/a".into(),
            source_title: "News".into(),
            publication_date: date.map(|(y, m, d)| Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()),
            origin_blog_url: None,
            kind: DocumentKind::Newsletter,
        }
    }

    fn noise() -> NoiseFilter {
        NoiseFilter::new(["zoom_out_map talawanda high school"])
    }

    #[test]
    fn keeps_earliest_date() {
        let mut later = item("Later copy", "x1-x2", Some((2025, 11, 10)));
        later.source_url = "https://www.smore.com/n/later".into();
        let earlier = item("Earlier copy", "x1-x2", Some((2025, 11, 5)));

        let out = dedupe(vec![later, earlier], &noise());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].date(), Some(Utc.with_ymd_and_hms(2025, 11, 5, 0, 0, 0).unwrap()));
        assert_eq!(out[0].item.title, "Earlier copy");
        assert_eq!(out[0].hash, "x1-x2");
        assert_eq!(out[0].item.identity_key, "x1-x2");
    }

    #[test]
    fn later_observation_does_not_replace() {
        let first = item("First", "k", Some((2025, 1, 1)));
        let second = item("Second", "k", Some((2025, 2, 1)));
        let out = dedupe(vec![first, second], &noise());
        assert_eq!(out[0].item.title, "First");
    }

    #[test]
    fn undated_group_kept_first_seen() {
        let out = dedupe(vec![item("One", "k", None), item("Two", "k", None)], &noise());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].item.title, "One");
        assert!(out[0].date().is_none());
    }

    #[test]
    fn dated_member_beats_undated() {
        let items = vec![item("One", "k", None), item("Two", "k", Some((2025, 3, 3)))];
        let out = dedupe(items, &noise());
        assert_eq!(out[0].item.title, "Two");
    }

    #[test]
    fn noise_dropped_regardless_of_fragments() {
        let items = vec![
            item("zoom_out_map talawanda high school #educate", "n1", Some((2025, 1, 1))),
            item("ZOOM_OUT_MAP Talawanda High School #Educate", "n2", None),
            item("Band Camp", "b1", None),
        ];
        let out = dedupe(items, &noise());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].item.title, "Band Camp");
    }

    #[test]
    fn empty_filter_keeps_everything() {
        let items = vec![item("zoom_out_map talawanda high school", "a", None)];
        let out = dedupe(items, &NoiseFilter::default());
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn fallback_digest_merges_identical_content() {
        let a = item("Lost and Found", "", Some((2025, 4, 2)));
        let b = item("Lost and Found", "", Some((2025, 4, 1)));
        assert_eq!(identity_key(&a), identity_key(&b));
        assert_eq!(identity_key(&a).len(), 64);

        let out = dedupe(vec![a, b], &noise());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].hash, out[0].item.identity_key);
        assert_eq!(out[0].date(), Some(Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn fallback_digest_differs_on_content() {
        let a = item("Lost and Found", "", None);
        let mut b = a.clone();
        b.fragments[1].text = Some("other body".into());
        assert_ne!(identity_key(&a), identity_key(&b));
    }

    #[test]
    fn empty_input() {
        assert!(dedupe(Vec::new(), &noise()).is_empty());
    }

    #[derive(Default)]
    struct MapIndex(RefCell<HashMap<String, Option<DateTime<Utc>>>>);

    impl SeenIndex for MapIndex {
        fn earliest(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
            Ok(self.0.borrow().get(key).copied().flatten())
        }

        fn record(&self, key: &str, date: Option<DateTime<Utc>>) -> Result<()> {
            self.0.borrow_mut().insert(key.to_string(), date);
            Ok(())
        }
    }

    #[test]
    fn remembered_date_backfills() {
        let index = MapIndex::default();
        let d = Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap();
        index.record("k", Some(d)).unwrap();

        let mut out = dedupe(
            vec![item("A", "k", Some((2025, 11, 1))), item("B", "j", None)],
            &noise(),
        );
        let n = remember_dates(&mut out, &index).unwrap();
        assert_eq!(n, 1);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].date(), Some(d));
        assert!(index.0.borrow().contains_key("j"));
    }
}
