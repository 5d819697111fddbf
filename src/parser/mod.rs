pub mod blocks;
pub mod crosspost;
pub mod dedupe;
pub mod item;
pub mod segment;
pub mod title;

use tracing::warn;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::cache::{cache_key, Cache};
use dedupe::NoiseFilter;
use item::{DedupedItem, Item, SourceDocument};
use segment::SegmentOptions;

/// Stage-by-stage pipeline: segment → dedupe → cross-post filter.
pub struct Pipeline {
    pub segment: SegmentOptions,
    pub noise: NoiseFilter,
}

pub struct PipelineOutput {
    pub raw_items: usize,
    pub items: Vec<DedupedItem>,
    pub cross_posts: usize,
}

impl Pipeline {
    pub fn run(
        &self,
        docs: &[SourceDocument],
        feed_url: Option<&str>,
        cache: Option<&dyn Cache>,
    ) -> PipelineOutput {
        let raw = match cache {
            Some(c) => segment_all_cached(docs, &self.segment, c),
            None => segment_all(docs, &self.segment),
        };
        let raw_items = raw.len();
        let deduped = dedupe::dedupe(raw, &self.noise);
        let (items, cross_posts) = match feed_url {
            Some(url) => crosspost::filter_cross_posts(deduped, url),
            None => (deduped, 0),
        };
        PipelineOutput {
            raw_items,
            items,
            cross_posts,
        }
    }
}

#[cfg(feature = "rayon")]
fn segment_each(docs: &[&SourceDocument], opts: &SegmentOptions) -> Vec<Vec<Item>> {
    docs.par_iter().map(|d| segment::segment(d, opts)).collect()
}

#[cfg(not(feature = "rayon"))]
fn segment_each(docs: &[&SourceDocument], opts: &SegmentOptions) -> Vec<Vec<Item>> {
    docs.iter().map(|d| segment::segment(d, opts)).collect()
}

/// Segment every document, keeping document order.
pub fn segment_all(docs: &[SourceDocument], opts: &SegmentOptions) -> Vec<Item> {
    let refs: Vec<&SourceDocument> = docs.iter().collect();
    segment_each(&refs, opts).into_iter().flatten().collect()
}

/// Like `segment_all`, but documents whose URL already has a cached item
/// list are not re-parsed. Cache failures fall back to parsing.
pub fn segment_all_cached(
    docs: &[SourceDocument],
    opts: &SegmentOptions,
    cache: &dyn Cache,
) -> Vec<Item> {
    let mut per_doc: Vec<Option<Vec<Item>>> = docs.iter().map(|d| load_parsed(d, cache)).collect();

    let misses: Vec<&SourceDocument> = docs
        .iter()
        .zip(&per_doc)
        .filter(|(_, hit)| hit.is_none())
        .map(|(d, _)| d)
        .collect();
    let mut fresh = segment_each(&misses, opts).into_iter();

    for (doc, slot) in docs.iter().zip(per_doc.iter_mut()) {
        if slot.is_some() {
            continue;
        }
        let items = fresh.next().unwrap_or_default();
        store_parsed(doc, &items, cache);
        *slot = Some(items);
    }

    per_doc.into_iter().flatten().flatten().collect()
}

fn load_parsed(doc: &SourceDocument, cache: &dyn Cache) -> Option<Vec<Item>> {
    let key = cache_key(&doc.url);
    match cache.get(&key) {
        Ok(Some(blob)) => match serde_json::from_slice(&blob) {
            Ok(items) => Some(items),
            Err(e) => {
                warn!("Ignoring unreadable parse cache for {}: {}", doc.url, e);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!("Parse cache lookup failed for {}: {}", doc.url, e);
            None
        }
    }
}

fn store_parsed(doc: &SourceDocument, items: &[Item], cache: &dyn Cache) {
    let key = cache_key(&doc.url);
    let result = serde_json::to_vec(items)
        .map_err(crate::error::Error::from)
        .and_then(|blob| cache.put(&key, &blob));
    if let Err(e) = result {
        warn!("Could not cache parsed items for {}: {}", doc.url, e);
    }
}

// ── Tests ──
