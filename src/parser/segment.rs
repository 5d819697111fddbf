use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::blocks::{self, classify_body};
use super::item::{Boundary, DocumentKind, Fragment, FragmentKind, Item, SourceDocument};
use super::title;

pub const BLOG_POST_KEY_PREFIX: &str = "blog_post_";

/// Tried in order; the first match is the post's main content.
const BODY_SELECTORS: &[&str] = &[
    ".post-content",
    ".entry-content",
    ".blog-post-body",
    "article",
    "main",
    "body",
];

static LINK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

#[derive(Debug, Clone)]
pub struct SegmentOptions {
    /// Path-segment suffix marking a same-site blog, e.g. `-blog`.
    pub blog_suffix: String,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            blog_suffix: "-blog".to_string(),
        }
    }
}

/// Split one document into items.
pub fn segment(doc: &SourceDocument, opts: &SegmentOptions) -> Vec<Item> {
    let html = Html::parse_document(&doc.markup);
    match doc.kind {
        DocumentKind::BlogPost => vec![segment_blog_post(doc, &html, opts)],
        DocumentKind::Newsletter => {
            let nodes = blocks::collect_nodes(&html);
            segment_fragments(doc, nodes.iter().filter_map(blocks::classify))
        }
    }
}

/// Run the segmentation state machine over an already classified stream.
pub fn segment_fragments<I>(doc: &SourceDocument, fragments: I) -> Vec<Item>
where
    I: IntoIterator<Item = Fragment>,
{
    let mut seg = Segmenter::new(doc);
    for fragment in fragments {
        seg.feed(fragment);
    }
    seg.finish()
}

// ── State machine ──

struct Accumulator {
    item: Item,
    block_ids: Vec<String>,
}

enum State {
    Idle,
    Accumulating(Accumulator),
}

struct Segmenter<'a> {
    doc: &'a SourceDocument,
    state: State,
    out: Vec<Item>,
}

impl<'a> Segmenter<'a> {
    fn new(doc: &'a SourceDocument) -> Self {
        Self {
            doc,
            state: State::Idle,
            out: Vec::new(),
        }
    }

    fn feed(&mut self, fragment: Fragment) {
        match fragment.kind {
            FragmentKind::Separator(Boundary::Header) => {}
            FragmentKind::Separator(Boundary::Break) => self.close(),
            _ => {
                if let State::Idle = self.state {
                    self.state = State::Accumulating(Accumulator {
                        item: Item::empty_for(self.doc),
                        block_ids: Vec::new(),
                    });
                }
                if let State::Accumulating(acc) = &mut self.state {
                    append(acc, fragment);
                }
            }
        }
    }

    fn close(&mut self) {
        if let State::Accumulating(acc) = std::mem::replace(&mut self.state, State::Idle) {
            if let Some(item) = finalize(acc) {
                self.out.push(item);
            }
        }
    }

    fn finish(mut self) -> Vec<Item> {
        self.close();
        self.out
    }
}

fn append(acc: &mut Accumulator, fragment: Fragment) {
    if !fragment.source_block_id.is_empty() {
        acc.block_ids.push(fragment.source_block_id.clone());
    }
    match fragment.kind {
        FragmentKind::Title if acc.item.title.is_empty() => {
            acc.item.title = title::normalize(fragment.text.as_deref().unwrap_or(""));
        }
        FragmentKind::Image => {
            if let Some(url) = &fragment.image_url {
                acc.item.image_urls.push(url.clone());
            }
        }
        _ => {}
    }
    acc.item.fragments.push(fragment);
}

fn finalize(acc: Accumulator) -> Option<Item> {
    let Accumulator {
        mut item,
        block_ids,
    } = acc;

    if item.title.is_empty() {
        if let Some(text) = item.fragments.iter().find_map(Fragment::non_empty_text) {
            item.title = title::normalize(text);
        }
    }

    if item.title.is_empty() && item.fragments.is_empty() {
        return None;
    }

    item.identity_key = block_ids.join("-");
    Some(item)
}

// ── Blog posts ──

fn segment_blog_post(doc: &SourceDocument, html: &Html, opts: &SegmentOptions) -> Item {
    let container = find_body(html);
    let (body, images) = classify_body(container);

    let mut item = Item::empty_for(doc);
    item.title = doc.title.clone();
    item.identity_key = format!("{}{}", BLOG_POST_KEY_PREFIX, doc.url);
    item.fragments = vec![body];
    item.image_urls = images;
    item.origin_blog_url = detect_origin_blog(&doc.url, container, &opts.blog_suffix);
    item
}

fn find_body(html: &Html) -> ElementRef<'_> {
    BODY_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|sel| html.select(&sel).next())
        .unwrap_or_else(|| html.root_element())
}

/// First link in `container` that points at a blog on the document's own
/// host, as `scheme://host/<name>-blog/`.
pub fn detect_origin_blog(
    doc_url: &str,
    container: ElementRef<'_>,
    suffix: &str,
) -> Option<String> {
    let base = Url::parse(doc_url).ok()?;
    let host = base.host_str()?;

    container.select(&LINK_SEL).find_map(|a| {
        let href = a.value().attr("href")?;
        let link = base.join(href).ok()?;
        if link.host_str() != Some(host) {
            return None;
        }
        let first = link.path_segments()?.next()?;
        if first.is_empty() || !first.ends_with(suffix) {
            return None;
        }
        Some(format!("{}://{}/{}/", link.scheme(), host, first))
    })
}
