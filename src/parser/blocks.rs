use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use super::item::{Boundary, Fragment, FragmentKind};

static BLOCK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div[data-block-type]").unwrap());
static IMG_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());

/// One `data-block-type` element, reduced to what classification needs.
#[derive(Debug, Clone, Default)]
pub struct RawNode {
    pub block_type: String,
    pub block_id: String,
    pub text: String,
    pub image_src: Option<String>,
}

impl RawNode {
    pub fn from_element(el: ElementRef<'_>) -> Self {
        let attrs = el.value();
        let image_src = el.select(&IMG_SEL).next().and_then(image_source);

        Self {
            block_type: attrs.attr("data-block-type").unwrap_or("").to_string(),
            block_id: attrs.attr("data-block-id").unwrap_or("").to_string(),
            text: el.text().collect(),
            image_src,
        }
    }
}

/// All block nodes of a newsletter page, in document order.
pub fn collect_nodes(html: &Html) -> Vec<RawNode> {
    html.select(&BLOCK_SEL).map(RawNode::from_element).collect()
}

/// Map one block node to a fragment. Unknown types and images without a
/// usable `<img>` yield `None`.
pub fn classify(node: &RawNode) -> Option<Fragment> {
    let id = node.block_id.as_str();
    match node.block_type.as_str() {
        "text.title" => Some(Fragment::text(FragmentKind::Title, node.text.clone(), id)),
        "text.paragraph" => Some(Fragment::text(FragmentKind::Paragraph, node.text.trim(), id)),
        "items" => Some(Fragment::text(FragmentKind::ListBlock, join_lines(&node.text), id)),
        "image.single" => node
            .image_src
            .as_deref()
            .map(|src| Fragment::image(full_size_image(src), id)),
        "header" => Some(Fragment::separator(Boundary::Header, id)),
        "misc.separator" | "signature" => Some(Fragment::separator(Boundary::Break, id)),
        _ => None,
    }
}

/// Classify the main content container of a blog post. Returns the body
/// fragment and the image URLs found inside it.
pub fn classify_body(container: ElementRef<'_>) -> (Fragment, Vec<String>) {
    let text = container
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let mut images = Vec::new();
    for src in container.select(&IMG_SEL).filter_map(image_source) {
        let src = full_size_image(&src);
        if !images.contains(&src) {
            images.push(src);
        }
    }

    (Fragment::text(FragmentKind::RawBody, text, ""), images)
}

/// Real asset URL of an `<img>`. Lazy-loaded images carry it in `data-src`
/// with an inline `data:` placeholder in `src`.
fn image_source(img: ElementRef<'_>) -> Option<String> {
    let v = img.value();
    [v.attr("data-src"), v.attr("src")]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty() && !s.starts_with("data:"))
        .map(str::to_string)
}

/// Thumbnails live under `/thumbs/` or carry a `thumb-` prefix; drop either
/// to get the full-resolution asset.
pub fn full_size_image(src: &str) -> String {
    src.replace("/thumbs/", "/").replace("/thumb-", "/")
}

fn join_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
