use tracing::info;

use super::item::DedupedItem;

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

/// Drop items whose detected origin blog is not the feed being built.
/// Items without an origin marker always stay.
pub fn filter_cross_posts(
    items: Vec<DedupedItem>,
    current_feed_url: &str,
) -> (Vec<DedupedItem>, usize) {
    let current = with_trailing_slash(current_feed_url);
    let before = items.len();

    let kept: Vec<DedupedItem> = items
        .into_iter()
        .filter(|d| match d.item.origin_blog_url.as_deref() {
            None | Some("") => true,
            Some(origin) if with_trailing_slash(origin) == current => true,
            Some(origin) => {
                let slug = origin.trim_end_matches('/').rsplit('/').next().unwrap_or("unknown");
                let title: String = d.item.title.chars().take(60).collect();
                info!("Filtered cross-post: {} (from {})", title, slug);
                false
            }
        })
        .collect();

    let removed = before - kept.len();
    (kept, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::item::{DocumentKind, Item};

    fn post(origin: Option<&str>) -> DedupedItem {
        let item = Item {
            title: "Band Camp".into(),
            identity_key: "blog_post_https://x.org/tms-blog/band-camp".into(),
            fragments: vec![],
            image_urls: vec![],
            source_url: "https://x.org/tms-blog/band-camp".into(),
            source_title: "Band Camp".into(),
            publication_date: None,
            origin_blog_url: origin.map(str::to_string),
            kind: DocumentKind::BlogPost,
        };
        let key = item.identity_key.clone();
        DedupedItem::new(item, key)
    }

    #[test]
    fn removes_foreign_origin() {
        let items = vec![post(Some("https://x.org/tms-blog/"))];
        let (kept, removed) = filter_cross_posts(items, "https://x.org/ths-blog");
        assert!(kept.is_empty());
        assert_eq!(removed, 1);
    }

    #[test]
    fn keeps_matching_origin_without_slash() {
        let items = vec![post(Some("https://x.org/tms-blog/"))];
        let (kept, removed) = filter_cross_posts(items, "https://x.org/tms-blog");
        assert_eq!(kept.len(), 1);
        assert_eq!(removed, 0);
    }

    #[test]
    fn keeps_items_without_origin() {
        let items = vec![post(None), post(Some("")), post(Some("https://x.org/tms-blog"))];
        let (kept, removed) = filter_cross_posts(items, "https://x.org/ths-blog/");
        assert_eq!(kept.len(), 2);
        assert_eq!(removed, 1);
    }
}
