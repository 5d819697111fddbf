use std::cmp::Reverse;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::parser::item::DedupedItem;

/// Keep the `n` most recent items; undated items count as oldest.
pub fn limit_recent(mut items: Vec<DedupedItem>, n: usize) -> Vec<DedupedItem> {
    if n == 0 || items.len() <= n {
        return items;
    }
    items.sort_by_key(|d| Reverse(d.date()));
    items.truncate(n);
    items
}

/// Newest first, with undated items ahead of everything else.
pub fn sort_for_output(items: &mut [DedupedItem]) {
    items.sort_by(|a, b| match (a.date(), b.date()) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(x), Some(y)) => y.cmp(&x),
    });
}

pub fn items_path(dir: &Path, slug: &str) -> PathBuf {
    dir.join(format!("{}-items.json", slug))
}

pub fn write_items(items: &mut [DedupedItem], path: &Path) -> Result<()> {
    sort_for_output(items);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(&*items)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::parser::item::{DocumentKind, Fragment, FragmentKind, Item};

    fn rec(title: &str, day: Option<u32>) -> DedupedItem {
        let item = Item {
            title: title.into(),
            identity_key: format!("id-{}", title),
            fragments: vec![Fragment::text(FragmentKind::Paragraph, "text", "p")],
            image_urls: vec!["https://cdn.smore.com/a.jpg".into()],
            source_url: "https://www.smore.com/n/a".into(),
            source_title: "News".into(),
            publication_date: day.map(|d| Utc.with_ymd_and_hms(2025, 11, d, 0, 0, 0).unwrap()),
            origin_blog_url: None,
            kind: DocumentKind::Newsletter,
        };
        let key = item.identity_key.clone();
        DedupedItem::new(item, key)
    }

    fn titles(items: &[DedupedItem]) -> Vec<&str> {
        items.iter().map(|d| d.item.title.as_str()).collect()
    }

    #[test]
    fn limit_keeps_newest_and_drops_undated() {
        let items = vec![
            rec("old", Some(1)),
            rec("none", None),
            rec("new", Some(20)),
            rec("mid", Some(10)),
        ];
        let kept = limit_recent(items, 2);
        assert_eq!(titles(&kept), vec!["new", "mid"]);
    }

    #[test]
    fn limit_zero_or_large_is_noop() {
        let items = vec![rec("a", None), rec("b", Some(2))];
        assert_eq!(limit_recent(items.clone(), 0).len(), 2);
        assert_eq!(limit_recent(items, 5).len(), 2);
    }

    #[test]
    fn output_order() {
        let mut items = vec![rec("old", Some(1)), rec("none", None), rec("new", Some(20))];
        sort_for_output(&mut items);
        assert_eq!(titles(&items), vec!["none", "new", "old"]);
    }

    #[test]
    fn writes_json_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = items_path(&dir.path().join("out"), "ths");
        let mut items = vec![rec("old", Some(1)), rec("new", Some(20))];
        write_items(&mut items, &path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let arr = json.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["title"], "new");
        assert_eq!(arr[0]["hash"], "id-new");
        assert_eq!(arr[0]["identity_key"], "id-new");
        assert_eq!(arr[0]["kind"], "newsletter");
        assert_eq!(arr[0]["images"][0], "https://cdn.smore.com/a.jpg");
        assert_eq!(arr[0]["blocks"][0]["kind"], "paragraph");
        assert!(arr[0]["date"].as_str().unwrap().starts_with("2025-11-20"));
        assert!(arr[0].get("origin_blog_url").is_none());

        let back: Vec<DedupedItem> = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, items);
    }
}
