use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::fetcher::document_from_html;
use crate::parser::item::{DocumentKind, SourceDocument};

/// One locally saved page. `markup_path` is relative to the manifest file.
#[derive(Debug, Deserialize)]
pub struct ManifestEntry {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    pub kind: DocumentKind,
    pub markup_path: PathBuf,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

/// Read a JSON manifest and the markup each entry points at. Title and date
/// come from the entry when given, else from the page.
pub fn load(path: &Path) -> Result<Vec<SourceDocument>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let entries: Vec<ManifestEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid manifest {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));

    entries
        .into_iter()
        .map(|e| {
            let markup_path = base.join(&e.markup_path);
            let markup = std::fs::read_to_string(&markup_path)
                .with_context(|| format!("Failed to read {}", markup_path.display()))?;
            let mut doc = document_from_html(&e.url, e.kind, markup);
            if let Some(title) = e.title.filter(|t| !t.trim().is_empty()) {
                doc.title = title;
            }
            if e.date.is_some() {
                doc.publication_date = e.date;
            }
            Ok(doc)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn loads_entries_relative_to_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("pages")).unwrap();
        std::fs::copy("tests/fixtures/newsletter.html", dir.path().join("pages/n.html")).unwrap();
        std::fs::copy("tests/fixtures/blog_post.html", dir.path().join("pages/b.html")).unwrap();
        let manifest = dir.path().join("manifest.json");
        std::fs::write(
            &manifest,
            r#"[
                {"url": "https://www.smore.com/n/abc", "kind": "newsletter",
                 "markup_path": "pages/n.html", "date": "2025-11-01T00:00:00Z"},
                {"url": "https://www.talawanda.org/ths-blog/fall-musical", "title": "Musical",
                 "kind": "blog_post", "markup_path": "pages/b.html"}
            ]"#,
        )
        .unwrap();

        let docs = load(&manifest).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].kind, DocumentKind::Newsletter);
        assert_eq!(docs[0].title, "Talawanda High School November News");
        assert_eq!(
            docs[0].publication_date,
            Some(Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(docs[1].title, "Musical");
        assert_eq!(
            docs[1].publication_date,
            Some(Utc.with_ymd_and_hms(2025, 10, 28, 13, 30, 0).unwrap())
        );
    }

    #[test]
    fn missing_markup_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifest.json");
        std::fs::write(
            &manifest,
            r#"[{"url": "https://x", "kind": "newsletter", "markup_path": "nope.html"}]"#,
        )
        .unwrap();
        assert!(load(&manifest).is_err());
    }
}
