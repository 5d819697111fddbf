use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Newsletter,
    BlogPost,
}

/// Which structural boundary a separator block stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// `header`: transparent, never ends an item.
    Header,
    /// `misc.separator` / `signature`: ends the current item.
    Break,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    Title,
    Paragraph,
    Image,
    ListBlock,
    Separator(Boundary),
    RawBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub kind: FragmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub source_block_id: String,
}

impl Fragment {
    pub fn text(kind: FragmentKind, text: impl Into<String>, block_id: &str) -> Self {
        Self {
            kind,
            text: Some(text.into()),
            image_url: None,
            source_block_id: block_id.to_string(),
        }
    }

    pub fn image(url: impl Into<String>, block_id: &str) -> Self {
        Self {
            kind: FragmentKind::Image,
            text: None,
            image_url: Some(url.into()),
            source_block_id: block_id.to_string(),
        }
    }

    pub fn separator(boundary: Boundary, block_id: &str) -> Self {
        Self {
            kind: FragmentKind::Separator(boundary),
            text: None,
            image_url: None,
            source_block_id: block_id.to_string(),
        }
    }

    /// Text content, if any and not blank.
    pub fn non_empty_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// One fetched page, as handed over by the fetcher or an offline manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub url: String,
    pub title: String,
    pub kind: DocumentKind,
    pub markup: String,
    pub publication_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub title: String,
    pub identity_key: String,
    #[serde(rename = "blocks")]
    pub fragments: Vec<Fragment>,
    #[serde(rename = "images")]
    pub image_urls: Vec<String>,
    pub source_url: String,
    pub source_title: String,
    #[serde(rename = "date")]
    pub publication_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_blog_url: Option<String>,
    pub kind: DocumentKind,
}

impl Item {
    /// Empty accumulator carrying the owning document's metadata.
    pub fn empty_for(doc: &SourceDocument) -> Self {
        Self {
            title: String::new(),
            identity_key: String::new(),
            fragments: Vec::new(),
            image_urls: Vec::new(),
            source_url: doc.url.clone(),
            source_title: doc.title.clone(),
            publication_date: doc.publication_date,
            origin_blog_url: None,
            kind: doc.kind,
        }
    }
}

/// One record per distinct identity surviving noise filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupedItem {
    #[serde(flatten)]
    pub item: Item,
    pub hash: String,
}

impl DedupedItem {
    pub fn new(mut item: Item, key: String) -> Self {
        item.identity_key = key.clone();
        Self { item, hash: key }
    }

    pub fn key(&self) -> &str {
        &self.hash
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.item.publication_date
    }
}
