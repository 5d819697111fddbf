use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;
use crate::fetcher::DiscoveryRules;
use crate::parser::dedupe::NoiseFilter;
use crate::parser::segment::SegmentOptions;
use crate::parser::Pipeline;

pub const DEFAULT_CONFIG_FILE: &str = "enews.toml";
const ENV_PREFIX: &str = "ENEWS";

/// Page-navigation glyph + school hashtag footers injected by the newsletter
/// platform. Site-specific; override in `enews.toml`.
const DEFAULT_NOISE: &[&str] = &[
    "zoom_out_map talawanda high school",
    "zoom_out_map talawanda middle school",
    "zoom_out_map bogan elementary",
    "zoom_out_map kramer elementary",
    "zoom_out_map marshall elementary",
];

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FeedConfig {
    pub name: String,
    pub slug: String,
    pub blog_url: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: String,
    pub output_dir: String,
    pub noise_patterns: Vec<String>,
    pub blog_suffix: String,
    pub newsletter_host: String,
    /// Blog sub-paths that list posts rather than hold one (`tag`, `page`, ...).
    pub listing_segments: Vec<String>,
    pub concurrency: usize,
    pub item_limit: usize,
    pub feeds: Vec<FeedConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: "data/enews.sqlite".into(),
            output_dir: "output".into(),
            noise_patterns: DEFAULT_NOISE.iter().map(|s| s.to_string()).collect(),
            blog_suffix: "-blog".into(),
            newsletter_host: "smore.com".into(),
            listing_segments: DiscoveryRules::default().listing_segments,
            concurrency: 4,
            item_limit: 20,
            feeds: Vec::new(),
        }
    }
}

impl Settings {
    /// Optional config file, then `ENEWS_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("noise_patterns")
                    .with_list_parse_key("listing_segments"),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn feed(&self, slug: &str) -> Option<&FeedConfig> {
        self.feeds.iter().find(|f| f.slug == slug)
    }

    /// All feeds, or just the one named.
    pub fn selected_feeds(&self, slug: Option<&str>) -> Vec<&FeedConfig> {
        match slug {
            Some(s) => self.feed(s).into_iter().collect(),
            None => self.feeds.iter().collect(),
        }
    }

    pub fn discovery(&self) -> DiscoveryRules {
        DiscoveryRules {
            newsletter_host: self.newsletter_host.clone(),
            listing_segments: self.listing_segments.clone(),
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline {
            segment: SegmentOptions {
                blog_suffix: self.blog_suffix.clone(),
            },
            noise: NoiseFilter::new(&self.noise_patterns),
        }
    }
}
