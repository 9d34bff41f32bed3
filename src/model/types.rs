//! Normalized entity structs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of content kinds an index can hold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[serde(alias = "post", alias = "article")]
    Blog,
    #[serde(alias = "docs", alias = "doc")]
    Documentation,
    #[serde(alias = "products")]
    Product,
    #[serde(alias = "pages")]
    Page,
    #[serde(alias = "features")]
    Feature,
}

impl ContentType {
    pub const ALL: [ContentType; 5] = [
        ContentType::Blog,
        ContentType::Documentation,
        ContentType::Product,
        ContentType::Page,
        ContentType::Feature,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Blog => "blog",
            ContentType::Documentation => "documentation",
            ContentType::Product => "product",
            ContentType::Page => "page",
            ContentType::Feature => "feature",
        }
    }

    /// Phrase used by generated descriptions ("in our ...").
    pub fn label(self) -> &'static str {
        match self {
            ContentType::Blog => "blog",
            ContentType::Documentation => "documentation",
            ContentType::Product => "product catalog",
            ContentType::Page => "site",
            ContentType::Feature => "feature overview",
        }
    }

    /// URL prefix used when a unit carries no explicit url.
    pub fn default_url_prefix(self) -> &'static str {
        match self {
            ContentType::Blog => "/blog",
            ContentType::Documentation => "/docs",
            ContentType::Product => "/products",
            ContentType::Page => "",
            ContentType::Feature => "/features",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown content type: {0}")]
pub struct UnknownContentType(pub String);

impl FromStr for ContentType {
    type Err = UnknownContentType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blog" | "post" | "article" => Ok(ContentType::Blog),
            "documentation" | "docs" | "doc" => Ok(ContentType::Documentation),
            "product" | "products" => Ok(ContentType::Product),
            "page" | "pages" => Ok(ContentType::Page),
            "feature" | "features" => Ok(ContentType::Feature),
            other => Err(UnknownContentType(other.to_string())),
        }
    }
}

/// Descriptive fields of a record before derived match data is attached.
#[derive(Debug, Clone)]
pub struct RecordFields {
    pub id: String,
    pub title: String,
    pub description: String,
    pub content: String,
    pub url: String,
    pub content_type: ContentType,
    pub category: String,
    pub tags: Vec<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub word_count: usize,
    pub reading_time: u32,
    pub is_published: bool,
}

/// Lowercased copies of the fields the query engine matches on.
#[derive(Debug, Clone, Default)]
pub(crate) struct MatchKeys {
    pub title: String,
    pub description: String,
    pub url: String,
    pub tags: Vec<String>,
    /// Url path segments as `(display, lowercase)` pairs, for suggestions.
    pub url_segments: Vec<(String, String)>,
}

/// The canonical, normalized representation of one indexable document.
///
/// Derived match data (`searchable_text` and the lowercase keys) is computed
/// once in [`ContentRecord::new`] and never edited afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub content: String,
    searchable_text: String,
    pub url: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub category: String,
    pub tags: Vec<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub word_count: usize,
    pub reading_time: u32,
    pub is_published: bool,
    #[serde(skip)]
    keys: MatchKeys,
}

impl ContentRecord {
    /// Finalize a record. `source_hint` names where the record came from
    /// (relative path, catalog marker) and is folded into the searchable text.
    pub fn new(fields: RecordFields, source_hint: &str) -> Self {
        let RecordFields {
            id,
            title,
            description,
            content,
            url,
            content_type,
            category,
            tags,
            author,
            published_at,
            word_count,
            reading_time,
            is_published,
        } = fields;

        let searchable_text = [
            title.as_str(),
            description.as_str(),
            content.as_str(),
            tags.join(" ").as_str(),
            category.as_str(),
            source_hint,
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

        let keys = MatchKeys {
            title: title.to_lowercase(),
            description: description.to_lowercase(),
            url: url.to_lowercase(),
            tags: tags.iter().map(|t| t.to_lowercase()).collect(),
            url_segments: url_segments(&url)
                .into_iter()
                .map(|segment| {
                    let key = segment.to_lowercase();
                    (segment, key)
                })
                .collect(),
        };

        Self {
            id,
            title,
            description,
            content,
            searchable_text,
            url,
            content_type,
            category,
            tags,
            author,
            published_at,
            word_count,
            reading_time,
            is_published,
            keys,
        }
    }

    pub fn searchable_text(&self) -> &str {
        &self.searchable_text
    }

    pub(crate) fn keys(&self) -> &MatchKeys {
        &self.keys
    }
}

/// Path segments of a url with hyphens and underscores read as spaces.
/// Scheme and host are dropped from absolute urls.
pub(crate) fn url_segments(url: &str) -> Vec<String> {
    let path = url
        .split_once("://")
        .map_or(url, |(_, rest)| rest.split_once('/').map_or("", |(_, p)| p));
    path.split(['/', '?', '#'])
        .map(|s| s.replace(['-', '_'], " ").trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// One immutable, fully built snapshot of the index.
#[derive(Debug)]
pub struct IndexGeneration {
    pub records: Vec<ContentRecord>,
    pub built_at: DateTime<Utc>,
    /// Monotonic build number; later builds carry larger values.
    pub sequence: u64,
}

impl IndexGeneration {
    pub fn new(records: Vec<ContentRecord>, built_at: DateTime<Utc>, sequence: u64) -> Self {
        Self {
            records,
            built_at,
            sequence,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_stale(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.built_at > ttl
    }

    pub fn published(&self) -> impl Iterator<Item = &ContentRecord> {
        self.records.iter().filter(|r| r.is_published)
    }
}

/// A stored record paired with the score it earned for one query.
/// Borrowing keeps the score out of the stored record.
#[derive(Debug, Clone, Copy)]
pub struct ScoredRecord<'a> {
    pub record: &'a ContentRecord,
    pub relevance_score: f64,
}

/// Owned wire form of a scored record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecordView {
    pub id: String,
    pub title: String,
    pub description: String,
    pub content: String,
    pub searchable_text: String,
    pub url: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub category: String,
    pub tags: Vec<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub word_count: usize,
    pub reading_time: u32,
    pub is_published: bool,
    pub relevance_score: f64,
}

impl ContentRecordView {
    pub fn from_record(record: &ContentRecord, relevance_score: f64) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            description: record.description.clone(),
            content: record.content.clone(),
            searchable_text: record.searchable_text.clone(),
            url: record.url.clone(),
            content_type: record.content_type,
            category: record.category.clone(),
            tags: record.tags.clone(),
            author: record.author.clone(),
            published_at: record.published_at,
            word_count: record.word_count,
            reading_time: record.reading_time,
            is_published: record.is_published,
            relevance_score,
        }
    }
}

impl From<&ScoredRecord<'_>> for ContentRecordView {
    fn from(scored: &ScoredRecord<'_>) -> Self {
        Self::from_record(scored.record, scored.relevance_score)
    }
}
