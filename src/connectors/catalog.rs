use super::{ContentSource, SourceError, SourceKind, SourceScan, parse_timestamp};
use crate::indexer::document::{UnitParseError, reading_time_minutes};
use crate::model::types::{ContentRecord, ContentType, RecordFields};
use crate::search::canonicalize;
use itertools::Itertools;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

/// Location hint folded into the searchable text of curated records.
pub const CATALOG_HINT: &str = "catalog";

/// Curated entry as stored in a catalog file. Title, description and url are
/// supplied by the curator, so no inference runs on them.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogEntry {
    id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    #[serde(rename = "type")]
    content_type: Option<String>,
    category: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    content: String,
    author: Option<String>,
    published_at: Option<Value>,
    is_published: Option<bool>,
}

#[derive(Debug, Clone)]
enum CatalogOrigin {
    File(PathBuf),
    Inline(Vec<Value>),
}

/// Static catalog of curated records, appended after every file source.
#[derive(Debug, Clone)]
pub struct CatalogSource {
    name: String,
    origin: CatalogOrigin,
    default_type: ContentType,
}

impl CatalogSource {
    /// Catalog backed by a JSON array on disk.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("catalog:{}", path.display()),
            origin: CatalogOrigin::File(path),
            default_type: ContentType::Product,
        }
    }

    /// Catalog compiled into the process.
    pub fn from_entries(name: impl Into<String>, entries: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            origin: CatalogOrigin::Inline(entries),
            default_type: ContentType::Product,
        }
    }

    pub fn with_default_type(mut self, content_type: ContentType) -> Self {
        self.default_type = content_type;
        self
    }

    fn load_entries(&self) -> Result<Vec<Value>, SourceError> {
        match &self.origin {
            CatalogOrigin::Inline(entries) => Ok(entries.clone()),
            CatalogOrigin::File(path) => {
                let text =
                    std::fs::read_to_string(path).map_err(|e| SourceError::Unavailable {
                        name: self.name.clone(),
                        reason: e.to_string(),
                    })?;
                serde_json::from_str::<Vec<Value>>(&text).map_err(|e| SourceError::Malformed {
                    name: self.name.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn build_record(&self, index: usize, raw: Value) -> Result<ContentRecord, UnitParseError> {
        let fallback_name = format!("{}[{}]", self.name, index);
        let entry: CatalogEntry =
            serde_json::from_value(raw).map_err(|e| UnitParseError::InvalidField {
                unit: fallback_name.clone(),
                field: "entry",
                reason: e.to_string(),
            })?;

        let unit = entry.id.clone().unwrap_or(fallback_name);
        let required = |value: Option<String>, field: &'static str| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| UnitParseError::MissingField {
                    unit: unit.clone(),
                    field,
                })
        };
        let id = required(entry.id, "id")?;
        let title = required(entry.title, "title")?;
        let description = required(entry.description, "description")?;
        let url = required(entry.url, "url")?;

        let content_type = match entry.content_type {
            Some(raw) => raw.parse().map_err(|_| UnitParseError::InvalidField {
                unit: unit.clone(),
                field: "type",
                reason: format!("is not a known content type: {raw}"),
            })?,
            None => self.default_type,
        };
        let published_at = match entry.published_at {
            None | Some(Value::Null) => None,
            Some(value) => Some(parse_timestamp(&value).ok_or_else(|| {
                UnitParseError::InvalidField {
                    unit: unit.clone(),
                    field: "publishedAt",
                    reason: "is not a recognizable date".to_string(),
                }
            })?),
        };

        let content = canonicalize::normalize(&entry.content);
        let word_count = canonicalize::word_count(&content);
        let tags = entry
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unique_by(|t| t.to_lowercase())
            .collect();

        Ok(ContentRecord::new(
            RecordFields {
                id,
                title,
                description,
                content,
                url,
                content_type,
                category: entry
                    .category
                    .unwrap_or_else(|| super::markdown::default_category(content_type).to_string()),
                tags,
                author: entry.author,
                published_at,
                word_count,
                reading_time: reading_time_minutes(word_count),
                is_published: entry.is_published.unwrap_or(true),
            },
            CATALOG_HINT,
        ))
    }
}

impl ContentSource for CatalogSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Catalog
    }

    fn scan(&self) -> Result<SourceScan, SourceError> {
        let mut scan = SourceScan::default();
        for (index, raw) in self.load_entries()?.into_iter().enumerate() {
            match self.build_record(index, raw) {
                Ok(record) => scan.records.push(record),
                Err(e) => scan.failures.push(e),
            }
        }
        Ok(scan)
    }
}
