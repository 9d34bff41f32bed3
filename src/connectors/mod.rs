//! Content sources: markdown trees on disk and curated JSON catalogs.

pub mod catalog;
pub mod markdown;

use crate::indexer::document::UnitParseError;
use crate::model::types::{ContentRecord, ContentType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

pub use catalog::CatalogSource;
pub use markdown::MarkdownTreeSource;

/// Where a source sits in the rebuild order. File trees run first so curated
/// catalog records are appended last and win id collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SourceKind {
    Files,
    Catalog,
}

/// One raw document as read from a source, before the document builder runs.
#[derive(Debug, Clone)]
pub struct RawContentUnit {
    /// Stable slug-like identifier (`guides/setup`, `hello-world`).
    pub identifier: String,
    pub raw_text: String,
    pub metadata: Map<String, Value>,
    pub source_type: ContentType,
    /// Human-readable origin, folded into searchable text.
    pub location: String,
    pub url_prefix: String,
    pub default_category: String,
}

/// Output of a single source scan. Units still need the document builder;
/// records arrive finished (curated catalog entries).
#[derive(Debug, Default)]
pub struct SourceScan {
    pub units: Vec<RawContentUnit>,
    pub records: Vec<ContentRecord>,
    pub failures: Vec<UnitParseError>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("source {name} unavailable: {reason}")]
    Unavailable { name: String, reason: String },
    #[error("source {name} timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },
    #[error("source {name} malformed: {reason}")]
    Malformed { name: String, reason: String },
}

impl SourceError {
    pub fn source_name(&self) -> &str {
        match self {
            SourceError::Unavailable { name, .. }
            | SourceError::Timeout { name, .. }
            | SourceError::Malformed { name, .. } => name,
        }
    }
}

pub trait ContentSource: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> SourceKind;
    fn scan(&self) -> Result<SourceScan, SourceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FrontMatterError {
    #[error("unterminated front matter block")]
    Unterminated,
    #[error("front matter is not a mapping")]
    NotAMapping,
    #[error("invalid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Split a leading `---` YAML block from the body. Text without a front
/// matter block yields empty metadata and the whole text as body.
pub fn split_front_matter(text: &str) -> Result<(Map<String, Value>, &str), FrontMatterError> {
    let text = text.strip_prefix('\u{FEFF}').unwrap_or(text);
    let Some(first_line_end) = text.find('\n') else {
        return Ok((Map::new(), text));
    };
    if text[..first_line_end].trim_end() != "---" {
        return Ok((Map::new(), text));
    }

    let rest = &text[first_line_end + 1..];
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            let metadata = if yaml.trim().is_empty() {
                Map::new()
            } else {
                match serde_yaml::from_str::<Value>(yaml)? {
                    Value::Object(map) => map,
                    Value::Null => Map::new(),
                    _ => return Err(FrontMatterError::NotAMapping),
                }
            };
            return Ok((metadata, body));
        }
        offset += line.len();
    }

    Err(FrontMatterError::Unterminated)
}

/// Parse a timestamp from the shapes content metadata uses: epoch seconds or
/// milliseconds (number or numeric string), RFC 3339, `YYYY-MM-DD HH:MM:SS`,
/// or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_timestamp(val: &Value) -> Option<DateTime<Utc>> {
    if let Some(ts) = val.as_i64() {
        return from_epoch(ts);
    }
    let s = val.as_str()?.trim();
    if let Ok(num) = s.parse::<i64>() {
        return from_epoch(num);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive));
    }
    None
}

/// Values below 100_000_000_000 are seconds, anything larger is millis.
fn from_epoch(ts: i64) -> Option<DateTime<Utc>> {
    if (0..100_000_000_000).contains(&ts) {
        DateTime::from_timestamp(ts, 0)
    } else {
        DateTime::from_timestamp_millis(ts)
    }
}
