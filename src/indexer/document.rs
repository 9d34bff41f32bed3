//! Raw content unit → `ContentRecord`.
//!
//! Titles and descriptions are resolved through declared fallback tables:
//! ordered lists of named rules, evaluated in order, first non-empty value
//! wins. The description table always ends in a generated fallback so the
//! field can never come out empty.

use crate::connectors::{RawContentUnit, parse_timestamp};
use crate::model::types::{ContentRecord, ContentType, RecordFields};
use crate::search::canonicalize::{self, plain_text_line, truncate_chars};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Minimum length of a paragraph used as a description.
pub const MIN_PARAGRAPH_CHARS: usize = 50;
/// Minimum length of the sentence-based description.
pub const MIN_SENTENCE_CHARS: usize = 20;
/// Descriptions derived from content are cut to this many characters.
pub const DESCRIPTION_MAX_CHARS: usize = 200;
pub const WORDS_PER_MINUTE: usize = 200;

static HEADING_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t]{0,3}#{1,6}[ \t]+(.+?)[ \t#]*$").expect("heading line regex"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitParseError {
    #[error("{unit}: unit has neither body nor title")]
    Empty { unit: String },
    #[error("{unit}: metadata field `{field}` {reason}")]
    InvalidField {
        unit: String,
        field: &'static str,
        reason: String,
    },
    #[error("{unit}: missing required field `{field}`")]
    MissingField { unit: String, field: &'static str },
    #[error("{unit}: unreadable: {reason}")]
    Unreadable { unit: String, reason: String },
    #[error("{unit}: malformed front matter: {reason}")]
    FrontMatter { unit: String, reason: String },
}

impl UnitParseError {
    pub fn unit(&self) -> &str {
        match self {
            UnitParseError::Empty { unit }
            | UnitParseError::InvalidField { unit, .. }
            | UnitParseError::MissingField { unit, .. }
            | UnitParseError::Unreadable { unit, .. }
            | UnitParseError::FrontMatter { unit, .. } => unit,
        }
    }
}

/// Everything a fallback rule may look at.
pub struct UnitContext<'a> {
    pub unit: &'a RawContentUnit,
    pub content_type: ContentType,
    /// Normalized body text.
    pub content: &'a str,
    /// Resolved title; empty while the title itself is being resolved.
    pub title: &'a str,
}

pub type Resolver = fn(&UnitContext<'_>) -> Result<Option<String>, UnitParseError>;

/// One entry in a fallback table.
#[derive(Clone, Copy)]
pub struct FieldRule {
    pub name: &'static str,
    pub resolve: Resolver,
}

pub const TITLE_RULES: &[FieldRule] = &[
    FieldRule {
        name: "metadata_title",
        resolve: metadata_title,
    },
    FieldRule {
        name: "first_heading",
        resolve: first_heading,
    },
    FieldRule {
        name: "slug_title",
        resolve: slug_title,
    },
];

pub const DESCRIPTION_RULES: &[FieldRule] = &[
    FieldRule {
        name: "metadata_description",
        resolve: metadata_description,
    },
    FieldRule {
        name: "metadata_excerpt",
        resolve: metadata_excerpt,
    },
    FieldRule {
        name: "metadata_summary",
        resolve: metadata_summary,
    },
    FieldRule {
        name: "first_paragraph",
        resolve: first_paragraph,
    },
    FieldRule {
        name: "leading_sentences",
        resolve: leading_sentences,
    },
    FieldRule {
        name: "generated",
        resolve: generated_description,
    },
];

/// Evaluate a fallback table. Returns the winning rule name and its value.
pub fn resolve_field(
    rules: &[FieldRule],
    ctx: &UnitContext<'_>,
) -> Result<Option<(&'static str, String)>, UnitParseError> {
    for rule in rules {
        if let Some(value) = (rule.resolve)(ctx)?
            && !value.trim().is_empty()
        {
            return Ok(Some((rule.name, value.trim().to_string())));
        }
    }
    Ok(None)
}

/// Builds records from raw units. Stateless; all I/O happens in the sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentBuilder;

impl DocumentBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, unit: &RawContentUnit) -> Result<ContentRecord, UnitParseError> {
        let has_title = meta_string(unit, "title")?.is_some();
        if unit.raw_text.trim().is_empty() && !has_title {
            return Err(UnitParseError::Empty {
                unit: unit.identifier.clone(),
            });
        }

        let content_type = match meta_string(unit, "type")? {
            Some(raw) => raw.parse().map_err(|_| UnitParseError::InvalidField {
                unit: unit.identifier.clone(),
                field: "type",
                reason: format!("is not a known content type: {raw}"),
            })?,
            None => unit.source_type,
        };

        let content = canonicalize::normalize(&unit.raw_text);

        let mut ctx = UnitContext {
            unit,
            content_type,
            content: &content,
            title: "",
        };
        let title = resolve_field(TITLE_RULES, &ctx)?
            .map(|(_, value)| value)
            .unwrap_or_else(|| unit.identifier.clone());
        ctx.title = &title;
        let description = resolve_field(DESCRIPTION_RULES, &ctx)?
            .map(|(_, value)| value)
            .unwrap_or_default();

        let slug = meta_string(unit, "slug")?.unwrap_or_else(|| unit.identifier.clone());
        let id = match meta_string(unit, "id")? {
            Some(id) => id,
            None => format!("{}-{}", content_type, slug.replace('/', "-")),
        };
        let url = match meta_string(unit, "url")? {
            Some(url) => url,
            None => match meta_string(unit, "permalink")? {
                Some(url) => url,
                None => default_url(&unit.url_prefix, &slug),
            },
        };

        let category = meta_string(unit, "category")?.unwrap_or_else(|| unit.default_category.clone());
        let tags = collect_tags(unit)?;
        let author = meta_author(unit);
        let published_at = meta_date(unit)?;
        let is_published = meta_published(unit);

        let word_count = canonicalize::word_count(&content);
        let reading_time = reading_time_minutes(word_count);

        Ok(ContentRecord::new(
            RecordFields {
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
            },
            &unit.location,
        ))
    }
}

pub fn reading_time_minutes(word_count: usize) -> u32 {
    word_count.div_ceil(WORDS_PER_MINUTE).max(1) as u32
}

/// `guides/getting-started` → `Getting Started`.
pub fn title_from_slug(slug: &str) -> String {
    let last = slug.rsplit('/').next().unwrap_or(slug);
    last.split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .join(" ")
}

pub fn default_url(prefix: &str, slug: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if slug == "index" {
        return if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        };
    }
    format!("{}/{}", prefix, slug.trim_start_matches('/'))
}

// -------------------------------------------------------------------------
// Title rules
// -------------------------------------------------------------------------

/// Explicit titles are kept as written; only Unicode composition changes.
fn metadata_title(ctx: &UnitContext<'_>) -> Result<Option<String>, UnitParseError> {
    Ok(meta_string(ctx.unit, "title")?.map(|t| canonicalize::unicode_nfc(t.trim())))
}

/// First markdown heading in the raw body, skipping fenced code.
fn first_heading(ctx: &UnitContext<'_>) -> Result<Option<String>, UnitParseError> {
    let mut in_fence = false;
    for line in ctx.unit.raw_text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(caps) = HEADING_LINE_RE.captures(line) {
            let text = plain_text_line(&caps[1]);
            if !text.is_empty() {
                return Ok(Some(text));
            }
        }
    }
    Ok(None)
}

fn slug_title(ctx: &UnitContext<'_>) -> Result<Option<String>, UnitParseError> {
    Ok(Some(title_from_slug(&ctx.unit.identifier)))
}

// -------------------------------------------------------------------------
// Description rules
// -------------------------------------------------------------------------

fn metadata_description(ctx: &UnitContext<'_>) -> Result<Option<String>, UnitParseError> {
    meta_string(ctx.unit, "description")
}

fn metadata_excerpt(ctx: &UnitContext<'_>) -> Result<Option<String>, UnitParseError> {
    meta_string(ctx.unit, "excerpt")
}

fn metadata_summary(ctx: &UnitContext<'_>) -> Result<Option<String>, UnitParseError> {
    meta_string(ctx.unit, "summary")
}

fn first_paragraph(ctx: &UnitContext<'_>) -> Result<Option<String>, UnitParseError> {
    Ok(ctx
        .content
        .split("\n\n")
        .map(|p| p.lines().map(str::trim).join(" "))
        .find(|p| p.chars().count() >= MIN_PARAGRAPH_CHARS)
        .map(|p| truncate_chars(&p, DESCRIPTION_MAX_CHARS)))
}

fn leading_sentences(ctx: &UnitContext<'_>) -> Result<Option<String>, UnitParseError> {
    let flat = ctx.content.split_whitespace().join(" ");
    let sentences = split_sentences(&flat);
    let mut candidate = String::new();
    for sentence in sentences.into_iter().take(2) {
        if !candidate.is_empty() {
            candidate.push(' ');
        }
        candidate.push_str(sentence);
        if candidate.chars().count() >= MIN_SENTENCE_CHARS {
            return Ok(Some(truncate_chars(&candidate, DESCRIPTION_MAX_CHARS)));
        }
    }
    Ok(None)
}

fn generated_description(ctx: &UnitContext<'_>) -> Result<Option<String>, UnitParseError> {
    Ok(Some(format!(
        "Learn more about {} in our {}.",
        ctx.title,
        ctx.content_type.label()
    )))
}

/// Split on `.`, `!` or `?` followed by whitespace or end of text.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().is_none_or(|(_, next)| next.is_whitespace());
            if at_boundary {
                let end = idx + c.len_utf8();
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = end;
            }
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

// -------------------------------------------------------------------------
// Metadata accessors
// -------------------------------------------------------------------------

/// String-ish metadata value. Numbers and booleans are stringified; arrays
/// and objects are a parse failure.
fn meta_string(unit: &RawContentUnit, field: &'static str) -> Result<Option<String>, UnitParseError> {
    match unit.metadata.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(_) => Err(invalid(unit, field, "must be a string")),
    }
}

fn collect_tags(unit: &RawContentUnit) -> Result<Vec<String>, UnitParseError> {
    let mut tags = Vec::new();
    for field in ["tags", "keywords"] {
        match unit.metadata.get(field) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => tags.extend(s.split(',').map(|t| t.trim().to_string())),
            Some(Value::Array(items)) => {
                for item in items {
                    match item {
                        Value::String(s) => tags.push(s.trim().to_string()),
                        Value::Number(n) => tags.push(n.to_string()),
                        _ => return Err(invalid(unit, field, "must contain only strings")),
                    }
                }
            }
            Some(_) => return Err(invalid(unit, field, "must be a list or string")),
        }
    }
    Ok(tags
        .into_iter()
        .filter(|t| !t.is_empty())
        .unique_by(|t| t.to_lowercase())
        .collect())
}

fn meta_author(unit: &RawContentUnit) -> Option<String> {
    match unit.metadata.get("author")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(obj) => obj
            .get("name")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn meta_date(unit: &RawContentUnit) -> Result<Option<chrono::DateTime<chrono::Utc>>, UnitParseError> {
    for field in ["date", "publishedAt", "published_at"] {
        match unit.metadata.get(field) {
            None | Some(Value::Null) => continue,
            Some(value) => {
                return parse_timestamp(value)
                    .map(Some)
                    .ok_or_else(|| invalid(unit, field, "is not a recognizable date"));
            }
        }
    }
    Ok(None)
}

fn meta_published(unit: &RawContentUnit) -> bool {
    let draft = unit.metadata.get("draft").and_then(Value::as_bool).unwrap_or(false);
    let published = unit
        .metadata
        .get("published")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    !draft && published
}

fn invalid(unit: &RawContentUnit, field: &'static str, reason: &str) -> UnitParseError {
    UnitParseError::InvalidField {
        unit: unit.identifier.clone(),
        field,
        reason: reason.to_string(),
    }
}
