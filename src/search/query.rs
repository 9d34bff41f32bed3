//! Filtering and relevance scoring over one index generation.
//!
//! Matching is literal substring containment on precomputed lowercase keys.
//! No query text is ever compiled into a pattern, so characters such as
//! `.`, `*` or `(` only ever match themselves.

use chrono::{DateTime, Utc};

use crate::config::SearchConfig;
use crate::model::types::{ContentRecord, ContentType, IndexGeneration, ScoredRecord};

/// Queries longer than this are rejected outright.
pub const MAX_QUERY_CHARS: usize = 500;
/// Upper bound for the no-query "recent" listing.
pub const RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("query engine fault: {0}")]
    Fault(String),
    #[error("query is too long ({len} characters, max {max})")]
    QueryTooLong { len: usize, max: usize },
}

/// Additive scoring weights. Magnitudes are tunable; the ordering
/// title-exact > title-contains > tag-exact > description > tag-partial >
/// url > content frequency > type and recency boosts is what callers rely on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub title_exact: f64,
    pub title_contains: f64,
    pub title_prefix: f64,
    pub tag_exact: f64,
    pub description: f64,
    pub tag_partial: f64,
    pub url: f64,
    pub content_base: f64,
    pub content_per_occurrence: f64,
    pub content_occurrence_cap: usize,
    pub recency: f64,
    pub type_product: f64,
    pub type_blog: f64,
    pub type_feature: f64,
    pub type_documentation: f64,
    pub type_page: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            title_exact: 1000.0,
            title_contains: 100.0,
            title_prefix: 50.0,
            tag_exact: 60.0,
            description: 40.0,
            tag_partial: 20.0,
            url: 16.0,
            content_base: 5.0,
            content_per_occurrence: 0.2,
            content_occurrence_cap: 20,
            recency: 4.0,
            type_product: 3.0,
            type_blog: 2.5,
            type_feature: 2.0,
            type_documentation: 1.5,
            type_page: 0.0,
        }
    }
}

impl ScoringWeights {
    pub fn type_boost(&self, content_type: ContentType) -> f64 {
        match content_type {
            ContentType::Product => self.type_product,
            ContentType::Blog => self.type_blog,
            ContentType::Feature => self.type_feature,
            ContentType::Documentation => self.type_documentation,
            ContentType::Page => self.type_page,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    pub content_type: Option<ContentType>,
    /// `None` or `Some(0)` means the engine default.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct QueryEngine {
    weights: ScoringWeights,
    default_limit: usize,
    max_limit: usize,
    recency_window: chrono::Duration,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

impl QueryEngine {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            weights: ScoringWeights::default(),
            default_limit: config.default_limit.max(1),
            max_limit: config.max_limit.max(1),
            recency_window: config.recency_window(),
        }
    }

    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .filter(|&n| n > 0)
            .unwrap_or(self.default_limit)
            .min(self.max_limit)
    }

    pub fn search<'g>(
        &self,
        generation: &'g IndexGeneration,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<ScoredRecord<'g>>, QueryError> {
        self.search_at(generation, query, options, Utc::now())
    }

    /// [`search`](Self::search) with an explicit clock, for the recency boost.
    pub fn search_at<'g>(
        &self,
        generation: &'g IndexGeneration,
        query: &str,
        options: &SearchOptions,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredRecord<'g>>, QueryError> {
        let trimmed = query.trim();
        let len = trimmed.chars().count();
        if len > MAX_QUERY_CHARS {
            return Err(QueryError::QueryTooLong {
                len,
                max: MAX_QUERY_CHARS,
            });
        }
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let needle = trimmed.to_lowercase();

        let mut scored = Vec::new();
        for record in generation.published() {
            if let Some(wanted) = options.content_type
                && record.content_type != wanted
            {
                continue;
            }
            if !matches_record(record, &needle) {
                continue;
            }
            let relevance_score = self.score(record, &needle, now);
            if !relevance_score.is_finite() {
                return Err(QueryError::Fault(format!(
                    "non-finite score for record {}",
                    record.id
                )));
            }
            scored.push(ScoredRecord {
                record,
                relevance_score,
            });
        }

        // Stable: equal scores keep build order.
        scored.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        scored.truncate(self.effective_limit(options.limit));

        tracing::debug!(
            query = trimmed,
            content_type = ?options.content_type,
            results = scored.len(),
            "search_complete"
        );
        Ok(scored)
    }

    /// Score one record against an already-lowercased needle.
    pub fn score(&self, record: &ContentRecord, needle: &str, now: DateTime<Utc>) -> f64 {
        let w = &self.weights;
        let keys = record.keys();
        let mut score = 0.0;

        if keys.title == needle {
            score += w.title_exact;
        }
        if keys.title.contains(needle) {
            score += w.title_contains;
            if keys.title.starts_with(needle) {
                score += w.title_prefix;
            }
        }
        if keys.tags.iter().any(|t| t == needle) {
            score += w.tag_exact;
        } else if keys.tags.iter().any(|t| t.contains(needle)) {
            score += w.tag_partial;
        }
        if keys.description.contains(needle) {
            score += w.description;
        }
        if keys.url.contains(needle) {
            score += w.url;
        }

        let occurrences = record.searchable_text().matches(needle).count();
        if occurrences > 0 {
            score += w.content_base
                + w.content_per_occurrence * occurrences.min(w.content_occurrence_cap) as f64;
        }

        score += w.type_boost(record.content_type);

        if record.content_type == ContentType::Blog
            && let Some(published) = record.published_at
            && published <= now
            && now - published <= self.recency_window
        {
            score += w.recency;
        }

        score
    }

    /// Newest published records of one type; undated records sort last.
    pub fn recent<'g>(
        &self,
        generation: &'g IndexGeneration,
        content_type: ContentType,
        limit: Option<usize>,
    ) -> Vec<ScoredRecord<'g>> {
        let mut records: Vec<&ContentRecord> = generation
            .published()
            .filter(|r| r.content_type == content_type)
            .collect();
        records.sort_by(|a, b| match (a.published_at, b.published_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        let cap = limit.filter(|&n| n > 0).unwrap_or(RECENT_LIMIT).min(RECENT_LIMIT);
        records
            .into_iter()
            .take(cap)
            .map(|record| ScoredRecord {
                record,
                relevance_score: 0.0,
            })
            .collect()
    }
}

/// Literal containment against title, description, url, tags, or the full
/// searchable text. `needle` must already be lowercase.
pub fn matches_record(record: &ContentRecord, needle: &str) -> bool {
    let keys = record.keys();
    record.searchable_text().contains(needle)
        || keys.title.contains(needle)
        || keys.description.contains(needle)
        || keys.url.contains(needle)
        || keys.tags.iter().any(|t| t.contains(needle))
}
