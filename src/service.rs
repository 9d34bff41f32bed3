//! Request/response boundary shared by the CLI and the daemon.
//!
//! Every operation returns a response value; failures are reported through
//! `success: false` and `error` rather than as `Err`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SearchConfig;
use crate::model::types::{ContentRecordView, ContentType};
use crate::search::query::{QueryEngine, RECENT_LIMIT, SearchOptions};
use crate::search::store::IndexStore;
use crate::search::suggest;

/// Content type listed when a search arrives without a query.
pub const RECENT_DEFAULT_TYPE: ContentType = ContentType::Blog;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    #[serde(rename = "type", default)]
    pub content_type: Option<ContentType>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub success: bool,
    pub query: String,
    pub results: Vec<ContentRecordView>,
    pub total_results: usize,
    pub index_size: usize,
    pub timestamp: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SuggestRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SuggestResponse {
    pub success: bool,
    pub query: String,
    pub suggestions: Vec<String>,
    pub timestamp: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RebuildResponse {
    pub success: bool,
    pub count: usize,
    pub skipped: usize,
    pub failed_sources: Vec<String>,
    pub timestamp: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub index_size: usize,
    pub built_at: Option<DateTime<Utc>>,
    pub age_secs: Option<i64>,
    pub stale: bool,
    pub rebuilding: bool,
    pub builds: u64,
    pub last_error: Option<String>,
    pub timestamp: String,
}

pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// An index store plus the engine that queries it.
#[derive(Clone)]
pub struct SearchService {
    store: IndexStore,
    engine: QueryEngine,
}

impl SearchService {
    pub fn new(store: IndexStore, engine: QueryEngine) -> Self {
        Self { store, engine }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(IndexStore::from_config(config), QueryEngine::from_config(config))
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn search(&self, request: &SearchRequest) -> SearchResponse {
        let query = request.query.trim().to_string();
        info!(
            query = %query,
            content_type = ?request.content_type,
            limit = ?request.limit,
            "search_start"
        );

        let generation = match self.store.get() {
            Ok(generation) => generation,
            Err(e) => {
                warn!(error = %e, "search_index_unavailable");
                return SearchResponse::failure(query, 0, e.to_string());
            }
        };

        let scored = if query.is_empty() {
            let content_type = request.content_type.unwrap_or(RECENT_DEFAULT_TYPE);
            Ok(self.engine.recent(
                &generation,
                content_type,
                request.limit.map(|n| n.min(RECENT_LIMIT)),
            ))
        } else {
            let options = SearchOptions {
                content_type: request.content_type,
                limit: request.limit,
            };
            self.engine.search(&generation, &query, &options)
        };

        match scored {
            Ok(scored) => {
                let results: Vec<ContentRecordView> =
                    scored.iter().map(ContentRecordView::from).collect();
                info!(query = %query, results = results.len(), "search_complete");
                SearchResponse {
                    success: true,
                    total_results: results.len(),
                    query,
                    results,
                    index_size: generation.len(),
                    timestamp: timestamp(),
                    error: None,
                }
            }
            Err(e) => {
                warn!(query = %query, error = %e, "search_failed");
                SearchResponse::failure(query, generation.len(), e.to_string())
            }
        }
    }

    pub fn suggest(&self, request: &SuggestRequest) -> SuggestResponse {
        let query = request.query.trim().to_string();
        match self.store.get() {
            Ok(generation) => SuggestResponse {
                success: true,
                suggestions: suggest::suggest(&generation, &query, request.limit),
                query,
                timestamp: timestamp(),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "suggest_index_unavailable");
                SuggestResponse {
                    success: false,
                    query,
                    suggestions: Vec::new(),
                    timestamp: timestamp(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub fn rebuild(&self) -> RebuildResponse {
        match self.store.force_rebuild() {
            Ok(report) => RebuildResponse {
                success: true,
                count: report.count,
                skipped: report.skipped_units,
                failed_sources: report.failed_sources,
                timestamp: timestamp(),
                error: None,
            },
            Err(e) => RebuildResponse {
                success: false,
                count: 0,
                skipped: 0,
                failed_sources: Vec::new(),
                timestamp: timestamp(),
                error: Some(e.to_string()),
            },
        }
    }

    pub fn status(&self) -> StatusResponse {
        let status = self.store.status();
        StatusResponse {
            index_size: status.index_size,
            built_at: status.built_at,
            age_secs: status.age_secs,
            stale: status.stale,
            rebuilding: status.rebuilding,
            builds: status.builds,
            last_error: status.last_error,
            timestamp: timestamp(),
        }
    }
}

impl SearchResponse {
    fn failure(query: String, index_size: usize, error: String) -> Self {
        Self {
            success: false,
            query,
            results: Vec::new(),
            total_results: 0,
            index_size,
            timestamp: timestamp(),
            error: Some(error),
        }
    }
}
