//! Rebuild procedure: scan every content source, build records, resolve id
//! collisions, and hand the finished set to the index store.

pub mod document;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;
use crate::connectors::{
    CatalogSource, ContentSource, MarkdownTreeSource, SourceError, SourceScan,
};
use crate::model::types::ContentRecord;
use document::DocumentBuilder;

/// Message sent by a source producer thread. Each producer sends exactly one.
pub enum IndexMessage {
    Scanned {
        source_index: usize,
        result: Result<SourceScan, SourceError>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    /// Records in the resulting generation.
    pub count: usize,
    /// Units that failed to parse and were left out.
    pub skipped_units: usize,
    /// Sources that failed entirely, as `error` strings.
    pub failed_sources: Vec<String>,
    /// Ids that appeared more than once; the later record replaced the earlier.
    pub duplicates: usize,
    pub built_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Records plus the report describing how they were gathered.
#[derive(Debug)]
pub struct BuildOutput {
    pub records: Vec<ContentRecord>,
    pub report: BuildReport,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    #[error(
        "index build produced no records ({failed} of {total} sources failed, {skipped} units skipped)"
    )]
    TotalFailure {
        failed: usize,
        total: usize,
        skipped: usize,
        errors: Vec<String>,
    },
}

/// Runs all sources and assembles one generation's worth of records.
///
/// Sources are ordered by kind at construction (file trees before catalogs,
/// registration order within a kind) and results are always assembled in that
/// order, regardless of which producer thread finishes first.
///
/// A source whose scan outlived an earlier build's deadline is not scanned
/// again until that scan returns; until then it reports a timeout at once.
pub struct IndexBuilder {
    sources: Vec<TrackedSource>,
    documents: DocumentBuilder,
    source_timeout: Duration,
}

struct TrackedSource {
    source: Arc<dyn ContentSource>,
    scanning: Arc<AtomicBool>,
}

/// Clears a source's in-flight flag when its producer finishes or unwinds.
struct ScanGuard(Arc<AtomicBool>);

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl IndexBuilder {
    pub fn new(mut sources: Vec<Arc<dyn ContentSource>>, source_timeout: Duration) -> Self {
        sources.sort_by_key(|s| s.kind());
        Self {
            sources: sources
                .into_iter()
                .map(|source| TrackedSource {
                    source,
                    scanning: Arc::new(AtomicBool::new(false)),
                })
                .collect(),
            documents: DocumentBuilder::new(),
            source_timeout,
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        let mut sources: Vec<Arc<dyn ContentSource>> = Vec::new();
        for root in &config.content_roots {
            let mut source = MarkdownTreeSource::new(&root.path, root.content_type);
            if let Some(prefix) = &root.url_prefix {
                source = source.with_url_prefix(prefix.clone());
            }
            if let Some(category) = &root.category {
                source = source.with_category(category.clone());
            }
            sources.push(Arc::new(source));
        }
        if let Some(path) = &config.catalog_path {
            sources.push(Arc::new(CatalogSource::from_path(path)));
        }
        Self::new(sources, config.source_timeout())
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.source.name()).collect()
    }

    pub fn build(&self) -> Result<BuildOutput, BuildError> {
        let started = Instant::now();
        let results = self.scan_all();

        let mut records: Vec<ContentRecord> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut skipped_units = 0usize;
        let mut duplicates = 0usize;
        let mut failed_sources = Vec::new();

        for (source, result) in self.sources.iter().map(|s| &s.source).zip(results) {
            let scan = match result {
                Ok(scan) => scan,
                Err(e) => {
                    tracing::warn!(source = source.name(), error = %e, "source_scan_failed");
                    failed_sources.push(e.to_string());
                    continue;
                }
            };

            for failure in &scan.failures {
                tracing::warn!(
                    source = source.name(),
                    unit = failure.unit(),
                    error = %failure,
                    "unit_skipped"
                );
            }
            skipped_units += scan.failures.len();

            let mut built = Vec::with_capacity(scan.units.len() + scan.records.len());
            for unit in &scan.units {
                match self.documents.build(unit) {
                    Ok(record) => built.push(record),
                    Err(e) => {
                        tracing::warn!(
                            source = source.name(),
                            unit = e.unit(),
                            error = %e,
                            "unit_skipped"
                        );
                        skipped_units += 1;
                    }
                }
            }
            built.extend(scan.records);

            let contributed = built.len();
            for record in built {
                if let Some(&pos) = positions.get(&record.id) {
                    tracing::debug!(id = %record.id, source = source.name(), "duplicate_id_replaced");
                    records[pos] = record;
                    duplicates += 1;
                } else {
                    positions.insert(record.id.clone(), records.len());
                    records.push(record);
                }
            }
            tracing::info!(source = source.name(), records = contributed, "source_ingest");
        }

        if records.is_empty() {
            return Err(BuildError::TotalFailure {
                failed: failed_sources.len(),
                total: self.sources.len(),
                skipped: skipped_units,
                errors: failed_sources,
            });
        }

        let report = BuildReport {
            count: records.len(),
            skipped_units,
            failed_sources,
            duplicates,
            built_at: Utc::now(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            records = report.count,
            skipped = report.skipped_units,
            failed_sources = report.failed_sources.len(),
            duplicates = report.duplicates,
            elapsed_ms = report.elapsed_ms,
            "index_build_complete"
        );
        Ok(BuildOutput { records, report })
    }

    /// Scan every source on its own thread. Sources that have not answered by
    /// the deadline are reported as timed out; their late output is dropped.
    fn scan_all(&self) -> Vec<Result<SourceScan, SourceError>> {
        let total = self.sources.len();
        let (tx, rx) = bounded::<IndexMessage>(total.max(1));
        let mut slots: Vec<Option<Result<SourceScan, SourceError>>> =
            (0..total).map(|_| None).collect();
        let mut pending = 0usize;
        for (index, tracked) in self.sources.iter().enumerate() {
            if tracked.scanning.swap(true, Ordering::AcqRel) {
                tracing::warn!(source = tracked.source.name(), "source_scan_still_running");
                slots[index] = Some(Err(self.timeout_error(tracked.source.name())));
                continue;
            }
            let guard = ScanGuard(Arc::clone(&tracked.scanning));
            spawn_source_producer(index, Arc::clone(&tracked.source), guard, tx.clone());
            pending += 1;
        }
        drop(tx);

        let deadline = Instant::now() + self.source_timeout;
        let mut timed_out = false;

        while pending > 0 {
            match rx.recv_deadline(deadline) {
                Ok(IndexMessage::Scanned {
                    source_index,
                    result,
                }) => {
                    slots[source_index] = Some(result);
                    pending -= 1;
                }
                Err(RecvTimeoutError::Timeout) => {
                    timed_out = true;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        slots
            .into_iter()
            .zip(&self.sources)
            .map(|(slot, tracked)| {
                slot.unwrap_or_else(|| {
                    if timed_out {
                        Err(self.timeout_error(tracked.source.name()))
                    } else {
                        Err(SourceError::Unavailable {
                            name: tracked.source.name().to_string(),
                            reason: "scan thread exited without a result".to_string(),
                        })
                    }
                })
            })
            .collect()
    }

    fn timeout_error(&self, name: &str) -> SourceError {
        SourceError::Timeout {
            name: name.to_string(),
            timeout_ms: self.source_timeout.as_millis() as u64,
        }
    }
}

fn spawn_source_producer(
    index: usize,
    source: Arc<dyn ContentSource>,
    guard: ScanGuard,
    tx: Sender<IndexMessage>,
) {
    thread::spawn(move || {
        let started = Instant::now();
        let result = source.scan();
        // Cleared before sending so the next build can scan this source again.
        drop(guard);
        tracing::debug!(
            source = source.name(),
            ok = result.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "source_scan_done"
        );
        // Receiver is gone once the deadline passed.
        let _ = tx.send(IndexMessage::Scanned {
            source_index: index,
            result,
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::{RawContentUnit, SourceKind};
    use crate::model::types::ContentType;
    use serde_json::{Map, json};
    use std::sync::atomic::AtomicUsize;

    struct FakeSource {
        name: String,
        kind: SourceKind,
        delay: Duration,
        outcome: Result<Vec<(&'static str, &'static str)>, ()>,
        scans: AtomicUsize,
    }

    impl FakeSource {
        fn files(name: &str, units: Vec<(&'static str, &'static str)>) -> Arc<dyn ContentSource> {
            Arc::new(Self {
                name: name.to_string(),
                kind: SourceKind::Files,
                delay: Duration::ZERO,
                outcome: Ok(units),
                scans: AtomicUsize::new(0),
            })
        }

        fn failing(name: &str) -> Arc<dyn ContentSource> {
            Arc::new(Self {
                name: name.to_string(),
                kind: SourceKind::Files,
                delay: Duration::ZERO,
                outcome: Err(()),
                scans: AtomicUsize::new(0),
            })
        }

        fn slow(name: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                kind: SourceKind::Files,
                delay,
                outcome: Ok(vec![("late", "Late body")]),
                scans: AtomicUsize::new(0),
            })
        }
    }

    impl ContentSource for FakeSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> SourceKind {
            self.kind
        }

        fn scan(&self) -> Result<SourceScan, SourceError> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            let units = self.outcome.clone().map_err(|_| SourceError::Unavailable {
                name: self.name.clone(),
                reason: "offline".into(),
            })?;
            Ok(SourceScan {
                units: units
                    .into_iter()
                    .map(|(id, body)| RawContentUnit {
                        identifier: id.to_string(),
                        raw_text: body.to_string(),
                        metadata: Map::new(),
                        source_type: ContentType::Blog,
                        location: format!("{}/{id}", self.name),
                        url_prefix: "/blog".into(),
                        default_category: "Blog".into(),
                    })
                    .collect(),
                ..SourceScan::default()
            })
        }
    }

    fn catalog(entries: Vec<serde_json::Value>) -> Arc<dyn ContentSource> {
        Arc::new(CatalogSource::from_entries("static", entries))
    }

    #[test]
    fn builds_in_source_order_with_catalog_last() {
        let builder = IndexBuilder::new(
            vec![
                catalog(vec![json!({
                    "id": "product-vault", "title": "Vault", "description": "d", "url": "/v"
                })]),
                FakeSource::files("a", vec![("one", "First body"), ("two", "Second body")]),
                FakeSource::files("b", vec![("three", "Third body")]),
            ],
            Duration::from_secs(5),
        );
        let output = builder.build().unwrap();
        let ids: Vec<_> = output.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["blog-one", "blog-two", "blog-three", "product-vault"]);
        assert_eq!(output.report.count, 4);
        assert!(output.report.failed_sources.is_empty());
    }

    #[test]
    fn later_records_replace_earlier_ids_in_place() {
        let builder = IndexBuilder::new(
            vec![
                FakeSource::files("a", vec![("dup", "From files"), ("other", "Other body")]),
                catalog(vec![json!({
                    "id": "blog-dup", "title": "Curated", "description": "d", "url": "/c", "type": "blog"
                })]),
            ],
            Duration::from_secs(5),
        );
        let output = builder.build().unwrap();
        assert_eq!(output.records.len(), 2);
        assert_eq!(output.records[0].id, "blog-dup");
        assert_eq!(output.records[0].title, "Curated");
        assert_eq!(output.report.duplicates, 1);
    }

    #[test]
    fn failed_source_degrades_build() {
        let builder = IndexBuilder::new(
            vec![
                FakeSource::failing("down"),
                FakeSource::files("up", vec![("ok", "Body")]),
            ],
            Duration::from_secs(5),
        );
        let output = builder.build().unwrap();
        assert_eq!(output.report.count, 1);
        assert_eq!(output.report.failed_sources.len(), 1);
        assert!(output.report.failed_sources[0].contains("down"));
    }

    #[test]
    fn unparseable_units_are_skipped_and_counted() {
        let builder = IndexBuilder::new(
            vec![FakeSource::files("a", vec![("empty", "   "), ("ok", "Body")])],
            Duration::from_secs(5),
        );
        let output = builder.build().unwrap();
        assert_eq!(output.report.count, 1);
        assert_eq!(output.report.skipped_units, 1);
    }

    #[test]
    fn all_sources_failing_is_total_failure() {
        let builder = IndexBuilder::new(
            vec![FakeSource::failing("x"), FakeSource::failing("y")],
            Duration::from_secs(5),
        );
        let err = builder.build().unwrap_err();
        let BuildError::TotalFailure { failed, total, .. } = err;
        assert_eq!((failed, total), (2, 2));
    }

    #[test]
    fn no_sources_is_total_failure() {
        let builder = IndexBuilder::new(Vec::new(), Duration::from_secs(1));
        assert!(builder.build().is_err());
    }

    #[test]
    fn slow_source_times_out() {
        let builder = IndexBuilder::new(
            vec![
                FakeSource::slow("slow", Duration::from_secs(2)) as Arc<dyn ContentSource>,
                FakeSource::files("fast", vec![("ok", "Body")]),
            ],
            Duration::from_millis(200),
        );
        let started = Instant::now();
        let output = builder.build().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(output.report.count, 1);
        assert!(output.report.failed_sources[0].contains("timed out"));
    }

    #[test]
    fn source_still_scanning_is_not_started_twice() {
        let slow = FakeSource::slow("slow", Duration::from_millis(600));
        let builder = IndexBuilder::new(
            vec![
                Arc::clone(&slow) as Arc<dyn ContentSource>,
                FakeSource::files("fast", vec![("ok", "Body")]),
            ],
            Duration::from_millis(100),
        );

        let first = builder.build().unwrap();
        assert!(first.report.failed_sources[0].contains("timed out"));

        let started = Instant::now();
        let second = builder.build().unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(second.report.count, 1);
        assert!(second.report.failed_sources[0].contains("timed out"));
        assert_eq!(slow.scans.load(Ordering::SeqCst), 1);

        thread::sleep(Duration::from_millis(900));
        let third = builder.build().unwrap();
        assert_eq!(third.report.count, 1);
        assert_eq!(slow.scans.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rebuild_is_deterministic() {
        let builder = IndexBuilder::new(
            vec![
                FakeSource::files("a", vec![("one", "Body one"), ("two", "Body two")]),
                FakeSource::files("b", vec![("three", "Body three")]),
            ],
            Duration::from_secs(5),
        );
        let first: Vec<_> = builder.build().unwrap().records.into_iter().map(|r| r.id).collect();
        let second: Vec<_> = builder.build().unwrap().records.into_iter().map(|r| r.id).collect();
        assert_eq!(first, second);
    }
}
