//! Readers racing rebuilds: every query sees exactly one generation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use content_search::connectors::{ContentSource, SourceError, SourceKind, SourceScan};
use content_search::indexer::IndexBuilder;
use content_search::model::types::{ContentRecord, ContentType, RecordFields};
use content_search::search::query::QueryEngine;
use content_search::search::store::IndexStore;
use content_search::service::{SearchRequest, SearchService};

const RECORDS: usize = 12;

/// Emits `RECORDS` records tagged with the current version, slowly.
struct Versioned {
    version: Arc<AtomicU64>,
    scans: AtomicUsize,
    delay: Duration,
}

impl ContentSource for Versioned {
    fn name(&self) -> &str {
        "versioned"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Catalog
    }

    fn scan(&self) -> Result<SourceScan, SourceError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let version = self.version.load(Ordering::SeqCst);
        thread::sleep(self.delay);
        let records = (0..RECORDS)
            .map(|i| {
                ContentRecord::new(
                    RecordFields {
                        id: format!("item-{i}"),
                        title: format!("Shared Item {i}"),
                        description: format!("release v{version}"),
                        content: "shared body".to_string(),
                        url: format!("/items/{i}"),
                        content_type: ContentType::Page,
                        category: "Pages".to_string(),
                        tags: vec![format!("v{version}")],
                        author: None,
                        published_at: None,
                        word_count: 2,
                        reading_time: 1,
                        is_published: true,
                    },
                    "catalog",
                )
            })
            .collect();
        Ok(SourceScan {
            records,
            ..SourceScan::default()
        })
    }
}

fn service(delay: Duration) -> (SearchService, Arc<AtomicU64>, Arc<Versioned>) {
    let version = Arc::new(AtomicU64::new(1));
    let source = Arc::new(Versioned {
        version: version.clone(),
        scans: AtomicUsize::new(0),
        delay,
    });
    let store = IndexStore::new(
        IndexBuilder::new(vec![source.clone() as Arc<dyn ContentSource>], Duration::from_secs(10)),
        chrono::Duration::minutes(10),
    );
    (SearchService::new(store, QueryEngine::default()), version, source)
}

#[test]
fn readers_never_see_a_mixed_generation() {
    let (service, version, _source) = service(Duration::from_millis(20));
    assert!(service.rebuild().success);

    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let service = service.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut checked = 0usize;
                while !stop.load(Ordering::SeqCst) {
                    let response = service.search(&SearchRequest {
                        query: "shared".into(),
                        limit: Some(100),
                        ..SearchRequest::default()
                    });
                    assert!(response.success, "{:?}", response.error);
                    assert_eq!(response.results.len(), RECORDS);
                    let first = &response.results[0].tags;
                    assert!(response.results.iter().all(|r| &r.tags == first));
                    checked += 1;
                }
                checked
            })
        })
        .collect();

    for v in 2..=6 {
        version.store(v, Ordering::SeqCst);
        let rebuild = service.rebuild();
        assert!(rebuild.success);
        assert_eq!(rebuild.count, RECORDS);
    }
    stop.store(true, Ordering::SeqCst);

    let checked: usize = readers.into_iter().map(|r| r.join().expect("reader")).sum();
    assert!(checked > 0);

    let latest = service.search(&SearchRequest {
        query: "v6".into(),
        ..SearchRequest::default()
    });
    assert_eq!(latest.results.len(), RECORDS);
}

#[test]
fn reads_are_served_while_a_rebuild_runs() {
    let (service, version, _source) = service(Duration::from_millis(300));
    assert!(service.rebuild().success);

    version.store(2, Ordering::SeqCst);
    let rebuilding = {
        let service = service.clone();
        thread::spawn(move || service.rebuild())
    };
    thread::sleep(Duration::from_millis(50));

    let during = service.search(&SearchRequest {
        query: "v1".into(),
        ..SearchRequest::default()
    });
    assert!(during.success);
    assert_eq!(during.results.len(), RECORDS);
    assert!(service.status().rebuilding);

    assert!(rebuilding.join().expect("rebuild thread").success);
    let after = service.search(&SearchRequest {
        query: "v2".into(),
        ..SearchRequest::default()
    });
    assert_eq!(after.results.len(), RECORDS);
    assert!(!service.status().rebuilding);
}

#[test]
fn concurrent_cold_searches_build_once() {
    let (service, _version, source) = service(Duration::from_millis(100));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            thread::spawn(move || {
                service
                    .search(&SearchRequest {
                        query: "shared".into(),
                        ..SearchRequest::default()
                    })
                    .results
                    .len()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().expect("search thread"), RECORDS);
    }
    assert_eq!(source.scans.load(Ordering::SeqCst), 1);
    assert_eq!(service.status().builds, 1);
}
