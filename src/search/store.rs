//! Holds the current index generation and decides when to rebuild it.
//!
//! Readers clone an `Arc<IndexGeneration>` under a shared lock and work on
//! that snapshot; a finished build is swapped in under a short write lock.
//! Builds are single-flight: at most one runs at a time, and callers that
//! queued behind a build may adopt its outcome instead of running another.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::indexer::{BuildError, BuildReport, IndexBuilder};
use crate::model::types::IndexGeneration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("index build aborted: {0}")]
    Poisoned(String),
}

/// Snapshot of store state for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    pub index_size: usize,
    pub built_at: Option<DateTime<Utc>>,
    pub age_secs: Option<i64>,
    pub stale: bool,
    pub rebuilding: bool,
    pub builds: u64,
    pub sequence: Option<u64>,
    pub last_report: Option<BuildReport>,
    pub last_error: Option<String>,
}

/// Which earlier build a queued caller may reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adopt {
    /// Any build that finished while this caller waited.
    AnyFinished,
    /// Only a build that started after this caller arrived.
    StartedAfter,
}

struct StoreInner {
    builder: IndexBuilder,
    ttl: chrono::Duration,
    current: RwLock<Option<Arc<IndexGeneration>>>,
    build_lock: Mutex<()>,
    refreshing: AtomicBool,
    building: AtomicBool,
    builds_started: AtomicU64,
    builds_finished: AtomicU64,
    completed_builds: AtomicU64,
    next_sequence: AtomicU64,
    last_outcome: Mutex<Option<Result<BuildReport, StoreError>>>,
    last_report: RwLock<Option<BuildReport>>,
    last_error: RwLock<Option<String>>,
}

/// Shared handle to the index. Cloning is cheap; clones see the same state.
#[derive(Clone)]
pub struct IndexStore {
    inner: Arc<StoreInner>,
}

impl IndexStore {
    pub fn new(builder: IndexBuilder, ttl: chrono::Duration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                builder,
                ttl,
                current: RwLock::new(None),
                build_lock: Mutex::new(()),
                refreshing: AtomicBool::new(false),
                building: AtomicBool::new(false),
                builds_started: AtomicU64::new(0),
                builds_finished: AtomicU64::new(0),
                completed_builds: AtomicU64::new(0),
                next_sequence: AtomicU64::new(0),
                last_outcome: Mutex::new(None),
                last_report: RwLock::new(None),
                last_error: RwLock::new(None),
            }),
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(IndexBuilder::from_config(config), config.ttl())
    }

    /// The generation currently installed, without any freshness check.
    pub fn current(&self) -> Option<Arc<IndexGeneration>> {
        self.inner.current.read().clone()
    }

    /// A generation to query against.
    ///
    /// A stale generation is returned as-is while a background refresh runs.
    /// With no generation at all this blocks on the (single) initial build.
    pub fn get(&self) -> Result<Arc<IndexGeneration>, StoreError> {
        if let Some(generation) = self.current() {
            if generation.is_stale(Utc::now(), self.inner.ttl) {
                self.refresh_in_background();
            }
            return Ok(generation);
        }

        let finished_seen = self.inner.builds_finished.load(Ordering::SeqCst);
        let _guard = self.inner.build_lock.lock();
        if let Some(generation) = self.current() {
            return Ok(generation);
        }
        if self.inner.builds_finished.load(Ordering::SeqCst) != finished_seen
            && let Some(Err(e)) = self.inner.last_outcome.lock().clone()
        {
            return Err(e);
        }
        self.build_locked()?;
        self.current().ok_or_else(|| {
            StoreError::Poisoned("build reported success without a generation".to_string())
        })
    }

    /// Rebuild now. The result always reflects a scan that began after this
    /// call; a build already running when the call arrived is not reused.
    pub fn force_rebuild(&self) -> Result<BuildReport, StoreError> {
        self.single_flight(Adopt::StartedAfter)
    }

    pub fn is_rebuilding(&self) -> bool {
        self.inner.building.load(Ordering::SeqCst) || self.inner.refreshing.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> StoreStatus {
        let now = Utc::now();
        let current = self.current();
        StoreStatus {
            index_size: current.as_ref().map_or(0, |g| g.len()),
            built_at: current.as_ref().map(|g| g.built_at),
            age_secs: current.as_ref().map(|g| (now - g.built_at).num_seconds()),
            stale: current
                .as_ref()
                .is_none_or(|g| g.is_stale(now, self.inner.ttl)),
            rebuilding: self.is_rebuilding(),
            builds: self.inner.completed_builds.load(Ordering::SeqCst),
            sequence: current.as_ref().map(|g| g.sequence),
            last_report: self.inner.last_report.read().clone(),
            last_error: self.inner.last_error.read().clone(),
        }
    }

    /// Spawn one refresh thread unless one is already queued or running.
    fn refresh_in_background(&self) {
        if self.inner.building.load(Ordering::SeqCst) {
            return;
        }
        if self
            .inner
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        debug!("background_refresh_start");
        let store = self.clone();
        let spawned = thread::Builder::new()
            .name("index-refresh".to_string())
            .spawn(move || {
                if let Err(e) = store.single_flight(Adopt::AnyFinished) {
                    warn!(error = %e, "background_refresh_failed");
                }
                store.inner.refreshing.store(false, Ordering::Release);
            });
        if let Err(e) = spawned {
            warn!(error = %e, "background_refresh_spawn_failed");
            self.inner.refreshing.store(false, Ordering::Release);
        }
    }

    fn single_flight(&self, adopt: Adopt) -> Result<BuildReport, StoreError> {
        let started_seen = self.inner.builds_started.load(Ordering::SeqCst);
        let finished_seen = self.inner.builds_finished.load(Ordering::SeqCst);

        let _guard = self.inner.build_lock.lock();

        let reusable = match adopt {
            Adopt::AnyFinished => self.inner.builds_finished.load(Ordering::SeqCst) != finished_seen,
            Adopt::StartedAfter => self.inner.builds_started.load(Ordering::SeqCst) != started_seen,
        };
        if reusable && let Some(outcome) = self.inner.last_outcome.lock().clone() {
            debug!(?adopt, "rebuild_coalesced");
            return outcome;
        }

        self.build_locked()
    }

    /// Caller must hold `build_lock`.
    fn build_locked(&self) -> Result<BuildReport, StoreError> {
        self.inner.builds_started.fetch_add(1, Ordering::SeqCst);
        self.inner.building.store(true, Ordering::SeqCst);
        let outcome = self.run_build();
        self.inner.building.store(false, Ordering::SeqCst);
        *self.inner.last_outcome.lock() = Some(outcome.clone());
        self.inner.builds_finished.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    fn run_build(&self) -> Result<BuildReport, StoreError> {
        info!(sources = self.inner.builder.source_names().len(), "rebuild_start");
        let built = catch_unwind(AssertUnwindSafe(|| self.inner.builder.build()))
            .map_err(|panic| StoreError::Poisoned(panic_message(panic.as_ref())))
            .and_then(|result| result.map_err(StoreError::from));

        match built {
            Ok(output) => {
                let sequence = self.inner.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
                let generation = Arc::new(IndexGeneration::new(
                    output.records,
                    output.report.built_at,
                    sequence,
                ));
                self.install(generation);
                self.inner.completed_builds.fetch_add(1, Ordering::SeqCst);
                *self.inner.last_report.write() = Some(output.report.clone());
                *self.inner.last_error.write() = None;
                info!(
                    sequence,
                    records = output.report.count,
                    skipped = output.report.skipped_units,
                    "rebuild_complete"
                );
                Ok(output.report)
            }
            Err(e) => {
                warn!(error = %e, "rebuild_failed");
                *self.inner.last_error.write() = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn install(&self, generation: Arc<IndexGeneration>) {
        let mut current = self.inner.current.write();
        if let Some(existing) = current.as_ref()
            && existing.sequence >= generation.sequence
        {
            debug!(
                current = existing.sequence,
                candidate = generation.sequence,
                "generation_discarded"
            );
            return;
        }
        *current = Some(generation);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "build panicked".to_string()
    }
}
