//! Insertion-ordered library index and the batch ingestion pipeline.
//!
//! The [`Manager`] owns all mutable state behind one mutex. Batches are
//! read outside the lock by a small worker pool and committed in a
//! single critical section, so concurrent readers see either none or
//! all of a batch, never a partial one.

mod storage;

pub use storage::{JsonPathStore, PathStore};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use common::{TrackOverlay, TrackRecord};
use metadata::{MetadataError, SidecarStore};

/// Worker threads per logical CPU for batch reads. Tag reads are I/O
/// bound, so running more workers than cores pays off.
const WORKERS_PER_CPU: usize = 4;

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Metadata(MetadataError),
    NoConfigDir,
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Json(err) => write!(f, "json error: {}", err),
            LibraryError::Metadata(err) => write!(f, "{}", err),
            LibraryError::NoConfigDir => write!(f, "no user config directory available"),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<serde_json::Error> for LibraryError {
    fn from(err: serde_json::Error) -> Self {
        LibraryError::Json(err)
    }
}

impl From<MetadataError> for LibraryError {
    fn from(err: MetadataError) -> Self {
        LibraryError::Metadata(err)
    }
}

/// Where track records come from and where edits go. The production
/// implementation reads files and sidecars; tests substitute their own
/// to inject delays and failures.
pub trait TrackSource: Send + Sync {
    fn read(&self, path: &str) -> Result<TrackRecord, LibraryError>;
    fn save(&self, record: &TrackRecord) -> Result<(), LibraryError>;
    fn clear_cache(&self) -> Result<(), LibraryError>;
}

/// Production [`TrackSource`]: tags from the audio file, reconciled
/// with the sidecar cache.
pub struct FileTrackSource {
    sidecars: SidecarStore,
}

impl FileTrackSource {
    pub fn new(sidecars: SidecarStore) -> Self {
        FileTrackSource { sidecars }
    }
}

impl TrackSource for FileTrackSource {
    fn read(&self, path: &str) -> Result<TrackRecord, LibraryError> {
        Ok(metadata::read_track(path, &self.sidecars)?)
    }

    fn save(&self, record: &TrackRecord) -> Result<(), LibraryError> {
        Ok(metadata::save_track(record, &self.sidecars)?)
    }

    fn clear_cache(&self) -> Result<(), LibraryError> {
        Ok(self.sidecars.clear_all()?)
    }
}

/// Outcome of one batch. `tracks` is the full insertion-ordered
/// snapshot as of the batch's commit (or of the fast-path check when
/// nothing was new). `errors` holds one `"<path>: <cause>"` entry per
/// failed file plus, if the path list could not be persisted, one
/// entry for that; failures never abort the rest of the batch.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub tracks: Vec<TrackRecord>,
    pub added: Vec<TrackRecord>,
    pub skipped: usize,
    pub errors: Vec<String>,
}

#[derive(Default)]
struct Index {
    by_key: HashMap<String, TrackRecord>,
    order: Vec<String>,
}

impl Index {
    fn insert(&mut self, key: String, record: TrackRecord) {
        self.order.push(key.clone());
        self.by_key.insert(key, record);
    }

    fn paths(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|key| self.by_key.get(key).map(|r| r.file_path.clone()))
            .collect()
    }

    fn records(&self) -> Vec<TrackRecord> {
        self.order
            .iter()
            .filter_map(|key| self.by_key.get(key).cloned())
            .collect()
    }
}

/// The library index. Explicitly constructed with its two collaborators
/// so callers (and tests) control where state lives.
pub struct Manager {
    index: Mutex<Index>,
    store: Box<dyn PathStore>,
    source: Box<dyn TrackSource>,
}

impl Manager {
    pub fn new(store: Box<dyn PathStore>, source: Box<dyn TrackSource>) -> Self {
        Manager {
            index: Mutex::new(Index::default()),
            store,
            source,
        }
    }

    /// Rebuild the index from the persisted path list. Paths that fail
    /// to load come back as batch errors, not a hard failure, so one
    /// missing file never blocks startup.
    pub fn load_stored(&self) -> Result<BatchResult, LibraryError> {
        let paths = self.store.load()?;
        info!("loading {} stored tracks", paths.len());
        Ok(self.ingest(&paths, false))
    }

    /// Ingest a batch of files and persist the updated path list.
    pub fn add_files(&self, paths: &[String]) -> BatchResult {
        self.ingest(paths, true)
    }

    fn ingest(&self, paths: &[String], persist: bool) -> BatchResult {
        let mut result = BatchResult::default();

        let mut jobs = Vec::new();
        {
            let index = self.index.lock();
            let mut seen: HashSet<String> = HashSet::new();
            for path in paths {
                let key = common::canonical_key(path);
                if index.by_key.contains_key(&key) || !seen.insert(key) {
                    result.skipped += 1;
                    continue;
                }
                jobs.push(path.clone());
            }
            if jobs.is_empty() {
                result.tracks = index.records();
                return result;
            }
        }

        let outcomes = self.read_batch(&jobs);

        // The snapshot and path list are captured inside the critical
        // section; the actual disk write happens after unlock so it
        // never blocks snapshot callers.
        let to_save = {
            let mut index = self.index.lock();
            for (path, outcome) in jobs.iter().zip(outcomes) {
                match outcome {
                    Some(Ok(record)) => {
                        let key = common::canonical_key(path);
                        // A concurrent batch may have landed this path
                        // while we were reading.
                        if index.by_key.contains_key(&key) {
                            result.skipped += 1;
                        } else {
                            index.insert(key, record.clone());
                            result.added.push(record);
                        }
                    }
                    Some(Err(cause)) => result.errors.push(format!("{}: {}", path, cause)),
                    None => result.errors.push(format!("{}: no result from reader", path)),
                }
            }
            result.tracks = index.records();
            if persist && !result.added.is_empty() {
                Some(index.paths())
            } else {
                None
            }
        };

        if let Some(paths) = to_save {
            if let Err(err) = self.store.save(&paths) {
                warn!("library list save failed: {}", err);
                result.errors.push(format!("library save: {}", err));
            }
        }

        info!(
            "batch done: {} added, {} skipped, {} errors",
            result.added.len(),
            result.skipped,
            result.errors.len()
        );
        result
    }

    /// Fan the reads out over a bounded worker pool and hand back one
    /// slot per job, in job order.
    fn read_batch(&self, jobs: &[String]) -> Vec<Option<Result<TrackRecord, String>>> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .saturating_mul(WORKERS_PER_CPU)
            .min(jobs.len())
            .max(1);
        debug!("reading {} files with {} workers", jobs.len(), workers);

        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel();
        let source = &self.source;

        let mut slots: Vec<Option<Result<TrackRecord, String>>> = Vec::new();
        slots.resize_with(jobs.len(), || None);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                scope.spawn(move || loop {
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    if idx >= jobs.len() {
                        break;
                    }
                    let outcome = source.read(&jobs[idx]).map_err(|err| err.to_string());
                    if tx.send((idx, outcome)).is_err() {
                        break;
                    }
                });
            }
            drop(tx);
            for (idx, outcome) in rx {
                slots[idx] = Some(outcome);
            }
        });

        slots
    }

    /// Patch one track's record in memory. Unknown paths are inserted
    /// as new records built from the overlay. Nothing is written to
    /// disk here; hints arrive in bursts and persistence belongs to
    /// [`Manager::update_and_persist`] and explicit saves.
    pub fn apply_overlay(&self, path: &str, overlay: TrackOverlay) -> TrackRecord {
        let key = common::canonical_key(path);
        let mut index = self.index.lock();
        match index.by_key.get_mut(&key) {
            Some(existing) => {
                common::apply_overlay(existing, &overlay);
                existing.clone()
            }
            None => {
                let record = overlay.into_record(path);
                index.insert(key, record.clone());
                record
            }
        }
    }

    /// Save a full edited record, then re-read the canonical result
    /// (file tags reconciled with the fresh sidecar) and install that.
    /// The caller gets back what the index now holds, which may differ
    /// from the submitted record where the merge policy kept tag data.
    pub fn update_and_persist(&self, record: TrackRecord) -> Result<TrackRecord, LibraryError> {
        self.source.save(&record)?;
        let canonical = self.source.read(&record.file_path)?;

        let key = common::canonical_key(&record.file_path);
        let inserted = {
            let mut index = self.index.lock();
            if index.by_key.contains_key(&key) {
                index.by_key.insert(key, canonical.clone());
                false
            } else {
                index.insert(key, canonical.clone());
                true
            }
        };

        if inserted {
            self.persist()?;
        }
        Ok(canonical)
    }

    /// All tracks in insertion order.
    pub fn snapshot(&self) -> Vec<TrackRecord> {
        self.index.lock().records()
    }

    pub fn len(&self) -> usize {
        self.index.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the index, the persisted path list, and the source's cache.
    pub fn reset(&self) -> Result<(), LibraryError> {
        {
            let mut index = self.index.lock();
            index.by_key.clear();
            index.order.clear();
        }
        self.store.clear()?;
        self.source.clear_cache()?;
        info!("library reset");
        Ok(())
    }

    fn persist(&self) -> Result<(), LibraryError> {
        let paths = self.index.lock().paths();
        self.store.save(&paths)
    }
}
