//! Concurrent inventory of journal files.

use crate::config::RegistryConfig;
use crate::file::{DiscoveredMeta, JOURNAL_VS_REALTIME_DELTA_MAX_UT, JournalFile, name_timestamp};
use crate::scanner::DirectoryScanner;
use journal_common::time::now_monotonic_usec;
use journal_common::{HashMap, ReaderFactory};
use parking_lot::{Mutex, RwLock};
use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Folds a freshly discovered record into the one already registered.
pub type MergeFn = fn(existing: &mut JournalFile, incoming: &JournalFile);

/// Default merge: only moves fields forward.
///
/// The scan stamp takes the larger value. When the file's mtime advanced, its
/// size follows and `msg_last_ut` is raised to the new mtime until the header
/// is read again.
pub fn merge_discovered(existing: &mut JournalFile, incoming: &JournalFile) {
    if incoming.last_scan_monotonic_ut > existing.last_scan_monotonic_ut {
        existing.last_scan_monotonic_ut = incoming.last_scan_monotonic_ut;
    }

    if incoming.file_last_modified_ut > existing.file_last_modified_ut {
        existing.file_last_modified_ut = incoming.file_last_modified_ut;
        existing.size = incoming.size;
        existing.msg_last_ut = existing.msg_last_ut.max(incoming.file_last_modified_ut);
    }
}

pub(crate) struct RegistryInner {
    pub(crate) files: RwLock<HashMap<String, JournalFile>>,
    pub(crate) factory: Arc<dyn ReaderFactory>,
    roots: RwLock<Vec<PathBuf>>,
    scan_guard: Mutex<()>,
    scans_completed: AtomicU64,
    merge: MergeFn,
    max_depth: usize,
}

/// Map of canonical path to [`JournalFile`], shared between the watcher, the
/// periodic scan and query workers. Cloning is cheap and shares the state.
#[derive(Clone)]
pub struct FileRegistry {
    pub(crate) inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for FileRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRegistry")
            .field("files", &self.len())
            .field("roots", &*self.inner.roots.read())
            .finish()
    }
}

impl FileRegistry {
    pub fn new(factory: Arc<dyn ReaderFactory>, config: &RegistryConfig) -> Self {
        Self::with_merge(factory, config, merge_discovered)
    }

    pub fn with_merge(
        factory: Arc<dyn ReaderFactory>,
        config: &RegistryConfig,
        merge: MergeFn,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                files: RwLock::new(HashMap::default()),
                factory,
                roots: RwLock::new(config.roots.clone()),
                scan_guard: Mutex::new(()),
                scans_completed: AtomicU64::new(0),
                merge,
                max_depth: config.max_depth,
            }),
        }
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.inner.roots.read().clone()
    }

    pub fn set_roots(&self, roots: Vec<PathBuf>) {
        *self.inner.roots.write() = roots;
    }

    pub fn len(&self) -> usize {
        self.inner.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.files.read().is_empty()
    }

    /// Number of full reconciliation scans completed so far.
    pub fn scans_completed(&self) -> u64 {
        self.inner.scans_completed.load(Ordering::Acquire)
    }

    /// The factory used to open journal files.
    pub fn reader_factory(&self) -> Arc<dyn ReaderFactory> {
        Arc::clone(&self.inner.factory)
    }

    /// Insert a new record, or merge `meta` into the existing one.
    pub fn upsert(&self, path: &str, meta: DiscoveredMeta) -> JournalFile {
        let incoming = JournalFile::discovered(path, meta);
        let mut files = self.inner.files.write();

        match files.get_mut(path) {
            Some(existing) => {
                (self.inner.merge)(existing, &incoming);
                existing.clone()
            }
            None => {
                debug!(path, source = %incoming.source, "new journal file");
                files.insert(String::from(path), incoming.clone());
                incoming
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<JournalFile> {
        self.inner.files.read().get(path).cloned()
    }

    pub fn delete(&self, path: &str) -> Option<JournalFile> {
        let removed = self.inner.files.write().remove(path);
        if removed.is_some() {
            debug!(path, "journal file removed");
        }
        removed
    }

    /// Remove every record whose path lies under `dir`.
    pub fn delete_prefix(&self, dir: &Path) -> usize {
        let mut files = self.inner.files.write();
        let before = files.len();
        files.retain(|path, _| !Path::new(path).starts_with(dir));
        let removed = before - files.len();

        if removed > 0 {
            info!(dir = %dir.display(), removed, "removed journal files of deleted directory");
        }
        removed
    }

    /// A copy of every record, for readers that must not hold the lock.
    pub fn snapshot(&self) -> Vec<JournalFile> {
        self.inner.files.read().values().cloned().collect()
    }

    /// Remove records not touched since `cycle_stamp`.
    pub fn garbage_collect(&self, cycle_stamp: u64) -> usize {
        let mut files = self.inner.files.write();
        let before = files.len();
        files.retain(|_, file| file.last_scan_monotonic_ut >= cycle_stamp);
        before - files.len()
    }

    /// Raise the skew recorded for `path`, capped at the maximum tracked.
    pub fn record_realtime_delta(&self, path: &str, delta_ut: u64) {
        let delta_ut = delta_ut.min(JOURNAL_VS_REALTIME_DELTA_MAX_UT);
        let mut files = self.inner.files.write();

        if let Some(file) = files.get_mut(path) {
            if delta_ut > file.max_journal_vs_realtime_delta_ut {
                file.max_journal_vs_realtime_delta_ut = delta_ut;
            }
        }
    }

    /// Rebuild the registry from the filesystem.
    ///
    /// Returns `false` without doing anything when another scan is running.
    pub fn update(&self) -> bool {
        let Some(_guard) = self.inner.scan_guard.try_lock() else {
            debug!("journal files scan already running");
            return false;
        };

        let scan_ut = now_monotonic_usec();
        let roots = self.roots();
        let scanner = DirectoryScanner::new(self.inner.max_depth);

        let mut paths: Vec<String> = scanner
            .scan_files(&roots)
            .into_iter()
            .filter_map(|path| match path.into_os_string().into_string() {
                Ok(path) => Some(path),
                Err(path) => {
                    warn!(path = ?path, "ignoring journal file with non UTF-8 path");
                    None
                }
            })
            .collect();

        paths.sort_by_key(|path| Reverse(name_timestamp(path)));

        for path in &paths {
            match fs::metadata(path) {
                Ok(metadata) if metadata.is_file() => {
                    self.upsert(path, DiscoveredMeta::from_metadata(&metadata, scan_ut));
                    self.update_header(path);
                }
                Ok(_) => {}
                Err(e) => debug!(path, error = %e, "cannot stat journal file"),
            }
        }

        let removed = self.garbage_collect(scan_ut);
        let scans = self.inner.scans_completed.fetch_add(1, Ordering::AcqRel) + 1;

        info!(
            files = paths.len(),
            removed,
            scans,
            "journal files scan completed"
        );

        true
    }

    /// Run [`update`](Self::update) every `interval` on the blocking pool.
    pub fn spawn_periodic_rescan(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let registry = registry.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || registry.update()).await {
                    warn!(error = %e, "journal files scan task failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journal_common::memory::MemoryReaderFactory;
    use proptest::prelude::*;

    fn registry() -> FileRegistry {
        let config = RegistryConfig::default().with_roots(Vec::<PathBuf>::new());
        FileRegistry::new(Arc::new(MemoryReaderFactory::new()), &config)
    }

    fn meta(size: u64, modified_ut: u64, scan_monotonic_ut: u64) -> DiscoveredMeta {
        DiscoveredMeta {
            size,
            modified_ut,
            scan_monotonic_ut,
        }
    }

    #[test]
    fn upsert_classifies_once_and_merges() {
        let registry = registry();
        let path = "/var/log/journal/m/system.journal";

        let first = registry.upsert(path, meta(10, 100, 1));
        assert_eq!(first.msg_last_ut, 100);
        assert_eq!(first.msg_first_ut, 0);

        let merged = registry.upsert(path, meta(20, 200, 2));
        assert_eq!(merged.size, 20);
        assert_eq!(merged.file_last_modified_ut, 200);
        assert_eq!(merged.msg_last_ut, 200);
        assert_eq!(merged.last_scan_monotonic_ut, 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn out_of_order_upserts_never_regress() {
        let registry = registry();
        let path = "/var/log/journal/m/system.journal";

        registry.upsert(path, meta(20, 200, 5));
        let merged = registry.upsert(path, meta(10, 100, 3));

        assert_eq!(merged.size, 20);
        assert_eq!(merged.file_last_modified_ut, 200);
        assert_eq!(merged.msg_last_ut, 200);
        assert_eq!(merged.last_scan_monotonic_ut, 5);
    }

    #[test]
    fn garbage_collect_removes_only_stale_records() {
        let registry = registry();
        registry.upsert("/j/m/a.journal", meta(1, 1, 10));
        registry.upsert("/j/m/b.journal", meta(1, 1, 20));
        registry.upsert("/j/m/c.journal", meta(1, 1, 30));

        assert_eq!(registry.garbage_collect(20), 1);
        assert!(registry.get("/j/m/a.journal").is_none());
        assert!(registry.get("/j/m/b.journal").is_some());
        assert!(registry.get("/j/m/c.journal").is_some());
    }

    #[test]
    fn delete_prefix_is_component_aware() {
        let registry = registry();
        registry.upsert("/j/a/system.journal", meta(1, 1, 1));
        registry.upsert("/j/a/sub/user-1000.journal", meta(1, 1, 1));
        registry.upsert("/j/ab/system.journal", meta(1, 1, 1));

        assert_eq!(registry.delete_prefix(Path::new("/j/a")), 2);
        assert!(registry.get("/j/ab/system.journal").is_some());
    }

    #[test]
    fn pluggable_merge_is_used() {
        fn keep_first(_: &mut JournalFile, _: &JournalFile) {}

        let config = RegistryConfig::default();
        let registry =
            FileRegistry::with_merge(Arc::new(MemoryReaderFactory::new()), &config, keep_first);
        registry.upsert("/j/m/a.journal", meta(1, 1, 1));
        let merged = registry.upsert("/j/m/a.journal", meta(2, 2, 2));
        assert_eq!(merged.size, 1);
    }

    #[test]
    fn realtime_delta_grows_and_is_capped() {
        let registry = registry();
        let path = "/j/m/a.journal";
        registry.upsert(path, meta(1, 1, 1));

        registry.record_realtime_delta(path, 1);
        assert_eq!(
            registry.get(path).unwrap().max_journal_vs_realtime_delta_ut,
            crate::file::JOURNAL_VS_REALTIME_DELTA_DEFAULT_UT
        );

        registry.record_realtime_delta(path, u64::MAX);
        assert_eq!(
            registry.get(path).unwrap().max_journal_vs_realtime_delta_ut,
            JOURNAL_VS_REALTIME_DELTA_MAX_UT
        );
    }

    #[test]
    fn concurrent_scan_is_skipped() {
        let registry = registry();
        let _guard = registry.inner.scan_guard.lock();
        assert!(!registry.update());
        assert_eq!(registry.scans_completed(), 0);
    }

    proptest! {
        #[test]
        fn msg_last_ut_is_monotonic(updates in proptest::collection::vec((0u64..1000, 0u64..1000, 0u64..1000), 1..50)) {
            let registry = registry();
            let path = "/j/m/system.journal";
            let mut previous = 0;

            for (size, modified, stamp) in updates {
                let record = registry.upsert(path, meta(size, modified, stamp));
                prop_assert!(record.msg_last_ut >= previous);
                previous = record.msg_last_ut;
            }
        }
    }
}
