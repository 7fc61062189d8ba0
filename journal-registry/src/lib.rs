//! Journal file registry and directory watcher
//!
//! This crate discovers journal files under a set of root directories and
//! keeps an always-current inventory of them, including the time and
//! sequence-number range of each file.
//!
//! ## Key Components
//!
//! - **FileRegistry**: concurrent map of journal file records with monotonic
//!   merging, garbage collection by scan stamp and full reconciliation scans
//! - **DirectoryScanner**: depth-bounded walk that follows directory symlinks
//! - **DirectoryWatcher**: notification-driven updates with pending-change
//!   batching and restart-on-anomaly sessions
//!
//! ## Usage
//!
//! ```no_run
//! use journal_common::memory::MemoryReaderFactory;
//! use journal_registry::{DirectoryWatcher, FileRegistry, RegistryConfig};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let config = RegistryConfig::default();
//! let registry = FileRegistry::new(Arc::new(MemoryReaderFactory::new()), &config);
//!
//! let (handle, _task) = DirectoryWatcher::spawn(registry.clone(), config.clone());
//! let _rescan = registry.spawn_periodic_rescan(config.rescan_interval);
//!
//! for source in registry.sources() {
//!     println!("{}: {}", source.name, source.info);
//! }
//!
//! handle.shutdown().ok();
//! # }
//! ```

pub mod config;
pub mod error;
pub mod file;
mod header;
pub mod registry;
pub mod scanner;
pub mod sources;
pub mod watcher;

pub use config::RegistryConfig;
pub use error::{ConfigError, RegistryError, Result};
pub use file::{
    DiscoveredMeta, JOURNAL_VS_REALTIME_DELTA_DEFAULT_UT, JOURNAL_VS_REALTIME_DELTA_MAX_UT,
    JournalFile, SourceType,
};
pub use header::Header;
pub use registry::{FileRegistry, MergeFn, merge_discovered};
pub use scanner::{DirectoryScanner, ScanItem};
pub use sources::{SourceSummary, group_source_type};
pub use watcher::{DirectoryWatcher, WatcherHandle, WatcherState, WatcherStatus};
