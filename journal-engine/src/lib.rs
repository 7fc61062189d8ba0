//! Query engine over registered journal files
//!
//! A query visits the files of a [`journal_registry::FileRegistry`] that may
//! hold entries in its time window, newest (or oldest) first, and produces
//! the entries nearest to a pagination anchor together with facet counts and
//! a time histogram of everything that matched.
//!
//! ## Key Components
//!
//! - **QueryRequest / QueryPlan**: request validation, time window and
//!   anchor normalization, per-file scan boundaries
//! - **SamplingController**: bounds the work of the facet and histogram pass
//!   on large time ranges while keeping returned rows exact
//! - **QueryEngine**: file selection and ordering, per-file scans, deadline
//!   and cancellation handling, result assembly
//!
//! ## Usage
//!
//! ```no_run
//! use journal_common::memory::MemoryReaderFactory;
//! use journal_engine::{Deadline, QueryEngine, QueryRequest};
//! use journal_registry::{FileRegistry, RegistryConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> journal_engine::Result<()> {
//! let config = RegistryConfig::default();
//! let registry = FileRegistry::new(Arc::new(MemoryReaderFactory::new()), &config);
//! let engine = QueryEngine::new(registry);
//!
//! let request = QueryRequest::new()
//!     .with_window(-600, 0)
//!     .with_filter("PRIORITY", ["3"])
//!     .with_entries(50);
//!
//! let result = engine.spawn(request, Deadline::new(Duration::from_secs(10))).await?;
//! for row in &result.rows {
//!     println!("{} {:?}", row.timestamp_ut, row.get("MESSAGE"));
//! }
//! # Ok(())
//! # }
//! ```

mod accumulator;
pub mod engine;
pub mod error;
pub mod facets;
pub mod histogram;
pub mod request;
pub mod result;
pub mod rows;
mod sampling;
mod scan;
pub mod timeout;

pub use engine::QueryEngine;
pub use error::{EngineError, Result};
pub use facets::{DEFAULT_FACETS, FacetCounts, FacetValueCount, JOURNAL_FILE_FIELD};
pub use histogram::{ESTIMATED_LABEL, HistogramBar, HistogramResult, UNSAMPLED_LABEL};
pub use request::{Direction, QueryPlan, QueryRequest};
pub use result::{FileStats, ItemCounters, QueryResult, QueryStatus};
pub use rows::Row;
pub use sampling::SamplingStats;
pub use timeout::Deadline;
