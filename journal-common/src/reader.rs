//! Capability surface of a journal file reader.
//!
//! The registry and the query engine never parse journal files themselves.
//! They go through a [`ReaderFactory`] that opens one physical file and hands
//! back a [`JournalReader`] cursor over its entries. Dropping the reader closes
//! the file.

use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Errors reported by a journal reader.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not exist (or is not known to the reader)
    #[error("Journal file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    /// The file exists but its contents cannot be interpreted
    #[error("Corrupted journal file {}: {reason}", .path.display())]
    Corrupted { path: PathBuf, reason: String },
}

/// A specialized Result type for reader operations
pub type Result<T> = std::result::Result<T, ReaderError>;

/// Sequence number of an entry together with the identity of the writer
/// instance that assigned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SeqnumInfo {
    pub seqnum: u64,
    pub writer: Uuid,
}

/// Cursor over the entries of one opened journal file.
///
/// Seeking positions the cursor *between* entries: after `seek_head` the next
/// call to [`next`](Self::next) yields the first entry, after `seek_tail` the
/// next call to [`previous`](Self::previous) yields the last one. After
/// `seek_realtime(t)`, `next` yields the first entry at or after `t` and
/// `previous` the last entry at or before `t`.
pub trait JournalReader: Send {
    fn seek_head(&mut self) -> Result<()>;

    fn seek_tail(&mut self) -> Result<()>;

    fn seek_realtime(&mut self, usec: u64) -> Result<()>;

    /// Step forward. Returns `false` when there are no more entries.
    fn next(&mut self) -> Result<bool>;

    /// Step backward. Returns `false` when there are no more entries.
    fn previous(&mut self) -> Result<bool>;

    /// Storage timestamp of the current entry.
    fn realtime_usec(&self) -> Option<u64>;

    /// Sequence information of the current entry, if the format exposes it.
    fn seqnum(&self) -> Option<SeqnumInfo>;

    /// Limit the length of values handed out by [`enumerate_fields`](Self::enumerate_fields).
    fn set_data_threshold(&mut self, max_value_len: usize);

    /// Visit every `(field, value)` pair of the current entry.
    fn enumerate_fields(&mut self, visit: &mut dyn FnMut(&str, &[u8])) -> Result<()>;

    /// Add a `field=value` match. Matches on the same field are alternatives,
    /// matches on different fields must all hold.
    fn add_match(&mut self, field: &str, value: &[u8]) -> Result<()>;

    fn add_conjunction(&mut self) -> Result<()>;

    fn add_disjunction(&mut self) -> Result<()>;

    fn clear_matches(&mut self);

    /// Every distinct value of `field` present in the file.
    fn unique_values(&mut self, field: &str) -> Result<Vec<Vec<u8>>>;
}

/// Opens journal files.
pub trait ReaderFactory: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn JournalReader>>;
}
