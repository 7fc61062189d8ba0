//! In-memory journals.
//!
//! A [`MemoryReaderFactory`] maps paths to [`MemoryJournal`]s and implements
//! the reader capability over them. It is what the test suites query against,
//! and it is handy for callers who want to run the engine on synthetic data.

use crate::collections::{HashMap, HashSet};
use crate::reader::{JournalReader, ReaderError, ReaderFactory, Result, SeqnumInfo};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEntry {
    pub realtime: u64,
    pub seqnum: Option<SeqnumInfo>,
    pub fields: Vec<(String, Vec<u8>)>,
}

impl MemoryEntry {
    pub fn new(realtime: u64) -> Self {
        Self {
            realtime,
            seqnum: None,
            fields: Vec::new(),
        }
    }

    pub fn with_seqnum(mut self, seqnum: u64, writer: Uuid) -> Self {
        self.seqnum = Some(SeqnumInfo { seqnum, writer });
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl AsRef<[u8]>) -> Self {
        self.fields.push((name.into(), value.as_ref().to_vec()));
        self
    }

    fn value(&self, field: &str) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_slice())
    }
}

/// Entries of one journal, kept sorted by storage timestamp.
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    entries: Vec<MemoryEntry>,
}

impl MemoryJournal {
    pub fn new(mut entries: Vec<MemoryEntry>) -> Self {
        entries.sort_by_key(|e| e.realtime);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }
}

#[derive(Debug, Default)]
struct Journals {
    by_path: HashMap<PathBuf, Arc<MemoryJournal>>,
    unreadable: HashSet<PathBuf>,
}

/// Reader factory over in-memory journals. Cloning shares the journals.
#[derive(Debug, Clone, Default)]
pub struct MemoryReaderFactory {
    journals: Arc<RwLock<Journals>>,
}

impl MemoryReaderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, journal: MemoryJournal) {
        self.journals
            .write()
            .by_path
            .insert(path.into(), Arc::new(journal));
    }

    pub fn remove(&self, path: &Path) {
        self.journals.write().by_path.remove(path);
    }

    /// Make every subsequent `open` of `path` fail as corrupted.
    pub fn set_unreadable(&self, path: impl Into<PathBuf>) {
        self.journals.write().unreadable.insert(path.into());
    }
}

impl ReaderFactory for MemoryReaderFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn JournalReader>> {
        let journals = self.journals.read();

        if journals.unreadable.contains(path) {
            return Err(ReaderError::Corrupted {
                path: path.to_path_buf(),
                reason: String::from("marked unreadable"),
            });
        }

        let journal = journals
            .by_path
            .get(path)
            .cloned()
            .ok_or_else(|| ReaderError::NotFound {
                path: path.to_path_buf(),
            })?;

        Ok(Box::new(MemoryReader::new(journal)))
    }
}

#[derive(Debug, Clone, Copy)]
enum Seek {
    None,
    Head,
    Tail,
    Realtime(u64),
}

/// Alternatives of conjunctions: each conjunction maps a field to the
/// values it may take.
#[derive(Debug, Default)]
struct Matches {
    alternatives: Vec<HashMap<String, Vec<Vec<u8>>>>,
    current: HashMap<String, Vec<Vec<u8>>>,
}

impl Matches {
    fn is_empty(&self) -> bool {
        self.alternatives.is_empty() && self.current.is_empty()
    }

    fn accepts(&self, entry: &MemoryEntry) -> bool {
        if self.is_empty() {
            return true;
        }

        let conjunction_holds = |conjunction: &HashMap<String, Vec<Vec<u8>>>| {
            !conjunction.is_empty()
                && conjunction.iter().all(|(field, values)| {
                    entry
                        .value(field)
                        .is_some_and(|v| values.iter().any(|wanted| wanted == v))
                })
        };

        self.alternatives.iter().any(conjunction_holds) || conjunction_holds(&self.current)
    }
}

pub struct MemoryReader {
    journal: Arc<MemoryJournal>,
    cursor: Option<usize>,
    seek: Seek,
    data_threshold: usize,
    matches: Matches,
}

impl MemoryReader {
    fn new(journal: Arc<MemoryJournal>) -> Self {
        Self {
            journal,
            cursor: None,
            seek: Seek::Head,
            data_threshold: usize::MAX,
            matches: Matches::default(),
        }
    }

    fn current(&self) -> Option<&MemoryEntry> {
        self.cursor.and_then(|idx| self.journal.entries.get(idx))
    }
}

impl JournalReader for MemoryReader {
    fn seek_head(&mut self) -> Result<()> {
        self.seek = Seek::Head;
        self.cursor = None;
        Ok(())
    }

    fn seek_tail(&mut self) -> Result<()> {
        self.seek = Seek::Tail;
        self.cursor = None;
        Ok(())
    }

    fn seek_realtime(&mut self, usec: u64) -> Result<()> {
        self.seek = Seek::Realtime(usec);
        self.cursor = None;
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        let entries = &self.journal.entries;

        let mut idx = match std::mem::replace(&mut self.seek, Seek::None) {
            Seek::Head => 0,
            Seek::Tail => entries.len(),
            Seek::Realtime(t) => entries.partition_point(|e| e.realtime < t),
            Seek::None => self.cursor.map_or(0, |c| c + 1),
        };

        while idx < entries.len() {
            if self.matches.accepts(&entries[idx]) {
                self.cursor = Some(idx);
                return Ok(true);
            }
            idx += 1;
        }

        self.cursor = None;
        self.seek = Seek::Tail;
        Ok(false)
    }

    fn previous(&mut self) -> Result<bool> {
        let entries = &self.journal.entries;

        let mut end = match std::mem::replace(&mut self.seek, Seek::None) {
            Seek::Head => 0,
            Seek::Tail => entries.len(),
            Seek::Realtime(t) => entries.partition_point(|e| e.realtime <= t),
            Seek::None => self.cursor.unwrap_or(0),
        };

        while end > 0 {
            let idx = end - 1;
            if self.matches.accepts(&entries[idx]) {
                self.cursor = Some(idx);
                return Ok(true);
            }
            end = idx;
        }

        self.cursor = None;
        self.seek = Seek::Head;
        Ok(false)
    }

    fn realtime_usec(&self) -> Option<u64> {
        self.current().map(|e| e.realtime)
    }

    fn seqnum(&self) -> Option<SeqnumInfo> {
        self.current().and_then(|e| e.seqnum)
    }

    fn set_data_threshold(&mut self, max_value_len: usize) {
        self.data_threshold = max_value_len;
    }

    fn enumerate_fields(&mut self, visit: &mut dyn FnMut(&str, &[u8])) -> Result<()> {
        let threshold = self.data_threshold;

        if let Some(entry) = self.current() {
            for (name, value) in &entry.fields {
                let len = value.len().min(threshold);
                visit(name, &value[..len]);
            }
        }

        Ok(())
    }

    fn add_match(&mut self, field: &str, value: &[u8]) -> Result<()> {
        self.matches
            .current
            .entry(field.to_string())
            .or_default()
            .push(value.to_vec());
        Ok(())
    }

    fn add_conjunction(&mut self) -> Result<()> {
        Ok(())
    }

    fn add_disjunction(&mut self) -> Result<()> {
        if !self.matches.current.is_empty() {
            let current = std::mem::take(&mut self.matches.current);
            self.matches.alternatives.push(current);
        }
        Ok(())
    }

    fn clear_matches(&mut self) {
        self.matches = Matches::default();
    }

    fn unique_values(&mut self, field: &str) -> Result<Vec<Vec<u8>>> {
        let mut seen = HashSet::default();
        let mut values = Vec::new();

        for entry in &self.journal.entries {
            if let Some(value) = entry.value(field) {
                if seen.insert(value) {
                    values.push(value.to_vec());
                }
            }
        }

        Ok(values)
    }
}
