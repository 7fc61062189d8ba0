//! Journal file records and path classification.

use bitflags::bitflags;
use journal_common::time::USEC_PER_SEC;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use uuid::Uuid;

/// Assumed skew between source and storage timestamps for a new file.
pub const JOURNAL_VS_REALTIME_DELTA_DEFAULT_UT: u64 = 5 * USEC_PER_SEC;

/// Upper bound for the skew tracked per file.
pub const JOURNAL_VS_REALTIME_DELTA_MAX_UT: u64 = 2 * 60 * USEC_PER_SEC;

const MAX_SOURCE_LEN: usize = 64;

bitflags! {
    /// Source categories a journal file belongs to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SourceType: u32 {
        const LOCAL_ALL = 1 << 0;
        const LOCAL_SYSTEM = 1 << 1;
        const LOCAL_USER = 1 << 2;
        const LOCAL_NAMESPACE = 1 << 3;
        const LOCAL_OTHER = 1 << 4;
        const REMOTE_ALL = 1 << 5;

        const ALL = Self::LOCAL_ALL.bits()
            | Self::LOCAL_SYSTEM.bits()
            | Self::LOCAL_USER.bits()
            | Self::LOCAL_NAMESPACE.bits()
            | Self::LOCAL_OTHER.bits()
            | Self::REMOTE_ALL.bits();
    }
}

/// Check if a path looks like a journal file
pub fn is_journal_file(path: &str) -> bool {
    path.ends_with(".journal") || path.ends_with(".journal~")
}

/// Information encoded in the name of a rotated journal file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchivedName {
    pub writer: Option<Uuid>,
    pub head_seqnum: Option<u64>,
    pub head_realtime: u64,
}

impl ArchivedName {
    /// Parse `…@<writer>-<seqnum>-<realtime>.journal` or the disposed form
    /// `…@<realtime>-<random>.journal~`. Active files (no `@`) yield `None`.
    pub fn parse(path: &str) -> Option<Self> {
        if let Some(stem) = path.strip_suffix(".journal") {
            let (_, suffix) = stem.rsplit_once('@')?;
            let mut parts = suffix.split('-');

            let writer = parts.next()?;
            let head_seqnum = parts.next()?;
            let head_realtime = parts.next()?;

            if parts.next().is_some() {
                return None;
            }

            Some(Self {
                writer: Some(Uuid::try_parse(writer).ok()?),
                head_seqnum: Some(u64::from_str_radix(head_seqnum, 16).ok()?),
                head_realtime: u64::from_str_radix(head_realtime, 16).ok()?,
            })
        } else if let Some(stem) = path.strip_suffix(".journal~") {
            let (_, suffix) = stem.rsplit_once('@')?;
            let (timestamp, _number) = suffix.rsplit_once('-')?;

            Some(Self {
                writer: None,
                head_seqnum: None,
                head_realtime: u64::from_str_radix(timestamp, 16).ok()?,
            })
        } else {
            None
        }
    }
}

/// Timestamp used to visit newly discovered files newest first. Active files
/// have no timestamp in their name and sort before every archived one.
pub fn name_timestamp(path: &str) -> u64 {
    ArchivedName::parse(path).map_or(u64::MAX, |name| name.head_realtime)
}

fn sanitize_source(raw: &str) -> String {
    let mut source: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    source.truncate(MAX_SOURCE_LEN);
    source
}

/// Derive the source categories and label of a journal file from its path.
pub fn classify(path: &str) -> (SourceType, String) {
    let (dir, basename) = path.rsplit_once('/').unwrap_or(("", path));

    if path.contains("/remote/") {
        let source = match basename.strip_prefix("remote-") {
            Some(rest) => {
                let end = rest
                    .find('@')
                    .or_else(|| rest.find(".journal"))
                    .unwrap_or(rest.len());
                sanitize_source(&format!("remote-{}", &rest[..end]))
            }
            None => String::new(),
        };

        return (SourceType::REMOTE_ALL, source);
    }

    let parent = dir.rsplit_once('/').map_or(dir, |(_, name)| name);
    if let Some((_, namespace)) = parent.rsplit_once('.') {
        let source = sanitize_source(&format!("namespace-{namespace}"));
        return (SourceType::LOCAL_ALL | SourceType::LOCAL_NAMESPACE, source);
    }

    let kind = if basename.starts_with("system") {
        SourceType::LOCAL_SYSTEM
    } else if basename.starts_with("user") {
        SourceType::LOCAL_USER
    } else {
        SourceType::LOCAL_OTHER
    };

    (SourceType::LOCAL_ALL | kind, String::new())
}

/// Filesystem facts gathered when a file is discovered or touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiscoveredMeta {
    pub size: u64,
    pub modified_ut: u64,
    pub scan_monotonic_ut: u64,
}

impl DiscoveredMeta {
    pub fn from_metadata(metadata: &std::fs::Metadata, scan_monotonic_ut: u64) -> Self {
        let modified_ut = metadata
            .modified()
            .map(journal_common::time::system_time_to_usec)
            .unwrap_or(0);

        Self {
            size: metadata.len(),
            modified_ut,
            scan_monotonic_ut,
        }
    }
}

/// One discovered physical journal file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalFile {
    pub path: String,
    pub source_type: SourceType,
    pub source: String,

    pub size: u64,
    pub file_last_modified_ut: u64,
    pub msg_first_ut: u64,
    pub msg_last_ut: u64,
    pub last_scan_header_vs_last_modified_ut: u64,
    pub last_scan_monotonic_ut: u64,

    pub first_seqnum: u64,
    pub last_seqnum: u64,
    pub first_writer_id: Option<Uuid>,
    pub last_writer_id: Option<Uuid>,
    pub messages_in_file: u64,

    pub max_journal_vs_realtime_delta_ut: u64,

    #[serde(skip)]
    pub logged_failure: bool,

    /// mtime at which the file last failed to open. The file is left out of
    /// queries until it is modified again.
    #[serde(skip)]
    pub failed_modified_ut: Option<u64>,
}

impl JournalFile {
    /// A record holding only filesystem metadata. The header fields are
    /// filled later by a header refresh.
    pub fn discovered(path: &str, meta: DiscoveredMeta) -> Self {
        let (source_type, source) = classify(path);

        Self {
            path: String::from(path),
            source_type,
            source,
            size: meta.size,
            file_last_modified_ut: meta.modified_ut,
            msg_first_ut: 0,
            msg_last_ut: meta.modified_ut,
            last_scan_header_vs_last_modified_ut: 0,
            last_scan_monotonic_ut: meta.scan_monotonic_ut,
            first_seqnum: 0,
            last_seqnum: 0,
            first_writer_id: None,
            last_writer_id: None,
            messages_in_file: 0,
            max_journal_vs_realtime_delta_ut: JOURNAL_VS_REALTIME_DELTA_DEFAULT_UT,
            logged_failure: false,
            failed_modified_ut: None,
        }
    }

    pub fn path(&self) -> &Path {
        Path::new(&self.path)
    }

    /// Whether the header reflects the current on-disk contents.
    pub fn header_is_current(&self) -> bool {
        self.last_scan_header_vs_last_modified_ut != 0
            && self.last_scan_header_vs_last_modified_ut == self.file_last_modified_ut
    }

    /// Whether the file failed to open and has not changed since.
    pub fn is_unreadable(&self) -> bool {
        self.failed_modified_ut == Some(self.file_last_modified_ut)
    }

    /// Whether the file's time range, widened by its skew, overlaps
    /// `[after_ut, before_ut]`. Files without a known range always overlap.
    pub fn overlaps(&self, after_ut: u64, before_ut: u64) -> bool {
        if self.msg_last_ut == 0 {
            return true;
        }

        let first = self
            .msg_first_ut
            .saturating_sub(self.max_journal_vs_realtime_delta_ut);
        let last = self
            .msg_last_ut
            .saturating_add(self.max_journal_vs_realtime_delta_ut);

        first <= before_ut && last >= after_ut
    }

    /// Ordering of files for a backward query: the file most likely to hold
    /// the newest entries comes first. Forward queries use the reverse.
    pub fn cmp_newest_first(&self, other: &Self) -> Ordering {
        other
            .msg_last_ut
            .cmp(&self.msg_last_ut)
            .then_with(|| other.file_last_modified_ut.cmp(&self.file_last_modified_ut))
            .then_with(|| other.msg_first_ut.cmp(&self.msg_first_ut))
    }
}
