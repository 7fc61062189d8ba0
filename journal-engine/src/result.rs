//! Query results and diagnostics.

use crate::facets::FacetCounts;
use crate::histogram::HistogramResult;
use crate::request::Direction;
use crate::rows::Row;
use crate::sampling::SamplingStats;
use journal_registry::SourceType;
use serde::Serialize;

/// Terminal status of a query, or of the scan of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Ok,
    NotModified,
    NoFileMatched,
    TimedOut,
    FailedToOpen,
    FailedToSeek,
}

/// How the rows the query looked at were handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ItemCounters {
    pub evaluated: u64,
    pub matched: u64,
    pub unsampled: u64,
    pub estimated: u64,
    pub returned: u64,
    pub max_to_return: u64,
    /// Newer rows dropped from a full forward result.
    pub skips_before: u64,
    /// Older rows dropped from a full backward result.
    pub skips_after: u64,
    /// Kept rows evicted by better ones.
    pub shifts: u64,
}

/// Diagnostics of one visited file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileStats {
    pub path: String,
    pub source_type: SourceType,
    pub source: String,
    pub status: QueryStatus,
    pub duration_ut: u64,
    pub rows_read: u64,
    pub rows_useful: u64,
    pub bytes_read: u64,
    pub rows_per_second: f64,
    pub bytes_per_second: f64,
    pub sampling: SamplingStats,
    pub skipped_without_timestamp: u64,
    /// Range of entry timestamps seen, zero when none.
    pub msg_first_ut: u64,
    pub msg_last_ut: u64,
    pub max_journal_vs_realtime_delta_ut: u64,
}

impl FileStats {
    pub(crate) fn new(file: &journal_registry::JournalFile, status: QueryStatus) -> Self {
        Self {
            path: file.path.clone(),
            source_type: file.source_type,
            source: file.source.clone(),
            status,
            duration_ut: 0,
            rows_read: 0,
            rows_useful: 0,
            bytes_read: 0,
            rows_per_second: 0.0,
            bytes_per_second: 0.0,
            sampling: SamplingStats::default(),
            skipped_without_timestamp: 0,
            msg_first_ut: 0,
            msg_last_ut: 0,
            max_journal_vs_realtime_delta_ut: file.max_journal_vs_realtime_delta_ut,
        }
    }

    pub(crate) fn finish(&mut self, duration_ut: u64) {
        self.duration_ut = duration_ut;
        let seconds = duration_ut.max(1) as f64 / 1_000_000.0;
        self.rows_per_second = self.rows_read as f64 / seconds;
        self.bytes_per_second = self.bytes_read as f64 / seconds;
    }
}

/// Everything a query produced.
///
/// Facets, histogram and item counters are absent from data-only responses
/// unless deltas were requested.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub status: QueryStatus,
    pub partial: bool,
    pub message: Option<String>,
    pub direction: Direction,
    pub after_ut: u64,
    pub before_ut: u64,
    pub rows: Vec<Row>,
    pub facets: Option<Vec<FacetCounts>>,
    pub histogram: Option<HistogramResult>,
    pub items: Option<ItemCounters>,
    pub sampling: SamplingStats,
    /// Newest entry timestamp seen in any visited file.
    pub last_modified_ut: u64,
    pub files_matched: usize,
    pub files_scanned: usize,
    pub rows_read: u64,
    pub rows_useful: u64,
    pub bytes_read: u64,
    pub files: Vec<FileStats>,
}

impl QueryResult {
    pub(crate) fn empty(status: QueryStatus, direction: Direction, after_ut: u64, before_ut: u64) -> Self {
        Self {
            status,
            partial: false,
            message: None,
            direction,
            after_ut,
            before_ut,
            rows: Vec::new(),
            facets: None,
            histogram: None,
            items: None,
            sampling: SamplingStats::default(),
            last_modified_ut: 0,
            files_matched: 0,
            files_scanned: 0,
            rows_read: 0,
            rows_useful: 0,
            bytes_read: 0,
            files: Vec::new(),
        }
    }

    pub fn facet(&self, field: &str) -> Option<&FacetCounts> {
        self.facets.as_ref()?.iter().find(|f| f.field == field)
    }
}

/// Human-readable explanation of why data may be incomplete.
pub(crate) fn status_message(scans_completed: u64, partial: bool, sampling: &SamplingStats) -> Option<String> {
    let mut message = String::new();

    if scans_completed == 0 {
        message.push_str("Journals are still being scanned. ");
    }

    if partial {
        message.push_str("Query timed-out, incomplete data. ");
    }

    if sampling.unsampled > 0 || sampling.estimated > 0 {
        let total = sampling.total().max(1) as f64;
        let percent = |n: u64| n as f64 * 100.0 / total;
        message.push_str(&format!(
            "{:.2}% real data, {:.2}% unsampled, {:.2}% estimated",
            percent(sampling.sampled),
            percent(sampling.unsampled),
            percent(sampling.estimated)
        ));
    }

    let message = message.trim_end();
    (!message.is_empty()).then(|| message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        let exact = SamplingStats {
            sampled: 10,
            ..Default::default()
        };
        assert_eq!(status_message(1, false, &exact), None);
        assert_eq!(
            status_message(0, true, &exact).as_deref(),
            Some("Journals are still being scanned. Query timed-out, incomplete data.")
        );

        let sampled = SamplingStats {
            sampled: 50,
            unsampled: 25,
            estimated: 25,
        };
        assert_eq!(
            status_message(1, false, &sampled).as_deref(),
            Some("50.00% real data, 25.00% unsampled, 25.00% estimated")
        );
    }

    #[test]
    fn status_serializes_in_snake_case() {
        let json = serde_json::to_string(&QueryStatus::NoFileMatched).unwrap();
        assert_eq!(json, "\"no_file_matched\"");
    }
}
