//! Scan of one journal file.

use crate::accumulator::Accumulator;
use crate::facets::{FACET_MAX_VALUE_LENGTH, FACET_VALUE_UNSET, JOURNAL_FILE_FIELD};
use crate::request::{Direction, QueryPlan};
use crate::result::{FileStats, QueryStatus};
use crate::sampling::{Decision, SamplingController};
use crate::timeout::{Deadline, Interrupt};
use journal_common::{JournalReader, ReaderError};
use journal_registry::{FileRegistry, JOURNAL_VS_REALTIME_DELTA_MAX_UT, JournalFile};
use std::time::Instant;
use tracing::{debug, warn};

/// Rows between deadline and cancellation checks.
const CHECK_EVERY_ROWS: u64 = 1 << 13;

/// Rows between checks of whether a full result can still improve.
const FULL_CHECK_EVERY_ROWS: u64 = 1 << 7;

/// How the scan of one file ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanStatus {
    Ok,
    /// The file cannot hold rows matching the selections.
    NoMatch,
    FailedToSeek,
    TimedOut,
    Cancelled,
}

impl ScanStatus {
    pub(crate) fn query_status(self) -> QueryStatus {
        match self {
            Self::Ok => QueryStatus::Ok,
            Self::NoMatch => QueryStatus::NoFileMatched,
            Self::FailedToSeek => QueryStatus::FailedToSeek,
            Self::TimedOut | Self::Cancelled => QueryStatus::TimedOut,
        }
    }
}

impl From<Interrupt> for ScanStatus {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => Self::Cancelled,
            Interrupt::TimedOut => Self::TimedOut,
        }
    }
}

pub(crate) struct FileScan {
    pub(crate) status: ScanStatus,
    pub(crate) stats: FileStats,
}

pub(crate) struct Scanner<'a> {
    pub(crate) plan: &'a QueryPlan,
    pub(crate) registry: &'a FileRegistry,
    pub(crate) deadline: &'a Deadline,
}

impl Scanner<'_> {
    pub(crate) fn scan(
        &self,
        file: &JournalFile,
        reader: &mut dyn JournalReader,
        acc: &mut Accumulator,
        sampler: &mut SamplingController,
    ) -> FileScan {
        let started = Instant::now();
        let mut stats = FileStats::new(file, QueryStatus::Ok);

        reader.set_data_threshold(FACET_MAX_VALUE_LENGTH);

        let status = if self.prepare_filters(file, reader, acc) {
            self.scan_entries(file, reader, acc, sampler, &mut stats)
        } else {
            debug!(path = %file.path, "journal file has none of the selected values");
            ScanStatus::NoMatch
        };

        stats.status = status.query_status();
        stats.sampling = sampler.file_stats();
        stats.finish(started.elapsed().as_micros() as u64);

        FileScan { status, stats }
    }

    /// Discover values of filtered fields and, for data-only queries, push
    /// the selections down to the reader. Returns `false` when the file
    /// cannot match.
    fn prepare_filters(&self, file: &JournalFile, reader: &mut dyn JournalReader, acc: &mut Accumulator) -> bool {
        let filtered: Vec<(String, Vec<String>)> = acc
            .facets()
            .filtered()
            .map(|(field, selected)| (field.to_string(), selected.iter().cloned().collect()))
            .collect();

        let mut pushdown = Vec::new();
        let mut can_push = self.plan.data_only;

        for (field, selected) in &filtered {
            let unique = match reader.unique_values(field) {
                Ok(unique) => unique,
                Err(e) => {
                    debug!(path = %file.path, field, error = %e, "cannot enumerate field values");
                    can_push = false;
                    continue;
                }
            };

            for value in &unique {
                acc.facets_mut()
                    .register_value(field, &String::from_utf8_lossy(value));
            }

            // rows lacking the field can only be found by scanning
            if !self.plan.data_only || selected.iter().any(|v| v == FACET_VALUE_UNSET) {
                continue;
            }

            let values: Vec<Vec<u8>> = unique
                .into_iter()
                .filter(|value| selected.iter().any(|s| s.as_bytes() == value.as_slice()))
                .collect();

            if values.is_empty() {
                return false;
            }
            pushdown.push((field.as_str(), values));
        }

        if can_push && !pushdown.is_empty() {
            if let Err(e) = push_matches(reader, &pushdown) {
                debug!(path = %file.path, error = %e, "cannot add matches, scanning unfiltered");
                reader.clear_matches();
            }
        }

        true
    }

    fn seek(&self, reader: &mut dyn JournalReader, start_ut: u64) -> Result<(), ReaderError> {
        reader.seek_realtime(start_ut).or_else(|_| match self.plan.direction {
            Direction::Backward => reader.seek_tail(),
            Direction::Forward => reader.seek_head(),
        })
    }

    fn scan_entries(
        &self,
        file: &JournalFile,
        reader: &mut dyn JournalReader,
        acc: &mut Accumulator,
        sampler: &mut SamplingController,
        stats: &mut FileStats,
    ) -> ScanStatus {
        let direction = self.plan.direction;
        let delta_ut = file.max_journal_vs_realtime_delta_ut;
        let frame = self.plan.timeframe(delta_ut);

        if let Err(e) = self.seek(reader, frame.start_ut) {
            warn!(path = %file.path, error = %e, "cannot seek journal file");
            return ScanStatus::FailedToSeek;
        }

        sampler.start_file(file, direction, frame.start_ut, frame.stop_ut);

        let mut status = ScanStatus::Ok;
        let mut last_from_ut = 0;
        let mut last_to_ut = 0;
        let mut max_delta_ut = 0;

        loop {
            let stepped = match direction {
                Direction::Backward => reader.previous(),
                Direction::Forward => reader.next(),
            };
            match stepped {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    debug!(path = %file.path, error = %e, "cannot step journal file");
                    break;
                }
            }

            stats.rows_read += 1;
            if stats.rows_read % CHECK_EVERY_ROWS == 0 {
                if let Some(interrupt) = self.deadline.check() {
                    status = interrupt.into();
                    break;
                }
            }

            let Some(mut msg_ut) = reader.realtime_usec().filter(|&usec| usec != 0) else {
                stats.skipped_without_timestamp += 1;
                continue;
            };

            match direction {
                Direction::Backward => {
                    if msg_ut > frame.start_ut {
                        continue;
                    }
                    if msg_ut < frame.stop_ut {
                        break;
                    }
                }
                Direction::Forward => {
                    if msg_ut < frame.start_ut {
                        continue;
                    }
                    if msg_ut > frame.stop_ut {
                        break;
                    }
                }
            }

            if stats.msg_first_ut == 0 || msg_ut < stats.msg_first_ut {
                stats.msg_first_ut = msg_ut;
            }
            stats.msg_last_ut = stats.msg_last_ut.max(msg_ut);

            if frame.stop_when_full
                && stats.rows_read % FULL_CHECK_EVERY_ROWS == 0
                && acc.rows().is_full()
            {
                let cannot_improve = match direction {
                    Direction::Backward => acc
                        .rows()
                        .oldest()
                        .is_some_and(|oldest| msg_ut < oldest.saturating_sub(delta_ut)),
                    Direction::Forward => acc
                        .rows()
                        .newest()
                        .is_some_and(|newest| msg_ut > newest.saturating_add(delta_ut)),
                };
                if cannot_improve {
                    break;
                }
            }

            let seqnum = reader.seqnum().map(|info| info.seqnum);
            let candidate = acc.rows().candidate_to_keep(msg_ut);

            match sampler.decide(msg_ut, seqnum, candidate) {
                Decision::Full => {}
                Decision::SkipFields => {
                    acc.unsampled(msg_ut);
                    continue;
                }
                Decision::StopAndEstimate => {
                    acc.unsampled(msg_ut);
                    let (lines, from_ut, to_ut) = sampler.estimate_remaining(msg_ut, seqnum);
                    debug!(path = %file.path, lines, "estimating the rest of the journal file");
                    acc.estimated(from_ut, to_ut, lines);
                    break;
                }
            }

            acc.begin_row();
            acc.add_field(JOURNAL_FILE_FIELD, file.path.as_bytes());

            let mut bytes = 0u64;
            let parsed = reader.enumerate_fields(&mut |name, value| {
                bytes += (name.len() + value.len()) as u64;
                acc.add_field(name, value);
            });
            stats.bytes_read += bytes;
            if let Err(e) = parsed {
                debug!(path = %file.path, error = %e, "cannot read all fields of entry");
            }

            if let Some(source_ut) = acc.source_realtime_ut() {
                if source_ut != 0 && source_ut < msg_ut {
                    max_delta_ut = max_delta_ut.max(msg_ut - source_ut);
                    msg_ut = source_ut;
                }
            }

            // equal timestamps get distinct sort keys, in scan order
            let mut sort_ut = msg_ut;
            if last_from_ut <= msg_ut && msg_ut <= last_to_ut {
                match direction {
                    Direction::Backward => {
                        last_from_ut = last_from_ut.saturating_sub(1);
                        sort_ut = last_from_ut;
                    }
                    Direction::Forward => {
                        last_to_ut = last_to_ut.saturating_add(1);
                        sort_ut = last_to_ut;
                    }
                }
            } else {
                last_from_ut = msg_ut;
                last_to_ut = msg_ut;
            }

            if acc.finish_row(msg_ut, sort_ut) {
                stats.rows_useful += 1;
            }
        }

        if max_delta_ut > delta_ut {
            self.registry.record_realtime_delta(&file.path, max_delta_ut);
            stats.max_journal_vs_realtime_delta_ut = max_delta_ut.min(JOURNAL_VS_REALTIME_DELTA_MAX_UT);
        }

        status
    }
}

fn push_matches(reader: &mut dyn JournalReader, pushdown: &[(&str, Vec<Vec<u8>>)]) -> Result<(), ReaderError> {
    for (idx, (field, values)) in pushdown.iter().enumerate() {
        if idx > 0 {
            reader.add_conjunction()?;
        }
        for value in values {
            reader.add_match(field, value)?;
        }
    }
    Ok(())
}
