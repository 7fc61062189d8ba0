//! Adaptive sampling of the facet and histogram pass.
//!
//! Rows that may be returned are always parsed. The others are parsed until
//! three budgets (query, file and time slot) are met, then only one every
//! N rows is parsed, with N recomputed periodically from the estimated rows
//! left in the file. When a file is mostly being skipped, its remainder is
//! estimated instead of scanned.

use crate::request::Direction;
use journal_registry::JournalFile;
use serde::Serialize;
use tracing::debug;

pub(crate) const SAMPLING_SLOTS: usize = 1000;
const SAMPLING_RECALIBRATE: u64 = 10_000;
const STOP_AND_ESTIMATE_PROGRESS: f64 = 0.01;

/// How rows were accounted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SamplingStats {
    pub sampled: u64,
    pub unsampled: u64,
    pub estimated: u64,
}

impl SamplingStats {
    pub fn total(&self) -> u64 {
        self.sampled + self.unsampled + self.estimated
    }
}

/// Rows counted in one scope, and how many must be parsed before sampling
/// starts in that scope.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Budget {
    enable_after: u64,
    stats: SamplingStats,
}

impl Budget {
    fn new(enable_after: u64) -> Self {
        Self {
            enable_after,
            stats: SamplingStats::default(),
        }
    }

    fn below_threshold(&self) -> bool {
        self.stats.sampled < self.enable_after
    }
}

/// What to do with the current row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    /// Parse every field.
    Full,
    /// Count it as unsampled without parsing.
    SkipFields,
    /// Abandon the file and estimate the rest of it.
    StopAndEstimate,
}

/// Facts about the file being scanned.
#[derive(Debug, Clone)]
struct FileProgress {
    path: String,
    direction: Direction,
    /// Edges of the file's entries inside the scanned timeframe.
    lower_ut: u64,
    upper_ut: u64,
    file_first_ut: u64,
    file_last_ut: u64,
    first_seqnum: u64,
    last_seqnum: u64,
    consistent_writer: bool,
    messages_in_file: u64,
    rows: u64,
    first_msg_ut: u64,
    logged_fallback: bool,
}

impl FileProgress {
    /// Fraction of the scanned timeframe already covered, in `[0, 1]`.
    fn progress_by_time(&self, msg_ut: u64) -> f64 {
        let (done, span) = match self.direction {
            Direction::Backward => (
                self.first_msg_ut.saturating_sub(msg_ut),
                self.first_msg_ut.saturating_sub(self.lower_ut),
            ),
            Direction::Forward => (
                msg_ut.saturating_sub(self.first_msg_ut),
                self.upper_ut.saturating_sub(self.first_msg_ut),
            ),
        };

        if span == 0 {
            return 1.0;
        }
        (done as f64 / span as f64).clamp(0.0, 1.0)
    }

    /// Time between `msg_ut` and the end of the scan.
    fn remaining_ut(&self, msg_ut: u64) -> u64 {
        match self.direction {
            Direction::Backward => msg_ut.saturating_sub(self.lower_ut),
            Direction::Forward => self.upper_ut.saturating_sub(msg_ut),
        }
    }

    /// The far end of the scan, where an estimate stops.
    fn end_ut(&self) -> u64 {
        match self.direction {
            Direction::Backward => self.lower_ut,
            Direction::Forward => self.upper_ut,
        }
    }

    fn remaining_by_seqnum(&self, msg_ut: u64, seqnum: u64) -> Option<f64> {
        if !self.consistent_writer || self.messages_in_file == 0 {
            return None;
        }
        if seqnum < self.first_seqnum || seqnum > self.last_seqnum {
            return None;
        }

        let (to_file_end, file_span, window_span) = match self.direction {
            Direction::Backward => (
                seqnum - self.first_seqnum,
                msg_ut.saturating_sub(self.file_first_ut),
                msg_ut.saturating_sub(self.lower_ut),
            ),
            Direction::Forward => (
                self.last_seqnum - seqnum,
                self.file_last_ut.saturating_sub(msg_ut),
                self.upper_ut.saturating_sub(msg_ut),
            ),
        };

        let fraction = if file_span == 0 {
            1.0
        } else {
            (window_span as f64 / file_span as f64).clamp(0.0, 1.0)
        };

        Some(to_file_end as f64 * fraction)
    }

    fn remaining_by_time(&self, msg_ut: u64) -> f64 {
        let elapsed_ut = match self.direction {
            Direction::Backward => self.first_msg_ut.saturating_sub(msg_ut),
            Direction::Forward => msg_ut.saturating_sub(self.first_msg_ut),
        };

        let rate = self.rows as f64 / elapsed_ut.max(1) as f64;
        rate * self.remaining_ut(msg_ut) as f64
    }

    /// Rows between `msg_ut` and the end of the scan.
    fn remaining_lines(&mut self, msg_ut: u64, seqnum: Option<u64>) -> u64 {
        let by_seqnum = seqnum.and_then(|seqnum| self.remaining_by_seqnum(msg_ut, seqnum));

        let estimate = match by_seqnum {
            Some(lines) => lines,
            None => {
                if !self.logged_fallback {
                    debug!(
                        path = %self.path,
                        "no consistent sequence numbers, estimating remaining rows by time"
                    );
                    self.logged_fallback = true;
                }
                self.remaining_by_time(msg_ut)
            }
        };

        let mut lines = if estimate.is_finite() && estimate > 0.0 {
            estimate.round() as u64
        } else {
            0
        };

        if self.messages_in_file > 0 {
            lines = lines.min(self.messages_in_file.saturating_sub(self.rows));
        }
        lines
    }
}

/// Per-query sampling state.
#[derive(Debug)]
pub(crate) struct SamplingController {
    enabled: bool,
    sampling: u64,
    entries: u64,
    files_matched: u64,
    after_ut: u64,
    before_ut: u64,

    global: Budget,
    file: Budget,
    slots: Vec<Budget>,

    every: u64,
    skipped: u64,
    recalibrate: u64,
    progress: Option<FileProgress>,
}

impl SamplingController {
    /// `sampling` of zero disables sampling; `slots` is the number of
    /// histogram bars.
    pub(crate) fn new(
        sampling: u64,
        entries: usize,
        files_matched: usize,
        after_ut: u64,
        before_ut: u64,
        slots: usize,
    ) -> Self {
        let entries = entries as u64;
        let files_matched = (files_matched as u64).max(1);
        let slots = slots.clamp(2, SAMPLING_SLOTS);
        let slot_threshold = ((sampling / 4) / slots as u64).max(entries);

        Self {
            enabled: sampling > 0,
            sampling,
            entries,
            files_matched,
            after_ut,
            before_ut,
            global: Budget::new(sampling / 2),
            file: Budget::default(),
            slots: vec![Budget::new(slot_threshold); slots],
            every: 0,
            skipped: 0,
            recalibrate: 0,
            progress: None,
        }
    }

    /// Reset the per-file state before scanning `file` between `start_ut`
    /// and `stop_ut`.
    pub(crate) fn start_file(
        &mut self,
        file: &JournalFile,
        direction: Direction,
        start_ut: u64,
        stop_ut: u64,
    ) {
        self.file = Budget::new(((self.sampling / 4) / self.files_matched).max(self.entries));
        self.every = 0;
        self.skipped = 0;
        self.recalibrate = 0;

        let (mut lower_ut, mut upper_ut) = (start_ut.min(stop_ut), start_ut.max(stop_ut));
        if file.msg_first_ut != 0 {
            lower_ut = lower_ut.max(file.msg_first_ut);
        }
        if file.msg_last_ut != 0 {
            upper_ut = upper_ut.min(file.msg_last_ut);
        }

        self.progress = Some(FileProgress {
            path: file.path.clone(),
            direction,
            lower_ut,
            upper_ut: upper_ut.max(lower_ut),
            file_first_ut: file.msg_first_ut,
            file_last_ut: file.msg_last_ut,
            first_seqnum: file.first_seqnum,
            last_seqnum: file.last_seqnum,
            consistent_writer: file.first_writer_id.is_some()
                && file.first_writer_id == file.last_writer_id,
            messages_in_file: file.messages_in_file,
            rows: 0,
            first_msg_ut: 0,
            logged_fallback: false,
        });
    }

    fn slot_of(&self, usec: u64) -> usize {
        let span = self.before_ut.saturating_sub(self.after_ut) as u128 + 1;
        let offset = usec.clamp(self.after_ut, self.before_ut) - self.after_ut;
        ((offset as u128 * self.slots.len() as u128 / span) as usize).min(self.slots.len() - 1)
    }

    fn sampled(&mut self, slot: usize) -> Decision {
        self.global.stats.sampled += 1;
        self.file.stats.sampled += 1;
        self.slots[slot].stats.sampled += 1;
        Decision::Full
    }

    /// Decide how to handle a row at `msg_ut`. `candidate` rows may be
    /// returned and are always parsed.
    pub(crate) fn decide(&mut self, msg_ut: u64, seqnum: Option<u64>, candidate: bool) -> Decision {
        if let Some(progress) = &mut self.progress {
            if progress.rows == 0 {
                progress.first_msg_ut = msg_ut;
            }
            progress.rows += 1;
        }

        let slot = self.slot_of(msg_ut);

        if !self.enabled || candidate {
            return self.sampled(slot);
        }

        if self.global.below_threshold()
            || self.file.below_threshold()
            || self.slots[slot].below_threshold()
        {
            return self.sampled(slot);
        }

        if self.recalibrate >= SAMPLING_RECALIBRATE || self.every == 0 {
            let remaining = self
                .progress
                .as_mut()
                .map_or(0, |progress| progress.remaining_lines(msg_ut, seqnum));
            let wanted = ((self.sampling / 2) / self.files_matched).max(1);

            self.every = (remaining / wanted).max(1);
            self.skipped = 0;
            self.recalibrate = 0;
            return self.sampled(slot);
        }

        if self.skipped >= self.every {
            self.skipped = 0;
            return self.sampled(slot);
        }

        self.skipped += 1;
        self.recalibrate += 1;
        self.global.stats.unsampled += 1;
        self.file.stats.unsampled += 1;
        self.slots[slot].stats.unsampled += 1;

        let progress = self
            .progress
            .as_ref()
            .map_or(0.0, |progress| progress.progress_by_time(msg_ut));

        if self.file.stats.unsampled > self.file.stats.sampled
            && progress > STOP_AND_ESTIMATE_PROGRESS
        {
            Decision::StopAndEstimate
        } else {
            Decision::SkipFields
        }
    }

    /// Estimate the rest of the file after a [`Decision::StopAndEstimate`]
    /// at `msg_ut`. Returns the estimated rows and the time range they span.
    pub(crate) fn estimate_remaining(&mut self, msg_ut: u64, seqnum: Option<u64>) -> (u64, u64, u64) {
        let Some(progress) = self.progress.as_mut() else {
            return (0, msg_ut, msg_ut);
        };

        let lines = progress.remaining_lines(msg_ut, seqnum);
        let end_ut = progress.end_ut();

        self.global.stats.estimated += lines;
        self.file.stats.estimated += lines;

        (lines, msg_ut, end_ut)
    }

    pub(crate) fn file_stats(&self) -> SamplingStats {
        self.file.stats
    }

    pub(crate) fn stats(&self) -> SamplingStats {
        self.global.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journal_registry::DiscoveredMeta;
    use uuid::Uuid;

    const WRITER: Uuid = Uuid::from_u128(1);

    fn file(first_ut: u64, last_ut: u64, seqnums: Option<(u64, u64)>) -> JournalFile {
        let mut file = JournalFile::discovered("/j/m/system.journal", DiscoveredMeta::default());
        file.msg_first_ut = first_ut;
        file.msg_last_ut = last_ut;
        if let Some((first, last)) = seqnums {
            file.first_seqnum = first;
            file.last_seqnum = last;
            file.first_writer_id = Some(WRITER);
            file.last_writer_id = Some(WRITER);
            file.messages_in_file = last - first + 1;
        }
        file
    }

    #[test]
    fn disabled_sampling_parses_everything() {
        let mut sampler = SamplingController::new(0, 10, 1, 0, 1_000_000, 100);
        sampler.start_file(&file(0, 1_000_000, None), Direction::Backward, 1_000_000, 0);

        for usec in (0..1000).rev() {
            assert_eq!(sampler.decide(usec * 1000, None, false), Decision::Full);
        }
        assert_eq!(sampler.stats().sampled, 1000);
        assert_eq!(sampler.stats().unsampled, 0);
    }

    #[test]
    fn first_rows_below_the_global_threshold_are_sampled() {
        // global threshold is 50, the file and slot thresholds are lower
        let mut sampler = SamplingController::new(100, 1, 1, 0, 1_000_000_000, 1000);
        sampler.start_file(&file(0, 1_000_000_000, None), Direction::Backward, 1_000_000_000, 0);

        for i in 0..50u64 {
            let usec = 1_000_000_000 - i;
            assert_eq!(sampler.decide(usec, None, false), Decision::Full);
        }
        assert_eq!(sampler.stats().sampled, 50);
    }

    #[test]
    fn candidates_are_always_parsed() {
        let mut sampler = SamplingController::new(4, 1, 1, 0, 1_000_000, 10);
        sampler.start_file(&file(0, 1_000_000, None), Direction::Forward, 0, 1_000_000);

        for usec in 0..1000 {
            assert_eq!(sampler.decide(usec, None, true), Decision::Full);
        }
    }

    #[test]
    fn stride_accounts_for_every_row() {
        let total = 100_000u64;
        let mut sampler = SamplingController::new(1000, 10, 1, 0, total * 10, 100);
        sampler.start_file(
            &file(1, total * 10, Some((1, total))),
            Direction::Forward,
            0,
            total * 10,
        );

        let mut estimated = 0;
        for i in 1..=total {
            match sampler.decide(i * 10, Some(i), false) {
                Decision::Full | Decision::SkipFields => {}
                Decision::StopAndEstimate => {
                    let (lines, from, to) = sampler.estimate_remaining(i * 10, Some(i));
                    assert_eq!(from, i * 10);
                    assert_eq!(to, total * 10);
                    estimated = lines;
                    break;
                }
            }
        }

        let stats = sampler.stats();
        assert!(stats.unsampled > 0);
        assert_eq!(stats.estimated, estimated);
        // the seqnum estimate is exact for a dense file
        assert_eq!(stats.sampled + stats.unsampled + stats.estimated, total);
    }

    #[test]
    fn progress_by_time() {
        let mut sampler = SamplingController::new(10, 1, 1, 0, 1000, 10);
        sampler.start_file(&file(100, 900, None), Direction::Backward, 1000, 0);
        sampler.decide(900, None, true);

        let progress = sampler.progress.as_ref().unwrap();
        assert_eq!(progress.progress_by_time(900), 0.0);
        assert_eq!(progress.progress_by_time(500), 0.5);
        assert_eq!(progress.progress_by_time(0), 1.0);
    }

    #[test]
    fn time_estimate_is_capped_by_the_message_count() {
        let mut progress = FileProgress {
            path: String::from("/j/x.journal"),
            direction: Direction::Backward,
            lower_ut: 0,
            upper_ut: 1000,
            file_first_ut: 0,
            file_last_ut: 1000,
            first_seqnum: 0,
            last_seqnum: 0,
            consistent_writer: false,
            messages_in_file: 120,
            rows: 100,
            first_msg_ut: 1000,
            logged_fallback: false,
        };

        // 100 rows over 100us, 900us to go
        assert_eq!(progress.remaining_lines(900, None), 20);

        progress.messages_in_file = 0;
        assert_eq!(progress.remaining_lines(900, None), 900);
        assert!(progress.logged_fallback);
    }
}
