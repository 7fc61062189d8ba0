//! Query execution over the registered journal files.

use crate::accumulator::Accumulator;
use crate::error::{EngineError, Result};
use crate::request::{Direction, QueryPlan, QueryRequest};
use crate::result::{FileStats, QueryResult, QueryStatus, status_message};
use crate::sampling::SamplingController;
use crate::scan::{ScanStatus, Scanner};
use crate::timeout::Deadline;
use journal_common::time::{USEC_PER_SEC, now_realtime_usec};
use journal_registry::{FileRegistry, JournalFile};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

/// Runs queries against the files of a registry.
///
/// The engine holds no per-query state, so one instance can serve any
/// number of concurrent queries.
#[derive(Clone)]
pub struct QueryEngine {
    registry: FileRegistry,
}

impl QueryEngine {
    pub fn new(registry: FileRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    /// Run `request` on tokio's blocking pool.
    pub async fn spawn(&self, request: QueryRequest, deadline: Deadline) -> Result<QueryResult> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.execute(&request, &deadline)).await?
    }

    /// Run `request` until it completes, the deadline passes or it is
    /// cancelled.
    pub fn execute(&self, request: &QueryRequest, deadline: &Deadline) -> Result<QueryResult> {
        let now_s = (now_realtime_usec() / USEC_PER_SEC) as i64;
        let plan = request.validate(now_s)?;
        self.execute_plan(&plan, deadline)
    }

    /// Files matching the plan on what the registry already knows.
    ///
    /// Until its header is read a record's `msg_last_ut` is its mtime, so the
    /// selection only errs towards including files.
    fn candidate_files(&self, plan: &QueryPlan) -> Vec<JournalFile> {
        self.registry
            .snapshot()
            .into_iter()
            .filter(|file| !file.is_unreadable() && plan.selects(file))
            .collect()
    }

    /// Refresh stale headers while the deadline allows it, drop the files
    /// that no longer match and order the rest for visiting. Past the
    /// deadline, files are kept on what the registry already knows.
    fn select_files(&self, plan: &QueryPlan, candidates: Vec<JournalFile>, deadline: &Deadline) -> Vec<JournalFile> {
        let mut files: Vec<JournalFile> = candidates
            .into_iter()
            .filter_map(|file| {
                if file.header_is_current() || deadline.check().is_some() {
                    return Some(file);
                }
                self.registry.update_header(&file.path);
                self.registry.get(&file.path)
            })
            .filter(|file| !file.is_unreadable() && plan.selects(file))
            .collect();

        files.sort_by(|a, b| match plan.direction {
            Direction::Backward => a.cmp_newest_first(b),
            Direction::Forward => b.cmp_newest_first(a),
        });
        files
    }

    #[instrument(level = "debug", skip_all, fields(after_ut = plan.after_ut, before_ut = plan.before_ut))]
    fn execute_plan(&self, plan: &QueryPlan, deadline: &Deadline) -> Result<QueryResult> {
        let candidates = self.candidate_files(plan);

        if plan.if_modified_since != 0
            && !candidates.iter().any(|file| file.msg_last_ut > plan.if_modified_since)
        {
            debug!(files = candidates.len(), "no journal file modified since the last query");
            let mut result = QueryResult::empty(QueryStatus::NotModified, plan.direction, plan.after_ut, plan.before_ut);
            result.files_matched = candidates.len();
            return Ok(result);
        }

        let files = self.select_files(plan, candidates, deadline);

        let mut acc = Accumulator::new(plan);
        let mut sampler = SamplingController::new(
            plan.sampling,
            plan.entries,
            files.len(),
            plan.after_ut,
            plan.before_ut,
            acc.histogram_slots(),
        );
        let scanner = Scanner {
            plan,
            registry: &self.registry,
            deadline,
        };
        let factory = self.registry.reader_factory();

        let mut status = QueryStatus::NoFileMatched;
        let mut partial = false;
        let mut max_file_duration = Duration::ZERO;
        let mut last_modified_ut = 0;
        let mut stats: Vec<FileStats> = Vec::new();

        for file in &files {
            if deadline.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            if deadline.cannot_fit(max_file_duration) {
                info!(
                    remaining = ?deadline.remaining(),
                    max_file_duration = ?max_file_duration,
                    "not enough time left to scan the next journal file"
                );
                partial = true;
                status = QueryStatus::TimedOut;
                break;
            }

            if cannot_improve(plan, &acc, file) {
                debug!(path = %file.path, "result already full, skipping journal file");
                continue;
            }

            let started = Instant::now();
            let mut reader = match factory.open(file.path()) {
                Ok(reader) => reader,
                Err(e) => {
                    self.registry.mark_unreadable(&file.path, &e);
                    stats.push(FileStats::new(file, QueryStatus::FailedToOpen));
                    partial = true;
                    if status == QueryStatus::NoFileMatched {
                        status = QueryStatus::FailedToOpen;
                    }
                    continue;
                }
            };

            let scan = scanner.scan(file, reader.as_mut(), &mut acc, &mut sampler);
            drop(reader);

            max_file_duration = max_file_duration.max(started.elapsed());
            last_modified_ut = last_modified_ut.max(scan.stats.msg_last_ut);
            stats.push(scan.stats);

            match scan.status {
                ScanStatus::Ok => status = QueryStatus::Ok,
                // a file without the selected values leaves failures standing
                ScanStatus::NoMatch => {}
                ScanStatus::FailedToSeek => {
                    partial = true;
                    if status == QueryStatus::NoFileMatched {
                        status = QueryStatus::FailedToSeek;
                    }
                }
                ScanStatus::TimedOut => {
                    partial = true;
                    status = QueryStatus::TimedOut;
                    break;
                }
                ScanStatus::Cancelled => return Err(EngineError::Cancelled),
            }
        }

        let rows_useful: u64 = stats.iter().map(|s| s.rows_useful).sum();
        if status == QueryStatus::Ok && plan.if_modified_since != 0 && rows_useful == 0 {
            status = QueryStatus::NotModified;
        }

        let sampling = sampler.stats();
        if sampling.estimated > 0 && !plan.accept_estimated {
            partial = true;
        }

        let accumulated = acc.finish();
        let with_counters = !plan.data_only || plan.delta;

        let message = if plan.data_only {
            None
        } else {
            status_message(self.registry.scans_completed(), partial, &sampling)
        };

        let result = QueryResult {
            status,
            partial,
            message,
            direction: plan.direction,
            after_ut: plan.after_ut,
            before_ut: plan.before_ut,
            rows: accumulated.rows,
            facets: with_counters.then_some(accumulated.facets),
            histogram: with_counters.then_some(accumulated.histogram),
            items: with_counters.then_some(accumulated.items),
            sampling,
            last_modified_ut,
            files_matched: files.len(),
            files_scanned: stats
                .iter()
                .filter(|s| s.status != QueryStatus::FailedToOpen)
                .count(),
            rows_read: stats.iter().map(|s| s.rows_read).sum(),
            rows_useful,
            bytes_read: stats.iter().map(|s| s.bytes_read).sum(),
            files: stats,
        };

        debug!(
            status = ?result.status,
            partial = result.partial,
            rows = result.rows.len(),
            files_scanned = result.files_scanned,
            "query finished"
        );

        Ok(result)
    }
}

/// Whether a data-only query with a full result can skip `file`, because
/// every entry in it is beyond the rows already kept.
fn cannot_improve(plan: &QueryPlan, acc: &Accumulator, file: &JournalFile) -> bool {
    if !plan.timeframe(0).stop_when_full || !acc.rows().is_full() || file.msg_last_ut == 0 {
        return false;
    }

    let skew = file.max_journal_vs_realtime_delta_ut;
    match plan.direction {
        Direction::Backward => acc
            .rows()
            .oldest()
            .is_some_and(|oldest| file.msg_last_ut.saturating_add(skew) < oldest),
        Direction::Forward => acc
            .rows()
            .newest()
            .is_some_and(|newest| file.msg_first_ut.saturating_sub(skew) > newest),
    }
}
