//! Query requests and their validation into an executable plan.
//!
//! A [`QueryRequest`] is what a caller asks for: seconds-based time window,
//! an optional pagination anchor, facet selections and so on. Validation
//! normalizes the window, resolves the anchor rules and compiles patterns,
//! producing a [`QueryPlan`] the engine executes.

use crate::error::{EngineError, Result};
use journal_common::time::USEC_PER_SEC;
use journal_registry::{JournalFile, SourceType, group_source_type};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_ENTRIES: usize = 200;
pub const DEFAULT_SAMPLING: u64 = 1_000_000;
pub const DEFAULT_QUERY_DURATION_S: i64 = 3600;
pub const DEFAULT_HISTOGRAM_FIELD: &str = "PRIORITY";

/// Direction in which files and entries are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    #[default]
    Backward,
}

/// A query as submitted by a caller.
///
/// Times are unix seconds. A non-positive `before_s` is relative to now and a
/// non-positive `after_s` is relative to `before_s`; both zero means the last
/// hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryRequest {
    pub after_s: i64,
    pub before_s: i64,
    /// Microsecond timestamp to continue pagination from. Zero for none.
    pub anchor_ut: u64,
    pub direction: Direction,
    /// Rows to return. Zero selects the default.
    pub entries: usize,
    /// Rows to fully parse before sampling kicks in. Zero disables sampling.
    pub sampling: u64,
    /// Return only rows, as fast as possible.
    pub data_only: bool,
    /// With `data_only`, also report facet, histogram and item counters for
    /// the scanned range.
    pub delta: bool,
    /// With `data_only` and `if_modified_since`, return the newest rows up to
    /// the anchor.
    pub tail: bool,
    /// Microsecond watermark from a previous response. Zero for none.
    pub if_modified_since: u64,
    /// Consider a result with estimated rows complete.
    pub accept_estimated: bool,
    pub source_type: SourceType,
    /// Source group names (as in the sources summary) or label patterns
    /// with `*` wildcards.
    pub sources: Vec<String>,
    /// Facet fields. Empty selects the default list.
    pub facets: Vec<String>,
    /// Selected values per field.
    pub filters: BTreeMap<String, Vec<String>>,
    /// Full-text search: `|` separated words, `!` negates a word.
    pub query: Option<String>,
    pub histogram: Option<String>,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            after_s: 0,
            before_s: 0,
            anchor_ut: 0,
            direction: Direction::Backward,
            entries: 0,
            sampling: DEFAULT_SAMPLING,
            data_only: false,
            delta: false,
            tail: false,
            if_modified_since: 0,
            accept_estimated: false,
            source_type: SourceType::empty(),
            sources: Vec::new(),
            facets: Vec::new(),
            filters: BTreeMap::new(),
            query: None,
            histogram: None,
        }
    }
}

impl QueryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(mut self, after_s: i64, before_s: i64) -> Self {
        self.after_s = after_s;
        self.before_s = before_s;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_anchor(mut self, anchor_ut: u64) -> Self {
        self.anchor_ut = anchor_ut;
        self
    }

    pub fn with_entries(mut self, entries: usize) -> Self {
        self.entries = entries;
        self
    }

    pub fn with_sampling(mut self, sampling: u64) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn data_only(mut self) -> Self {
        self.data_only = true;
        self
    }

    pub fn with_delta(mut self) -> Self {
        self.delta = true;
        self
    }

    pub fn with_tail(mut self) -> Self {
        self.tail = true;
        self
    }

    pub fn with_if_modified_since(mut self, usec: u64) -> Self {
        self.if_modified_since = usec;
        self
    }

    pub fn accepting_estimates(mut self) -> Self {
        self.accept_estimated = true;
        self
    }

    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = source_type;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    pub fn with_facets<I, S>(mut self, facets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.facets = facets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter<I, S>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters
            .insert(field.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_histogram(mut self, field: impl Into<String>) -> Self {
        self.histogram = Some(field.into());
        self
    }

    /// Normalize the request against the current time (unix seconds).
    pub fn validate(&self, now_s: i64) -> Result<QueryPlan> {
        for field in self.filters.keys().chain(self.facets.iter()) {
            if field.is_empty() || field.contains('=') {
                return Err(EngineError::InvalidRequest(format!(
                    "invalid field name {field:?}"
                )));
            }
        }

        let delta = self.delta && self.data_only;
        let tail = self.tail && self.data_only && self.if_modified_since != 0;

        let (after_s, before_s) = resolve_window(self.after_s, self.before_s, now_s);
        if before_s > MAX_WINDOW_S {
            return Err(EngineError::InvalidRequest(format!(
                "query window ends too far in the future ({before_s}s)"
            )));
        }
        let after_ut = after_s as u64 * USEC_PER_SEC;
        let before_ut = before_s as u64 * USEC_PER_SEC + USEC_PER_SEC - 1;

        let mut direction = self.direction;
        let mut anchor = Anchor {
            start_ut: self.anchor_ut,
            stop_ut: 0,
        };

        if anchor.start_ut != 0 && tail {
            direction = Direction::Backward;
            anchor = Anchor {
                start_ut: 0,
                stop_ut: self.anchor_ut,
            };
        }

        if self.anchor_ut != 0 && (self.anchor_ut < after_ut || self.anchor_ut > before_ut) {
            tracing::debug!(
                anchor_ut = self.anchor_ut,
                after_ut,
                before_ut,
                "anchor outside the query window, ignoring it"
            );
            anchor = Anchor::default();
            direction = Direction::Backward;
        }

        let histogram = self
            .histogram
            .as_deref()
            .filter(|field| !field.is_empty())
            .unwrap_or(DEFAULT_HISTOGRAM_FIELD)
            .to_string();

        let query = self.query.as_deref().and_then(FullTextQuery::parse);

        Ok(QueryPlan {
            after_ut,
            before_ut,
            anchor,
            direction,
            entries: if self.entries == 0 {
                DEFAULT_ENTRIES
            } else {
                self.entries
            },
            sampling: self.sampling,
            data_only: self.data_only,
            delta,
            tail,
            if_modified_since: self.if_modified_since,
            accept_estimated: self.accept_estimated,
            sources: SourceFilter::new(self.source_type, &self.sources),
            facets: self.facets.clone(),
            filters: self.filters.clone(),
            query,
            histogram,
        })
    }
}

/// Latest accepted window end, 9999-12-31T23:59:59Z.
const MAX_WINDOW_S: i64 = 253_402_300_799;

fn resolve_window(after_s: i64, before_s: i64, now_s: i64) -> (i64, i64) {
    let (mut after_s, mut before_s) = if after_s == 0 && before_s == 0 {
        (now_s.saturating_sub(DEFAULT_QUERY_DURATION_S), now_s)
    } else {
        let before_s = if before_s <= 0 { now_s.saturating_add(before_s) } else { before_s };
        let after_s = if after_s <= 0 { before_s.saturating_add(after_s) } else { after_s };
        (after_s, before_s)
    };

    if after_s > before_s {
        std::mem::swap(&mut after_s, &mut before_s);
    }

    if after_s == before_s {
        after_s = before_s.saturating_sub(DEFAULT_QUERY_DURATION_S);
    }

    (after_s.max(0), before_s.max(0))
}

/// Pagination boundaries. Zero means unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Anchor {
    pub start_ut: u64,
    pub stop_ut: u64,
}

impl Anchor {
    pub fn is_set(&self) -> bool {
        self.start_ut != 0 || self.stop_ut != 0
    }

    /// Whether a row at `usec` lies on the requested side of the anchor.
    pub fn contains(&self, usec: u64, direction: Direction) -> bool {
        match direction {
            Direction::Backward => {
                (self.start_ut == 0 || usec < self.start_ut)
                    && (self.stop_ut == 0 || usec > self.stop_ut)
            }
            Direction::Forward => {
                (self.start_ut == 0 || usec > self.start_ut)
                    && (self.stop_ut == 0 || usec < self.stop_ut)
            }
        }
    }
}

/// Scan boundaries within one file, in visiting order: entries are read
/// from `start_ut` towards `stop_ut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeframe {
    pub start_ut: u64,
    pub stop_ut: u64,
    pub stop_when_full: bool,
}

/// Full-text search over field values.
#[derive(Debug, Clone)]
pub(crate) struct FullTextQuery {
    positive: Option<regex::bytes::Regex>,
    negative: Option<regex::bytes::Regex>,
}

impl FullTextQuery {
    pub(crate) fn parse(text: &str) -> Option<Self> {
        let mut positive = Vec::new();
        let mut negative = Vec::new();

        for word in text.split('|').map(str::trim).filter(|w| !w.is_empty()) {
            match word.strip_prefix('!') {
                Some(word) if !word.is_empty() => negative.push(regex::escape(word)),
                Some(_) => {}
                None => positive.push(regex::escape(word)),
            }
        }

        let compile = |words: Vec<String>| -> Option<regex::bytes::Regex> {
            if words.is_empty() {
                return None;
            }
            regex::bytes::RegexBuilder::new(&words.join("|"))
                .case_insensitive(true)
                .build()
                .ok()
        };

        let query = Self {
            positive: compile(positive),
            negative: compile(negative),
        };

        (query.positive.is_some() || query.negative.is_some()).then_some(query)
    }

    pub(crate) fn has_positive(&self) -> bool {
        self.positive.is_some()
    }

    pub(crate) fn matches_positive(&self, value: &[u8]) -> bool {
        self.positive.as_ref().is_some_and(|re| re.is_match(value))
    }

    pub(crate) fn matches_negative(&self, value: &[u8]) -> bool {
        self.negative.as_ref().is_some_and(|re| re.is_match(value))
    }
}

/// Which files a query reads, by category or by label.
#[derive(Debug, Clone)]
pub(crate) struct SourceFilter {
    types: SourceType,
    labels: Vec<Regex>,
}

impl SourceFilter {
    fn new(types: SourceType, names: &[String]) -> Self {
        let mut filter = Self {
            types,
            labels: Vec::new(),
        };

        for name in names {
            match group_source_type(name) {
                Some(kind) => filter.types |= kind,
                None => {
                    let pattern = name
                        .split('*')
                        .map(regex::escape)
                        .collect::<Vec<_>>()
                        .join(".*");
                    if let Ok(re) = Regex::new(&format!("^{pattern}$")) {
                        filter.labels.push(re);
                    }
                }
            }
        }

        filter
    }

    pub(crate) fn matches(&self, file: &JournalFile) -> bool {
        (self.types.is_empty() && self.labels.is_empty())
            || self.types.intersects(file.source_type)
            || self.labels.iter().any(|re| re.is_match(&file.source))
    }
}

/// A validated request.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub after_ut: u64,
    pub before_ut: u64,
    pub anchor: Anchor,
    pub direction: Direction,
    pub entries: usize,
    pub sampling: u64,
    pub data_only: bool,
    pub delta: bool,
    pub tail: bool,
    pub if_modified_since: u64,
    pub accept_estimated: bool,
    pub(crate) sources: SourceFilter,
    pub facets: Vec<String>,
    pub filters: BTreeMap<String, Vec<String>>,
    pub(crate) query: Option<FullTextQuery>,
    pub histogram: String,
}

impl QueryPlan {
    /// Scan boundaries for a file whose source timestamps may trail storage
    /// timestamps by up to `delta_ut`.
    pub fn timeframe(&self, delta_ut: u64) -> Timeframe {
        let anchor_start = (self.data_only && self.anchor.start_ut != 0).then_some(self.anchor.start_ut);
        let anchor_stop = (self.data_only && self.anchor.stop_ut != 0).then_some(self.anchor.stop_ut);

        let (start_ut, stop_ut) = match self.direction {
            Direction::Forward => (
                anchor_start.unwrap_or(self.after_ut),
                anchor_stop.unwrap_or(self.before_ut).saturating_add(delta_ut),
            ),
            Direction::Backward => (
                anchor_start.unwrap_or(self.before_ut).saturating_add(delta_ut),
                anchor_stop.unwrap_or(self.after_ut),
            ),
        };

        Timeframe {
            start_ut,
            stop_ut,
            stop_when_full: self.data_only && self.anchor.stop_ut == 0,
        }
    }

    /// Whether `file` belongs to this query's sources and may hold entries
    /// inside its window.
    pub fn selects(&self, file: &JournalFile) -> bool {
        self.sources.matches(file) && file.overlaps(self.after_ut, self.before_ut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journal_registry::DiscoveredMeta;

    const NOW: i64 = 1_700_000_000;

    fn plan(request: QueryRequest) -> QueryPlan {
        request.validate(NOW).unwrap()
    }

    #[test]
    fn empty_window_is_the_last_hour() {
        let plan = plan(QueryRequest::new());
        assert_eq!(plan.after_ut, (NOW - 3600) as u64 * USEC_PER_SEC);
        assert_eq!(plan.before_ut, NOW as u64 * USEC_PER_SEC + 999_999);
        assert_eq!(plan.entries, DEFAULT_ENTRIES);
        assert_eq!(plan.histogram, DEFAULT_HISTOGRAM_FIELD);
    }

    #[test]
    fn reversed_and_equal_windows_are_repaired() {
        let swapped = plan(QueryRequest::new().with_window(200, 100));
        assert_eq!(swapped.after_ut, 100 * USEC_PER_SEC);
        assert_eq!(swapped.before_ut, 200 * USEC_PER_SEC + 999_999);

        let widened = plan(QueryRequest::new().with_window(NOW, NOW));
        assert_eq!(widened.after_ut, (NOW - 3600) as u64 * USEC_PER_SEC);
    }

    #[test]
    fn relative_window() {
        let plan = plan(QueryRequest::new().with_window(-600, 0));
        assert_eq!(plan.after_ut, (NOW - 600) as u64 * USEC_PER_SEC);
        assert_eq!(plan.before_ut, NOW as u64 * USEC_PER_SEC + 999_999);
    }

    #[test]
    fn extreme_windows_do_not_overflow() {
        let err = QueryRequest::new().with_window(i64::MAX, 0).validate(NOW);
        assert!(matches!(err, Err(EngineError::InvalidRequest(_))));

        let far_past = plan(QueryRequest::new().with_window(i64::MIN, i64::MIN));
        assert_eq!(far_past.after_ut, 0);
        assert!(far_past.before_ut < USEC_PER_SEC);

        let last = plan(QueryRequest::new().with_window(1, MAX_WINDOW_S));
        assert_eq!(last.before_ut, MAX_WINDOW_S as u64 * USEC_PER_SEC + 999_999);
    }

    #[test]
    fn delta_and_tail_need_data_only() {
        let plan1 = plan(QueryRequest::new().with_delta().with_tail().with_if_modified_since(5));
        assert!(!plan1.delta);
        assert!(!plan1.tail);

        let plan2 = plan(QueryRequest::new().data_only().with_delta().with_tail());
        assert!(plan2.delta);
        assert!(!plan2.tail);
    }

    #[test]
    fn tail_anchor_becomes_the_stop_boundary() {
        let anchor = (NOW - 60) as u64 * USEC_PER_SEC;
        let plan = plan(
            QueryRequest::new()
                .with_direction(Direction::Forward)
                .with_anchor(anchor)
                .data_only()
                .with_tail()
                .with_if_modified_since(anchor),
        );

        assert_eq!(plan.direction, Direction::Backward);
        assert_eq!(plan.anchor, Anchor { start_ut: 0, stop_ut: anchor });

        let frame = plan.timeframe(10);
        assert_eq!(frame.start_ut, plan.before_ut + 10);
        assert_eq!(frame.stop_ut, anchor);
        assert!(!frame.stop_when_full);
    }

    #[test]
    fn anchor_outside_window_is_ignored() {
        let plan = plan(
            QueryRequest::new()
                .with_window(100, 200)
                .with_direction(Direction::Forward)
                .with_anchor(500 * USEC_PER_SEC),
        );
        assert!(!plan.anchor.is_set());
        assert_eq!(plan.direction, Direction::Backward);
    }

    #[test]
    fn timeframe_follows_direction() {
        let anchor = 150 * USEC_PER_SEC;
        let forward = plan(
            QueryRequest::new()
                .with_window(100, 200)
                .with_direction(Direction::Forward)
                .with_anchor(anchor)
                .data_only(),
        );
        let frame = forward.timeframe(7);
        assert_eq!(frame.start_ut, anchor);
        assert_eq!(frame.stop_ut, forward.before_ut + 7);
        assert!(frame.stop_when_full);

        // anchors only narrow data-only scans
        let full = plan(QueryRequest::new().with_window(100, 200).with_anchor(anchor));
        let frame = full.timeframe(7);
        assert_eq!(frame.start_ut, full.before_ut + 7);
        assert_eq!(frame.stop_ut, full.after_ut);
        assert!(!frame.stop_when_full);
    }

    #[test]
    fn anchor_sides() {
        let anchor = Anchor {
            start_ut: 100,
            stop_ut: 10,
        };
        assert!(anchor.contains(50, Direction::Backward));
        assert!(!anchor.contains(100, Direction::Backward));
        assert!(!anchor.contains(10, Direction::Backward));

        let forward = Anchor {
            start_ut: 10,
            stop_ut: 100,
        };
        assert!(forward.contains(50, Direction::Forward));
        assert!(!forward.contains(10, Direction::Forward));
    }

    #[test]
    fn full_text_query_words() {
        let query = FullTextQuery::parse(" error | !debug |").unwrap();
        assert!(query.matches_positive(b"An ERROR happened"));
        assert!(!query.matches_positive(b"all good"));
        assert!(query.matches_negative(b"Debug output"));

        assert!(FullTextQuery::parse(" | ! ").is_none());

        let literal = FullTextQuery::parse("a.b").unwrap();
        assert!(!literal.matches_positive(b"axb"));
    }

    #[test]
    fn source_filter_by_group_and_label() {
        let system = JournalFile::discovered(
            "/var/log/journal/m/system.journal",
            DiscoveredMeta::default(),
        );
        let remote = JournalFile::discovered(
            "/var/log/journal/remote/remote-web1.journal",
            DiscoveredMeta::default(),
        );

        let everything = SourceFilter::new(SourceType::empty(), &[]);
        assert!(everything.matches(&system) && everything.matches(&remote));

        let remotes = SourceFilter::new(SourceType::empty(), &[String::from("all-remote-systems")]);
        assert!(!remotes.matches(&system) && remotes.matches(&remote));

        let label = SourceFilter::new(SourceType::empty(), &[String::from("remote-web*")]);
        assert!(!label.matches(&system) && label.matches(&remote));

        let local = SourceFilter::new(SourceType::LOCAL_SYSTEM, &[]);
        assert!(local.matches(&system) && !local.matches(&remote));
    }

    #[test]
    fn invalid_field_names_are_rejected() {
        let err = QueryRequest::new().with_filter("", ["x"]).validate(NOW);
        assert!(matches!(err, Err(EngineError::InvalidRequest(_))));
    }
}
