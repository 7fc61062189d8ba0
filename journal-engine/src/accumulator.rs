//! Per-query accumulation of rows, facets and the histogram.

use crate::facets::{FACET_VALUE_UNSET, FacetCounter, FacetCounts, JOURNAL_FILE_FIELD};
use crate::histogram::{Histogram, HistogramResult};
use crate::request::{FullTextQuery, QueryPlan};
use crate::result::ItemCounters;
use crate::rows::{Row, RowKeeper};
use std::collections::BTreeMap;

pub(crate) const SOURCE_REALTIME_FIELD: &str = "_SOURCE_REALTIME_TIMESTAMP";

/// What a query accumulated, ready for the result.
pub(crate) struct Accumulated {
    pub(crate) rows: Vec<Row>,
    pub(crate) facets: Vec<FacetCounts>,
    pub(crate) histogram: HistogramResult,
    pub(crate) items: ItemCounters,
}

pub(crate) struct Accumulator {
    after_ut: u64,
    before_ut: u64,
    data_only: bool,
    query: Option<FullTextQuery>,
    facets: FacetCounter,
    histogram: Histogram,
    rows: RowKeeper,
    items: ItemCounters,

    fields: BTreeMap<String, String>,
    fts_positive: bool,
    fts_negative: bool,
    histogram_value: Option<String>,
    source_realtime_ut: Option<u64>,
}

impl Accumulator {
    pub(crate) fn new(plan: &QueryPlan) -> Self {
        Self {
            after_ut: plan.after_ut,
            before_ut: plan.before_ut,
            data_only: plan.data_only,
            query: plan.query.clone(),
            facets: FacetCounter::new(&plan.facets, &plan.filters),
            histogram: Histogram::new(&plan.histogram, plan.after_ut, plan.before_ut),
            rows: RowKeeper::new(plan.entries, plan.direction, plan.anchor),
            items: ItemCounters {
                max_to_return: plan.entries as u64,
                ..Default::default()
            },
            fields: BTreeMap::new(),
            fts_positive: false,
            fts_negative: false,
            histogram_value: None,
            source_realtime_ut: None,
        }
    }

    pub(crate) fn rows(&self) -> &RowKeeper {
        &self.rows
    }

    pub(crate) fn facets(&self) -> &FacetCounter {
        &self.facets
    }

    pub(crate) fn facets_mut(&mut self) -> &mut FacetCounter {
        &mut self.facets
    }

    pub(crate) fn histogram_slots(&self) -> usize {
        self.histogram.slots()
    }

    pub(crate) fn begin_row(&mut self) {
        self.facets.begin_row();
        self.fields.clear();
        self.fts_positive = false;
        self.fts_negative = false;
        self.histogram_value = None;
        self.source_realtime_ut = None;
    }

    pub(crate) fn add_field(&mut self, name: &str, value: &[u8]) {
        self.facets.add_field(name, value);

        if name != JOURNAL_FILE_FIELD {
            if let Some(query) = &self.query {
                if !self.fts_positive && query.matches_positive(value) {
                    self.fts_positive = true;
                }
                if !self.fts_negative && query.matches_negative(value) {
                    self.fts_negative = true;
                }
            }
        }

        if self.source_realtime_ut.is_none() && name == SOURCE_REALTIME_FIELD {
            self.source_realtime_ut = std::str::from_utf8(value)
                .ok()
                .and_then(|v| v.trim().parse().ok());
        }

        if self.histogram_value.is_none() && name == self.histogram.field() {
            self.histogram_value = Some(String::from_utf8_lossy(value).into_owned());
        }

        if !self.fields.contains_key(name) {
            self.fields
                .insert(String::from(name), String::from_utf8_lossy(value).into_owned());
        }
    }

    /// `_SOURCE_REALTIME_TIMESTAMP` of the current row.
    pub(crate) fn source_realtime_ut(&self) -> Option<u64> {
        self.source_realtime_ut
    }

    fn full_text_matches(&self) -> bool {
        match &self.query {
            None => true,
            Some(query) => !self.fts_negative && (!query.has_positive() || self.fts_positive),
        }
    }

    /// Finish a fully parsed row timestamped `usec` and sorted at `sort_ut`.
    /// The two differ only when equal timestamps were spread apart. Returns
    /// whether it matched every filter.
    pub(crate) fn finish_row(&mut self, usec: u64, sort_ut: u64) -> bool {
        self.items.evaluated += 1;

        if usec < self.after_ut || usec > self.before_ut {
            return false;
        }
        if !self.full_text_matches() {
            return false;
        }
        if self.data_only && !self.rows.within_anchor(sort_ut) {
            return false;
        }

        if !self.facets.finish_row() {
            return false;
        }

        let value = self.histogram_value.as_deref().unwrap_or(FACET_VALUE_UNSET);
        self.histogram.count(value, usec);
        self.items.matched += 1;

        let row = Row {
            timestamp_ut: sort_ut,
            fields: std::mem::take(&mut self.fields),
        };
        self.rows.offer(row, &mut self.items);

        true
    }

    /// Account for a row that sampling skipped.
    pub(crate) fn unsampled(&mut self, usec: u64) {
        self.items.unsampled += 1;
        self.histogram.count_unsampled(usec);
    }

    /// Account for `count` rows estimated between `from_ut` and `to_ut`.
    pub(crate) fn estimated(&mut self, from_ut: u64, to_ut: u64, count: u64) {
        self.items.estimated += count;
        self.histogram.estimate(from_ut, to_ut, count);
    }

    pub(crate) fn finish(self) -> Accumulated {
        let mut items = self.items;
        items.returned = self.rows.len() as u64;

        Accumulated {
            rows: self.rows.into_rows(),
            facets: self.facets.result(),
            histogram: self.histogram.result(),
            items,
        }
    }
}
