//! Time histogram of matching rows.
//!
//! Bars are aligned to a width picked from a fixed list of human-friendly
//! durations. Each bar counts rows per value of one field, plus the rows
//! that sampling skipped or estimated.

use journal_common::time::USEC_PER_SEC;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

const MIN_BARS: u64 = 150;
pub const MAX_BARS: usize = 1000;

pub const UNSAMPLED_LABEL: &str = "[unsampled]";
pub const ESTIMATED_LABEL: &str = "[estimated]";

fn bar_width_s(duration_s: u64) -> u64 {
    const MINUTE: Duration = Duration::from_secs(60);
    const HOUR: Duration = Duration::from_secs(60 * MINUTE.as_secs());
    const DAY: Duration = Duration::from_secs(24 * HOUR.as_secs());

    const VALID_DURATIONS: &[Duration] = &[
        // Seconds
        Duration::from_secs(1),
        Duration::from_secs(2),
        Duration::from_secs(5),
        Duration::from_secs(10),
        Duration::from_secs(15),
        Duration::from_secs(30),
        // Minutes
        MINUTE,
        Duration::from_secs(2 * MINUTE.as_secs()),
        Duration::from_secs(3 * MINUTE.as_secs()),
        Duration::from_secs(5 * MINUTE.as_secs()),
        Duration::from_secs(10 * MINUTE.as_secs()),
        Duration::from_secs(15 * MINUTE.as_secs()),
        Duration::from_secs(30 * MINUTE.as_secs()),
        // Hours
        HOUR,
        Duration::from_secs(2 * HOUR.as_secs()),
        Duration::from_secs(6 * HOUR.as_secs()),
        Duration::from_secs(8 * HOUR.as_secs()),
        Duration::from_secs(12 * HOUR.as_secs()),
        // Days
        DAY,
        Duration::from_secs(2 * DAY.as_secs()),
        Duration::from_secs(3 * DAY.as_secs()),
        Duration::from_secs(5 * DAY.as_secs()),
        Duration::from_secs(7 * DAY.as_secs()),
        Duration::from_secs(14 * DAY.as_secs()),
        Duration::from_secs(30 * DAY.as_secs()),
    ];

    VALID_DURATIONS
        .iter()
        .rev()
        .map(Duration::as_secs)
        .find(|&width| duration_s / width >= MIN_BARS)
        .unwrap_or(1)
}

/// One bar: counts in the order of [`HistogramResult::labels`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistogramBar {
    pub start_ut: u64,
    pub counts: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistogramResult {
    pub field: String,
    pub after_ut: u64,
    pub before_ut: u64,
    pub width_ut: u64,
    pub labels: Vec<String>,
    pub bars: Vec<HistogramBar>,
}

impl HistogramResult {
    /// Total over all bars of the label `label`.
    pub fn total(&self, label: &str) -> u64 {
        self.labels
            .iter()
            .position(|l| l == label)
            .map_or(0, |idx| self.bars.iter().map(|bar| bar.counts[idx]).sum())
    }
}

#[derive(Debug)]
pub(crate) struct Histogram {
    field: String,
    after_ut: u64,
    before_ut: u64,
    width_ut: u64,
    slots: usize,
    values: BTreeMap<String, Vec<u64>>,
    unsampled: Vec<u64>,
    estimated: Vec<u64>,
}

impl Histogram {
    pub(crate) fn new(field: &str, after_ut: u64, before_ut: u64) -> Self {
        let after_s = after_ut / USEC_PER_SEC;
        let before_s = before_ut / USEC_PER_SEC;

        let mut width_s = bar_width_s(before_s.saturating_sub(after_s));
        let after_s = after_s - after_s % width_s;
        let before_s = before_s - before_s % width_s + width_s;

        let mut slots = ((before_s - after_s) / width_s + 1) as usize;
        if slots > MAX_BARS {
            slots = MAX_BARS;
            width_s = (before_s - after_s).div_ceil(MAX_BARS as u64);
        }

        Self {
            field: String::from(field),
            after_ut: after_s * USEC_PER_SEC,
            before_ut: before_s * USEC_PER_SEC,
            width_ut: width_s * USEC_PER_SEC,
            slots,
            values: BTreeMap::new(),
            unsampled: vec![0; slots],
            estimated: vec![0; slots],
        }
    }

    pub(crate) fn field(&self) -> &str {
        &self.field
    }

    pub(crate) fn slots(&self) -> usize {
        self.slots
    }

    fn slot_of(&self, usec: u64) -> usize {
        let usec = usec.clamp(self.after_ut, self.before_ut);
        (((usec - self.after_ut) / self.width_ut) as usize).min(self.slots - 1)
    }

    fn slot_start(&self, slot: usize) -> u64 {
        self.after_ut + slot as u64 * self.width_ut
    }

    pub(crate) fn count(&mut self, value: &str, usec: u64) {
        let slot = self.slot_of(usec);
        let slots = self.slots;
        self.values
            .entry(String::from(value))
            .or_insert_with(|| vec![0; slots])[slot] += 1;
    }

    pub(crate) fn count_unsampled(&mut self, usec: u64) {
        let slot = self.slot_of(usec);
        self.unsampled[slot] += 1;
    }

    /// Spread `count` rows over the bars overlapping `[from_ut, to_ut]`,
    /// proportionally to the overlap.
    pub(crate) fn estimate(&mut self, from_ut: u64, to_ut: u64, count: u64) {
        if count == 0 {
            return;
        }

        let lo = from_ut.min(to_ut).clamp(self.after_ut, self.before_ut);
        let hi = from_ut.max(to_ut).clamp(self.after_ut, self.before_ut);
        let total_ut = hi - lo;

        if total_ut == 0 {
            let slot = self.slot_of(lo);
            self.estimated[slot] += count;
            return;
        }

        let first = self.slot_of(lo);
        let last = self.slot_of(hi);
        let mut assigned = 0;

        for slot in first..=last {
            let start = self.slot_start(slot).max(lo);
            let end = (self.slot_start(slot) + self.width_ut).min(hi);
            let overlap = end.saturating_sub(start);

            let share = (count as u128 * overlap as u128 / total_ut as u128) as u64;
            self.estimated[slot] += share;
            assigned += share;
        }

        self.estimated[last] += count.saturating_sub(assigned);
    }

    pub(crate) fn result(&self) -> HistogramResult {
        let mut labels: Vec<String> = self.values.keys().cloned().collect();
        labels.push(String::from(UNSAMPLED_LABEL));
        labels.push(String::from(ESTIMATED_LABEL));

        let bars = (0..self.slots)
            .map(|slot| {
                let mut counts: Vec<u64> = self.values.values().map(|v| v[slot]).collect();
                counts.push(self.unsampled[slot]);
                counts.push(self.estimated[slot]);
                HistogramBar {
                    start_ut: self.slot_start(slot),
                    counts,
                }
            })
            .collect();

        HistogramResult {
            field: self.field.clone(),
            after_ut: self.after_ut,
            before_ut: self.before_ut,
            width_ut: self.width_ut,
            labels,
            bars,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const S: u64 = USEC_PER_SEC;

    #[test]
    fn picks_the_largest_width_with_enough_bars() {
        assert_eq!(bar_width_s(3600), 15);
        assert_eq!(bar_width_s(86_400), 300);
        assert_eq!(bar_width_s(60), 1);
        assert_eq!(bar_width_s(0), 1);
    }

    #[test]
    fn bars_are_aligned_to_the_width() {
        let histogram = Histogram::new("PRIORITY", 1_000 * S + 7, 4_600 * S + 999_999);
        assert_eq!(histogram.width_ut, 15 * S);
        assert_eq!(histogram.after_ut, 990 * S);
        assert_eq!(histogram.before_ut, 4_605 * S);
        assert_eq!(histogram.slots(), 242);
    }

    #[test]
    fn bar_count_is_capped() {
        // a century needs more than the maximum number of 30 day bars
        let histogram = Histogram::new("PRIORITY", 0, 100 * 365 * 86_400 * S);
        assert_eq!(histogram.slots(), MAX_BARS);
        assert!(histogram.width_ut * MAX_BARS as u64 >= histogram.before_ut - histogram.after_ut);
    }

    #[test]
    fn counts_per_value_and_unsampled() {
        let mut histogram = Histogram::new("PRIORITY", 0, 3_600 * S);
        histogram.count("3", 10 * S);
        histogram.count("3", 11 * S);
        histogram.count("6", 100 * S);
        histogram.count_unsampled(200 * S);
        // out of range rows land in the edge bars
        histogram.count("6", 10_000 * S);

        let result = histogram.result();
        assert_eq!(result.labels, vec!["3", "6", UNSAMPLED_LABEL, ESTIMATED_LABEL]);
        assert_eq!(result.total("3"), 2);
        assert_eq!(result.total("6"), 2);
        assert_eq!(result.total(UNSAMPLED_LABEL), 1);
        assert_eq!(result.bars[0].counts[0], 2);
        assert_eq!(result.bars[result.bars.len() - 1].counts[1], 1);
    }

    #[test]
    fn estimates_are_spread_and_conserved() {
        let mut histogram = Histogram::new("PRIORITY", 0, 3_600 * S);
        histogram.estimate(30 * S, 0, 100);
        histogram.estimate(45 * S, 45 * S, 7);

        let result = histogram.result();
        assert_eq!(result.total(ESTIMATED_LABEL), 107);

        let estimated = |slot: usize| result.bars[slot].counts[1];
        assert_eq!(estimated(0), 50);
        assert_eq!(estimated(1), 50);
        assert_eq!(estimated(3), 7);
    }

    proptest! {
        #[test]
        fn estimates_are_never_lost(
            from_s in 0u64..100_000,
            to_s in 0u64..100_000,
            count in 0u64..1_000_000,
        ) {
            let mut histogram = Histogram::new("PRIORITY", 10_000 * S, 50_000 * S);
            histogram.estimate(from_s * S, to_s * S, count);
            prop_assert_eq!(histogram.result().total(ESTIMATED_LABEL), count);
        }
    }
}
