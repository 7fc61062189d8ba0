//! Bounded set of result rows around a pagination anchor.

use crate::request::{Anchor, Direction};
use crate::result::ItemCounters;
use serde::Serialize;
use std::collections::BTreeMap;

/// A returned journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Row {
    /// Sort key: the entry timestamp, nudged to be unique within its file.
    pub timestamp_ut: u64,
    pub fields: BTreeMap<String, String>,
}

impl Row {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Keeps the `max` rows nearest to the anchor, in the query direction.
///
/// Rows are keyed by timestamp plus an insertion sequence, so rows from
/// different files with equal timestamps are all kept.
#[derive(Debug)]
pub(crate) struct RowKeeper {
    rows: BTreeMap<(u64, u64), Row>,
    seq: u64,
    max: usize,
    direction: Direction,
    anchor: Anchor,
}

impl RowKeeper {
    pub(crate) fn new(max: usize, direction: Direction, anchor: Anchor) -> Self {
        Self {
            rows: BTreeMap::new(),
            seq: 0,
            max,
            direction,
            anchor,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.rows.len() >= self.max
    }

    pub(crate) fn oldest(&self) -> Option<u64> {
        self.rows.keys().next().map(|(usec, _)| *usec)
    }

    pub(crate) fn newest(&self) -> Option<u64> {
        self.rows.keys().next_back().map(|(usec, _)| *usec)
    }

    pub(crate) fn within_anchor(&self, usec: u64) -> bool {
        self.anchor.contains(usec, self.direction)
    }

    /// Whether a row at `usec` could end up in the result.
    pub(crate) fn candidate_to_keep(&self, usec: u64) -> bool {
        if !self.is_full() {
            return true;
        }

        let displaces = match self.direction {
            Direction::Backward => self.oldest().is_some_and(|oldest| usec >= oldest),
            Direction::Forward => self.newest().is_some_and(|newest| usec <= newest),
        };

        displaces && self.within_anchor(usec)
    }

    /// Offer a matching row. Rows outside the anchor are ignored.
    pub(crate) fn offer(&mut self, row: Row, items: &mut ItemCounters) {
        let usec = row.timestamp_ut;
        if self.max == 0 || !self.within_anchor(usec) {
            return;
        }

        if self.is_full() {
            match self.direction {
                Direction::Backward => {
                    if self.oldest().is_some_and(|oldest| usec < oldest) {
                        items.skips_after += 1;
                        return;
                    }
                    self.rows.pop_first();
                }
                Direction::Forward => {
                    if self.newest().is_some_and(|newest| usec > newest) {
                        items.skips_before += 1;
                        return;
                    }
                    self.rows.pop_last();
                }
            }
            items.shifts += 1;
        }

        self.seq += 1;
        self.rows.insert((usec, self.seq), row);
    }

    /// Kept rows, newest first.
    pub(crate) fn into_rows(self) -> Vec<Row> {
        self.rows.into_values().rev().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(usec: u64) -> Row {
        Row {
            timestamp_ut: usec,
            fields: BTreeMap::new(),
        }
    }

    fn timestamps(keeper: RowKeeper) -> Vec<u64> {
        keeper.into_rows().iter().map(|r| r.timestamp_ut).collect()
    }

    #[test]
    fn backward_keeps_the_newest() {
        let mut items = ItemCounters::default();
        let mut keeper = RowKeeper::new(2, Direction::Backward, Anchor::default());

        for usec in [10, 30, 20, 5] {
            keeper.offer(row(usec), &mut items);
        }

        assert_eq!(timestamps(keeper), vec![30, 20]);
        assert_eq!(items.shifts, 1);
        assert_eq!(items.skips_after, 1);
    }

    #[test]
    fn forward_keeps_the_oldest() {
        let mut items = ItemCounters::default();
        let mut keeper = RowKeeper::new(2, Direction::Forward, Anchor::default());

        for usec in [10, 30, 20, 40] {
            keeper.offer(row(usec), &mut items);
        }

        assert_eq!(timestamps(keeper), vec![20, 10]);
        assert_eq!(items.shifts, 1);
        assert_eq!(items.skips_before, 1);
    }

    #[test]
    fn equal_timestamps_are_all_kept() {
        let mut items = ItemCounters::default();
        let mut keeper = RowKeeper::new(10, Direction::Backward, Anchor::default());
        keeper.offer(row(7), &mut items);
        keeper.offer(row(7), &mut items);
        assert_eq!(keeper.len(), 2);
    }

    #[test]
    fn rows_beyond_the_anchor_are_ignored() {
        let mut items = ItemCounters::default();
        let anchor = Anchor {
            start_ut: 100,
            stop_ut: 0,
        };
        let mut keeper = RowKeeper::new(10, Direction::Backward, anchor);

        keeper.offer(row(150), &mut items);
        keeper.offer(row(100), &mut items);
        keeper.offer(row(99), &mut items);

        assert_eq!(timestamps(keeper), vec![99]);
    }

    #[test]
    fn candidates() {
        let mut items = ItemCounters::default();
        let mut keeper = RowKeeper::new(2, Direction::Backward, Anchor::default());
        assert!(keeper.candidate_to_keep(1));

        keeper.offer(row(10), &mut items);
        assert!(keeper.candidate_to_keep(1));

        keeper.offer(row(20), &mut items);
        assert!(keeper.candidate_to_keep(15));
        assert!(keeper.candidate_to_keep(25));
        assert!(!keeper.candidate_to_keep(5));
    }
}
