// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!
Grouping rows into time bins and, within each bin, into slots.

A *bin* is a window of time of fixed width. A *slot* within a bin collects
the rows that share an antenna pair, spectral window, field, scan, and state;
each slot becomes exactly one averaged output row. The number of output rows
is therefore known as soon as the rows have been assigned, before any output
storage is allocated.

*/

use std::collections::BTreeMap;

use crate::errors::{Result, SplitError};

/// The identity of an averaged output row within a time bin.
///
/// All components are dense indices. `spw` is the dense data-description
/// index, which identifies the spectral window together with its
/// polarization setup. The derived ordering puts `state` slowest and
/// `antenna2` fastest, which is the order in which a bin's output rows are
/// written.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SlotKey {
    pub state: usize,
    pub scan: usize,
    pub field: usize,
    pub spw: usize,
    pub antenna1: usize,
    pub antenna2: usize,
}

impl SlotKey {
    pub fn new(
        antenna1: usize,
        antenna2: usize,
        spw: usize,
        field: usize,
        scan: usize,
        state: usize,
    ) -> Self {
        SlotKey {
            state,
            scan,
            field,
            spw,
            antenna1,
            antenna2,
        }
    }
}

impl From<(usize, usize, usize, usize, usize, usize)> for SlotKey {
    fn from(t: (usize, usize, usize, usize, usize, usize)) -> Self {
        SlotKey::new(t.0, t.1, t.2, t.3, t.4, t.5)
    }
}

impl From<SlotKey> for (usize, usize, usize, usize, usize, usize) {
    fn from(k: SlotKey) -> Self {
        (k.antenna1, k.antenna2, k.spw, k.field, k.scan, k.state)
    }
}

/// Per-row inputs to the binner, indexed by row number.
#[derive(Clone, Copy, Debug)]
pub struct BinningInput<'a> {
    pub times: &'a [f64],
    pub intervals: &'a [f64],
    pub row_flags: &'a [bool],
    pub keys: &'a [SlotKey],
}

/// One time bin: its representative time and its slots.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeBin {
    pub time: f64,
    pub slots: BTreeMap<SlotKey, Vec<usize>>,
}

/// The outcome of assigning rows to bins and slots.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BinAssignment {
    bins: Vec<TimeBin>,
    n_output_rows: usize,
}

impl BinAssignment {
    /// The number of averaged rows this assignment will produce.
    pub fn n_output_rows(&self) -> usize {
        self.n_output_rows
    }

    pub fn n_bins(&self) -> usize {
        self.bins.len()
    }

    pub fn bins(&self) -> &[TimeBin] {
        &self.bins[..]
    }

    /// Consume the assignment bin by bin, so that each bin's slot map is
    /// released once it has been processed.
    pub fn into_bins(self) -> impl Iterator<Item = TimeBin> {
        self.bins.into_iter()
    }
}

/// Assigns rows to fixed-width time bins.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeBinner {
    width: f64,
}

impl TimeBinner {
    pub fn new(width: f64) -> Result<Self> {
        if !(width.is_finite() && width > 0.) {
            return Err(SplitError::InvalidBinWidth(width));
        }

        Ok(TimeBinner { width })
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    /// Assign `rows` to bins.
    ///
    /// Rows are visited in time order; rows whose row flag is set are
    /// skipped entirely. The first bin starts at the leading edge of the
    /// first usable row's integration. A row whose timestamp reaches the end
    /// of the current bin closes it and starts the next one at its own
    /// leading edge, so empty bins never arise. A closed bin's time is the
    /// midpoint between its start and the trailing edge of its last row.
    pub fn assign(&self, input: &BinningInput, rows: &[usize]) -> BinAssignment {
        let mut order: Vec<usize> = rows
            .iter()
            .copied()
            .filter(|r| !input.row_flags[*r])
            .collect();
        order.sort_by(|a, b| input.times[*a].total_cmp(&input.times[*b]));

        let mut result = BinAssignment::default();
        let mut iter = order.into_iter();

        let first = match iter.next() {
            Some(r) => r,
            None => return result,
        };

        let leading_edge = |r: usize| input.times[r] - 0.5 * input.intervals[r];
        let trailing_edge = |r: usize| input.times[r] + 0.5 * input.intervals[r];

        let mut start = leading_edge(first);
        let mut last = first;
        let mut slots: BTreeMap<SlotKey, Vec<usize>> = BTreeMap::new();
        slots.entry(input.keys[first]).or_default().push(first);

        for row in iter {
            if input.times[row] >= start + self.width {
                result.n_output_rows += slots.len();
                result.bins.push(TimeBin {
                    time: 0.5 * (start + trailing_edge(last)),
                    slots: std::mem::take(&mut slots),
                });
                start = leading_edge(row);
            }

            slots.entry(input.keys[row]).or_default().push(row);
            last = row;
        }

        result.n_output_rows += slots.len();
        result.bins.push(TimeBin {
            time: 0.5 * (start + trailing_edge(last)),
            slots,
        });

        result
    }
}
