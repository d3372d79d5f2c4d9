// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!
Dense renumbering of categorical identifiers.

After a selection, the surviving antennas, fields, spectral windows, and so
on are renumbered `0..N` in ascending order of their original values. The
output dataset uses these dense indices everywhere, and its subtables are
rewritten in the same order, so the two stay consistent.

*/

use std::fmt;

use crate::errors::{Result, SplitError};

/// The kinds of categorical identifiers that get renumbered.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Category {
    Antenna,
    SpectralWindow,
    DataDescription,
    Polarization,
    Field,
    Scan,
    State,
    Observation,
    Processor,
    Array,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Category::Antenna => "antenna",
            Category::SpectralWindow => "spectral window",
            Category::DataDescription => "data description",
            Category::Polarization => "polarization setup",
            Category::Field => "field",
            Category::Scan => "scan",
            Category::State => "state",
            Category::Observation => "observation",
            Category::Processor => "processor",
            Category::Array => "array",
        })
    }
}

/// A frozen, monotonic mapping from raw identifiers to dense indices.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexRemapper {
    category: Category,
    values: Vec<i32>,
}

impl IndexRemapper {
    /// Build a mapping covering the distinct values in `raw`.
    ///
    /// An empty input gives an empty mapping, which maps nothing.
    pub fn build<I: IntoIterator<Item = i32>>(category: Category, raw: I) -> Self {
        let mut values: Vec<i32> = raw.into_iter().collect();
        values.sort_unstable();
        values.dedup();
        IndexRemapper { category, values }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The raw values, in dense-index order.
    pub fn values(&self) -> &[i32] {
        &self.values[..]
    }

    /// The raw value with the given dense index.
    pub fn raw_value(&self, dense: usize) -> Option<i32> {
        self.values.get(dense).copied()
    }

    pub fn contains(&self, raw: i32) -> bool {
        self.values.binary_search(&raw).is_ok()
    }

    fn unmapped(&self, raw: i32) -> SplitError {
        SplitError::UnmappedValue {
            category: self.category,
            value: raw,
        }
    }

    /// Find the dense index of `raw`.
    ///
    /// The search gallops outward from `hint` and then bisects, so it is
    /// cheapest when `hint` is the answer or close to it, as happens when
    /// consecutive rows carry the same or neighboring values. Any hint gives
    /// the same result; an out-of-range hint starts from the middle.
    pub fn remap(&self, raw: i32, hint: usize) -> Result<usize> {
        let vals = &self.values[..];
        let n = vals.len();

        if n == 0 {
            return Err(self.unmapped(raw));
        }

        let hint = if hint < n { hint } else { n / 2 };
        let here = vals[hint];

        if here == raw {
            return Ok(hint);
        }

        let (lo, hi) = if here < raw {
            let mut lo = hint + 1;
            let mut step = 1;
            let mut bound = hint + 1;

            while bound < n && vals[bound] < raw {
                lo = bound + 1;
                step *= 2;
                bound = hint + step;
            }

            (lo, usize::min(bound + 1, n))
        } else {
            let mut hi = hint;
            let mut step = 1;

            let lo = loop {
                if step > hint {
                    break 0;
                }

                let bound = hint - step;

                if vals[bound] > raw {
                    hi = bound;
                    step *= 2;
                } else {
                    break bound;
                }
            };

            (lo, hi)
        };

        if lo >= hi {
            return Err(self.unmapped(raw));
        }

        match vals[lo..hi].binary_search(&raw) {
            Ok(i) => Ok(lo + i),
            Err(_) => Err(self.unmapped(raw)),
        }
    }

    /// Relabel a whole column of raw values.
    pub fn remap_all(&self, raw: &[i32]) -> Result<Vec<i32>> {
        let mut hint = 0;
        let mut out = Vec::with_capacity(raw.len());

        for v in raw {
            hint = self.remap(*v, hint)?;
            out.push(hint as i32);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn basics() {
        let m = IndexRemapper::build(Category::Field, vec![7, 3, 3, 12, 7]);
        assert_eq!(m.values(), &[3, 7, 12]);
        assert_eq!(m.remap(12, 0).unwrap(), 2);
        assert_eq!(m.remap(3, 2).unwrap(), 0);
        assert_eq!(m.remap(7, 1000).unwrap(), 1);
        assert_eq!(
            m.remap(5, 1),
            Err(SplitError::UnmappedValue {
                category: Category::Field,
                value: 5
            })
        );
        assert!(m.remap(-1, 0).is_err());
        assert!(m.remap(13, 2).is_err());
        assert_eq!(m.remap_all(&[12, 12, 3, 7]).unwrap(), vec![2, 2, 0, 1]);
    }

    #[test]
    fn empty_maps_nothing() {
        let m = IndexRemapper::build(Category::State, Vec::new());
        assert!(m.is_empty());
        assert!(m.remap(0, 0).is_err());
    }

    proptest! {
        #[test]
        fn dense_and_monotonic(raw in prop::collection::vec(-50i32..500, 1..60)) {
            let m = IndexRemapper::build(Category::Antenna, raw.iter().copied());

            for w in m.values().windows(2) {
                prop_assert!(w[0] < w[1]);
            }

            for &a in &raw {
                let da = m.remap(a, 0).unwrap();
                prop_assert!(da < m.len());
                prop_assert_eq!(m.raw_value(da), Some(a));

                for &b in &raw {
                    if a < b {
                        prop_assert!(da < m.remap(b, 0).unwrap());
                    }
                }
            }
        }

        #[test]
        fn hint_does_not_matter(
            raw in prop::collection::vec(-50i32..500, 1..60),
            probe in -60i32..510,
            hint in 0usize..80,
        ) {
            let m = IndexRemapper::build(Category::Scan, raw.iter().copied());
            let expected = m.values().binary_search(&probe).ok();
            prop_assert_eq!(m.remap(probe, hint).ok(), expected);
        }
    }
}
