// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!
Evaluating row selections.

The selection grammar here is deliberately small: lists and ranges of
integer IDs, a simple antenna/baseline language, and numeric ranges for time
and baseline length. Anything richer is evaluated by the caller and arrives
as a [`RowFilter`].

*/

use crate::config::{RowFilter, SplitConfig};
use crate::errors::{Result, SplitError};
use crate::table::{Dataset, VisTable};

fn bad(what: &'static str, expr: &str, reason: impl Into<String>) -> SplitError {
    SplitError::BadSelection {
        what,
        expr: expr.to_owned(),
        reason: reason.into(),
    }
}

fn parse_int(what: &'static str, expr: &str, text: &str) -> Result<i32> {
    text.trim()
        .parse()
        .map_err(|_| bad(what, expr, format!("\"{}\" is not an integer", text.trim())))
}

fn parse_float(what: &'static str, expr: &str, text: &str) -> Result<f64> {
    let v: f64 = text
        .trim()
        .parse()
        .map_err(|_| bad(what, expr, format!("\"{}\" is not a number", text.trim())))?;

    if v.is_nan() {
        return Err(bad(what, expr, "NaN is not a valid bound"));
    }

    Ok(v)
}

/// Inclusive ranges of integer IDs, such as `1,3~5`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IdRanges(Vec<(i32, i32)>);

impl IdRanges {
    /// Parse a range list. An empty expression gives None, meaning no
    /// restriction.
    pub fn parse(what: &'static str, expr: &str) -> Result<Option<Self>> {
        let mut ranges = Vec::new();

        for item in expr.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (lo, hi) = match item.split_once('~') {
                Some((a, b)) => (parse_int(what, expr, a)?, parse_int(what, expr, b)?),
                None => {
                    let v = parse_int(what, expr, item)?;
                    (v, v)
                }
            };

            if hi < lo {
                return Err(bad(what, expr, format!("range \"{item}\" is empty")));
            }

            ranges.push((lo, hi));
        }

        Ok(if ranges.is_empty() {
            None
        } else {
            Some(IdRanges(ranges))
        })
    }

    pub fn contains(&self, v: i32) -> bool {
        self.0.iter().any(|(lo, hi)| *lo <= v && v <= *hi)
    }
}

/// A closed interval of real numbers; either end may be infinite.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValueRange {
    pub lo: f64,
    pub hi: f64,
}

impl ValueRange {
    /// Parse `A~B`, `<B`, `>A`, or a single value.
    pub fn parse(what: &'static str, expr: &str) -> Result<Option<Self>> {
        let text = expr.trim();

        if text.is_empty() {
            return Ok(None);
        }

        let range = if let Some(rest) = text.strip_prefix('<') {
            ValueRange {
                lo: f64::NEG_INFINITY,
                hi: parse_float(what, expr, rest)?,
            }
        } else if let Some(rest) = text.strip_prefix('>') {
            ValueRange {
                lo: parse_float(what, expr, rest)?,
                hi: f64::INFINITY,
            }
        } else if let Some((a, b)) = text.split_once('~') {
            ValueRange {
                lo: parse_float(what, expr, a)?,
                hi: parse_float(what, expr, b)?,
            }
        } else {
            let v = parse_float(what, expr, text)?;
            ValueRange { lo: v, hi: v }
        };

        if range.hi < range.lo {
            return Err(bad(what, expr, "the range is empty"));
        }

        Ok(Some(range))
    }

    pub fn contains(&self, v: f64) -> bool {
        self.lo <= v && v <= self.hi
    }
}

/// An antenna and baseline selection.
///
/// Comma-separated terms: `A` keeps every baseline involving antenna A,
/// `A&B` keeps just that baseline, and `!A` drops every baseline involving
/// A. If there are only negated terms, everything else is kept.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AntennaSelection {
    antennas: Vec<i32>,
    baselines: Vec<(i32, i32)>,
    excluded: Vec<i32>,
}

impl AntennaSelection {
    pub fn parse(expr: &str) -> Result<Option<Self>> {
        let what = "antenna";
        let mut sel = AntennaSelection::default();

        for item in expr.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if let Some(rest) = item.strip_prefix('!') {
                sel.excluded.push(parse_int(what, expr, rest)?);
            } else if let Some((a, b)) = item.split_once('&') {
                let a = parse_int(what, expr, a)?;
                let b = parse_int(what, expr, b)?;
                sel.baselines.push((a.min(b), a.max(b)));
            } else {
                sel.antennas.push(parse_int(what, expr, item)?);
            }
        }

        if sel == AntennaSelection::default() {
            Ok(None)
        } else {
            Ok(Some(sel))
        }
    }

    pub fn matches(&self, ant1: i32, ant2: i32) -> bool {
        if self.excluded.contains(&ant1) || self.excluded.contains(&ant2) {
            return false;
        }

        if self.antennas.is_empty() && self.baselines.is_empty() {
            return true;
        }

        self.antennas.contains(&ant1)
            || self.antennas.contains(&ant2)
            || self.baselines.contains(&(ant1.min(ant2), ant1.max(ant2)))
    }
}

/// A fully parsed row selection.
#[derive(Clone, Debug, PartialEq)]
pub struct RowSelector {
    spws: Vec<i32>,
    fields: Option<IdRanges>,
    antenna: Option<AntennaSelection>,
    scans: Option<IdRanges>,
    arrays: Option<IdRanges>,
    states: Option<IdRanges>,
    uvrange: Option<ValueRange>,
    timerange: Option<ValueRange>,
    filter: Option<RowFilter>,
}

impl RowSelector {
    /// Parse every selection expression in `cfg`.
    pub fn new(cfg: &SplitConfig) -> Result<Self> {
        Ok(RowSelector {
            spws: cfg.spws.iter().map(|s| s.spw).collect(),
            fields: IdRanges::parse("field", &cfg.field)?,
            antenna: AntennaSelection::parse(&cfg.antenna)?,
            scans: IdRanges::parse("scan", &cfg.scan)?,
            arrays: IdRanges::parse("array", &cfg.array)?,
            states: IdRanges::parse("state", &cfg.state)?,
            uvrange: ValueRange::parse("uv range", &cfg.uvrange)?,
            timerange: ValueRange::parse("time range", &cfg.timerange)?,
            filter: cfg.row_filter.clone(),
        })
    }

    /// True if antennas are being selected, in which case the antenna
    /// subtables get filtered and antenna IDs relabeled.
    pub fn selects_antennas(&self) -> bool {
        self.antenna.is_some()
    }

    fn starting_mask(&self, n_rows: usize) -> Result<Vec<bool>> {
        match self.filter {
            None => Ok(vec![true; n_rows]),

            Some(RowFilter::Mask(ref m)) => {
                if m.len() != n_rows {
                    return Err(bad(
                        "row filter",
                        "mask",
                        format!("the mask has {} entries but the table has {} rows", m.len(), n_rows),
                    ));
                }

                Ok(m.clone())
            }

            Some(RowFilter::Rows(ref rows)) => {
                let mut mask = vec![false; n_rows];

                for r in rows {
                    match mask.get_mut(*r) {
                        Some(m) => *m = true,
                        None => {
                            return Err(bad(
                                "row filter",
                                "row list",
                                format!("row {r} is beyond the end of the table ({n_rows} rows)"),
                            ))
                        }
                    }
                }

                Ok(mask)
            }
        }
    }

    /// The input rows that survive every criterion, in ascending order.
    pub fn select<T: VisTable>(&self, input: &Dataset<T>) -> Result<Vec<usize>> {
        let main = &input.main;
        let n_rows = main.n_rows();
        let mut mask = self.starting_mask(n_rows)?;

        let mut restrict = |keep: &dyn Fn(usize) -> bool| {
            for (i, m) in mask.iter_mut().enumerate() {
                *m = *m && keep(i);
            }
        };

        if !self.spws.is_empty() {
            let dd_spw = input
                .subtable("DATA_DESCRIPTION")?
                .get_col_as_vec::<i32>("SPECTRAL_WINDOW_ID")?;

            for spw in &self.spws {
                if !dd_spw.contains(spw) {
                    return Err(bad(
                        "spectral window",
                        &spw.to_string(),
                        "no data description refers to this window",
                    ));
                }
            }

            let ddids = main.get_col_as_vec::<i32>("DATA_DESC_ID")?;

            for d in &ddids {
                if *d < 0 || *d as usize >= dd_spw.len() {
                    return inconsistent!("DATA_DESC_ID {} has no DATA_DESCRIPTION row", d);
                }
            }

            restrict(&|i| self.spws.contains(&dd_spw[ddids[i] as usize]));
        }

        if let Some(ref ants) = self.antenna {
            let a1 = main.get_col_as_vec::<i32>("ANTENNA1")?;
            let a2 = main.get_col_as_vec::<i32>("ANTENNA2")?;
            restrict(&|i| ants.matches(a1[i], a2[i]));
        }

        for (ranges, col_name) in [
            (&self.fields, "FIELD_ID"),
            (&self.scans, "SCAN_NUMBER"),
            (&self.arrays, "ARRAY_ID"),
            (&self.states, "STATE_ID"),
        ] {
            if let Some(ref r) = ranges {
                let vals = main.get_col_as_vec::<i32>(col_name)?;
                restrict(&|i| r.contains(vals[i]));
            }
        }

        if let Some(ref r) = self.timerange {
            let times = main.get_col_as_vec::<f64>("TIME")?;
            restrict(&|i| r.contains(times[i]));
        }

        if let Some(ref r) = self.uvrange {
            let uvw = main.get_col_as_vec::<Vec<f64>>("UVW")?;

            for (i, v) in uvw.iter().enumerate() {
                if v.len() < 2 {
                    return inconsistent!("UVW cell {} has {} elements", i, v.len());
                }
            }

            restrict(&|i| r.contains(uvw[i][0].hypot(uvw[i][1])));
        }

        Ok(mask
            .into_iter()
            .enumerate()
            .filter_map(|(i, keep)| if keep { Some(i) } else { None })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_spw_selection;
    use crate::testutil::{self, Row};

    #[test]
    fn id_ranges() {
        let r = IdRanges::parse("scan", "1, 3~5").unwrap().unwrap();
        assert!(r.contains(1));
        assert!(!r.contains(2));
        assert!(r.contains(5));
        assert_eq!(IdRanges::parse("scan", " ").unwrap(), None);
        assert!(IdRanges::parse("scan", "5~3").is_err());
        assert!(IdRanges::parse("scan", "a").is_err());

        let r = IdRanges::parse("field", "0~2000000000").unwrap().unwrap();
        assert!(r.contains(0));
        assert!(r.contains(1_999_999_999));
        assert!(!r.contains(-1));
    }

    #[test]
    fn value_ranges() {
        let r = ValueRange::parse("uv range", "10~20").unwrap().unwrap();
        assert!(r.contains(10.) && r.contains(20.) && !r.contains(20.5));
        let r = ValueRange::parse("uv range", "<5").unwrap().unwrap();
        assert!(r.contains(-1e9) && !r.contains(6.));
        let r = ValueRange::parse("uv range", ">5").unwrap().unwrap();
        assert!(r.contains(1e9) && !r.contains(4.));
        assert!(ValueRange::parse("uv range", "3~1").is_err());
        assert!(ValueRange::parse("uv range", "nan").is_err());
        assert_eq!(ValueRange::parse("uv range", "").unwrap(), None);
    }

    #[test]
    fn antenna_expressions() {
        let s = AntennaSelection::parse("1, 3&2").unwrap().unwrap();
        assert!(s.matches(0, 1));
        assert!(s.matches(2, 3));
        assert!(!s.matches(0, 2));

        let s = AntennaSelection::parse("!0").unwrap().unwrap();
        assert!(!s.matches(0, 1));
        assert!(s.matches(1, 2));

        assert_eq!(AntennaSelection::parse("").unwrap(), None);
        assert!(AntennaSelection::parse("1&x").is_err());
    }

    fn sample() -> Dataset<crate::table::MemTable> {
        let mut rows = Vec::new();

        for (i, (a1, a2)) in [(0, 1), (0, 2), (1, 2), (2, 3)].iter().enumerate() {
            let mut r = Row::new(*a1, *a2, (i % 2) as i32, i as f64);
            r.field = i as i32;
            r.scan = 1 + i as i32;
            r.uvw = [3. * i as f64, 4. * i as f64, 0.];
            rows.push(r);
        }

        testutil::dataset(&rows)
    }

    fn selected(cfg: &SplitConfig) -> Result<Vec<usize>> {
        RowSelector::new(cfg)?.select(&sample())
    }

    #[test]
    fn criteria() {
        assert_eq!(selected(&SplitConfig::default()).unwrap(), vec![0, 1, 2, 3]);

        let cfg = SplitConfig {
            spws: parse_spw_selection("1").unwrap(),
            ..SplitConfig::default()
        };
        assert_eq!(selected(&cfg).unwrap(), vec![1, 3]);

        let cfg = SplitConfig {
            field: "0,2".to_owned(),
            antenna: "!0".to_owned(),
            ..SplitConfig::default()
        };
        assert_eq!(selected(&cfg).unwrap(), vec![2]);

        let cfg = SplitConfig {
            scan: "2~4".to_owned(),
            uvrange: "<10".to_owned(),
            ..SplitConfig::default()
        };
        assert_eq!(selected(&cfg).unwrap(), vec![1, 2]);

        let cfg = SplitConfig {
            timerange: ">1.5".to_owned(),
            row_filter: Some(RowFilter::Rows(vec![0, 3])),
            ..SplitConfig::default()
        };
        assert_eq!(selected(&cfg).unwrap(), vec![3]);

        let cfg = SplitConfig {
            field: "1~2000000000".to_owned(),
            ..SplitConfig::default()
        };
        assert_eq!(selected(&cfg).unwrap(), vec![1, 2, 3]);

        let cfg = SplitConfig {
            row_filter: Some(RowFilter::Mask(vec![true, false, true, false])),
            ..SplitConfig::default()
        };
        assert_eq!(selected(&cfg).unwrap(), vec![0, 2]);
    }

    #[test]
    fn bad_requests() {
        let cfg = SplitConfig {
            spws: parse_spw_selection("7").unwrap(),
            ..SplitConfig::default()
        };
        assert!(matches!(
            selected(&cfg),
            Err(SplitError::BadSelection { what: "spectral window", .. })
        ));

        let cfg = SplitConfig {
            row_filter: Some(RowFilter::Mask(vec![true])),
            ..SplitConfig::default()
        };
        assert!(selected(&cfg).is_err());

        let cfg = SplitConfig {
            row_filter: Some(RowFilter::Rows(vec![4])),
            ..SplitConfig::default()
        };
        assert!(selected(&cfg).is_err());

        let cfg = SplitConfig {
            scan: "x".to_owned(),
            ..SplitConfig::default()
        };
        assert!(RowSelector::new(&cfg).is_err());

        let cfg = SplitConfig {
            field: "3~1".to_owned(),
            ..SplitConfig::default()
        };
        assert!(matches!(
            RowSelector::new(&cfg),
            Err(SplitError::BadSelection { what: "field", .. })
        ));
    }
}
