// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!
Configuration of a split operation.

A [`SplitConfig`] is built once by the caller, either directly or from
command-line arguments via [`ClapSplitArgsExt`], and passed by reference to
everything that needs it.

*/

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::str::FromStr;

use crate::average::ChannelReducer;
use crate::errors::{Result, SplitError};

/// The visibility data columns that can be carried into the output.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DataColumn {
    Data,
    ModelData,
    CorrectedData,

    /// Real-valued samples, as written by single-dish and autocorrelation
    /// backends.
    FloatData,
}

impl DataColumn {
    pub fn col_name(self) -> &'static str {
        match self {
            DataColumn::Data => "DATA",
            DataColumn::ModelData => "MODEL_DATA",
            DataColumn::CorrectedData => "CORRECTED_DATA",
            DataColumn::FloatData => "FLOAT_DATA",
        }
    }

    /// True if the column holds real rather than complex samples.
    pub fn is_float(self) -> bool {
        self == DataColumn::FloatData
    }

    /// The complex-valued columns; this is what `ALL` means.
    pub fn all() -> [DataColumn; 3] {
        [DataColumn::Data, DataColumn::ModelData, DataColumn::CorrectedData]
    }

    /// Every kind of data column, real-valued ones included.
    pub fn every() -> [DataColumn; 4] {
        [
            DataColumn::Data,
            DataColumn::ModelData,
            DataColumn::CorrectedData,
            DataColumn::FloatData,
        ]
    }

    /// The column that holds this data in the output when it is the only
    /// data column carried over.
    pub fn lone_output(self) -> DataColumn {
        if self.is_float() {
            DataColumn::FloatData
        } else {
            DataColumn::Data
        }
    }
}

impl FromStr for DataColumn {
    type Err = SplitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_ref() {
            "DATA" | "OBSERVED" => Ok(DataColumn::Data),
            "MODEL" | "MODEL_DATA" => Ok(DataColumn::ModelData),
            "CORRECTED" | "CORRECTED_DATA" => Ok(DataColumn::CorrectedData),
            "FLOAT" | "FLOAT_DATA" => Ok(DataColumn::FloatData),
            _ => Err(SplitError::BadDataColumn(s.to_owned())),
        }
    }
}

/// Parse a comma-separated list of data column names.
///
/// `ALL` stands for the three complex-valued columns. Duplicates are dropped, keeping the
/// first mention. An empty list means `DATA`.
pub fn parse_data_columns(spec: &str) -> Result<Vec<DataColumn>> {
    let mut cols = Vec::new();

    for token in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let new: Vec<DataColumn> = if token.eq_ignore_ascii_case("ALL") {
            DataColumn::all().to_vec()
        } else {
            vec![token.parse()?]
        };

        for c in new {
            if !cols.contains(&c) {
                cols.push(c);
            }
        }
    }

    if cols.is_empty() {
        cols.push(DataColumn::Data);
    }

    Ok(cols)
}

/// A channel selection for one spectral window.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChannelSelection {
    pub start: usize,
    /// The number of output channels; None means as many as fit.
    pub nchan: Option<usize>,
    pub step: usize,
    /// Average each group of `step` channels rather than picking one.
    pub average: bool,
}

impl ChannelSelection {
    /// Every channel, unchanged.
    pub fn all() -> Self {
        ChannelSelection {
            start: 0,
            nchan: None,
            step: 1,
            average: false,
        }
    }

    /// Average every `width` channels together.
    pub fn averaging(width: usize) -> Self {
        ChannelSelection {
            start: 0,
            nchan: None,
            step: width,
            average: true,
        }
    }

    /// Resolve against a window of `available` channels.
    pub fn reducer(&self, spw: i32, available: usize) -> Result<ChannelReducer> {
        let step = self.step.max(1);

        let nchan = match self.nchan {
            Some(n) => n,
            None if self.start >= available => 0,
            None if self.average => (available - self.start) / step,
            None => (available - self.start + step - 1) / step,
        };

        let r = ChannelReducer {
            start: self.start,
            nchan,
            step: self.step,
            average: self.average,
        };

        r.validate(spw, available)?;
        Ok(r)
    }
}

impl Default for ChannelSelection {
    fn default() -> Self {
        ChannelSelection::all()
    }
}

/// A selected spectral window and, optionally, its channels.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SpwSelection {
    pub spw: i32,
    pub channels: Option<ChannelSelection>,
}

fn bad_spw(expr: &str, reason: impl Into<String>) -> SplitError {
    SplitError::BadSelection {
        what: "spectral window",
        expr: expr.to_owned(),
        reason: reason.into(),
    }
}

fn parse_num<T: FromStr>(expr: &str, text: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| bad_spw(expr, format!("\"{text}\" is not a valid number")))
}

/// Parse a spectral window selection such as `0,2:5~20,3:0~63^4`.
///
/// Each item is a window number, optionally followed by an inclusive
/// channel range, optionally followed by `^WIDTH` to average groups of
/// `WIDTH` channels.
pub fn parse_spw_selection(expr: &str) -> Result<Vec<SpwSelection>> {
    let mut sels = Vec::new();

    for item in expr.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (spw_text, chan_text) = match item.split_once(':') {
            Some((a, b)) => (a, Some(b)),
            None => (item, None),
        };

        let spw: i32 = parse_num(expr, spw_text)?;

        if spw < 0 {
            return Err(bad_spw(expr, "window numbers cannot be negative"));
        }

        let channels = match chan_text {
            None => None,
            Some(text) => {
                let (range, width) = match text.split_once('^') {
                    Some((r, w)) => (r, parse_num::<usize>(expr, w)?),
                    None => (text, 1),
                };

                let (first, last) = match range.split_once('~') {
                    Some((a, b)) => (parse_num::<usize>(expr, a)?, parse_num::<usize>(expr, b)?),
                    None => {
                        let c = parse_num::<usize>(expr, range)?;
                        (c, c)
                    }
                };

                if last < first || width == 0 {
                    return Err(bad_spw(expr, format!("empty channel range \"{text}\"")));
                }

                Some(ChannelSelection {
                    start: first,
                    nchan: Some((last + 1 - first) / width),
                    step: width,
                    average: width > 1,
                })
            }
        };

        sels.push(SpwSelection { spw, channels });
    }

    Ok(sels)
}

/// The outcome of a row predicate evaluated outside of this crate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RowFilter {
    /// One entry per input row; true means keep.
    Mask(Vec<bool>),

    /// The input rows to keep.
    Rows(Vec<usize>),
}

/// Everything that defines a split operation.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitConfig {
    /// Spectral windows to keep; empty means all.
    pub spws: Vec<SpwSelection>,

    /// Channel selection for windows that do not specify their own.
    pub default_channels: ChannelSelection,

    /// Field ID ranges, e.g. `0,3~5`; empty means all.
    pub field: String,

    /// Antenna and baseline selection, e.g. `1,2,5`, `3&4`, `!7`.
    pub antenna: String,

    /// Scan number ranges, e.g. `1,3~5`.
    pub scan: String,

    /// Array (subarray) ranges.
    pub array: String,

    /// State (observing intent) ID ranges.
    pub state: String,

    /// Range of projected baseline lengths in metres, e.g. `0~1000`, `>50`.
    pub uvrange: String,

    /// Time range in the units of the TIME column, e.g. `T0~T1`, `<T`.
    pub timerange: String,

    /// Result of any free-form query the caller evaluated.
    pub row_filter: Option<RowFilter>,

    /// Derived polarization products to form, e.g. `I,V` or `RR,LL`.
    pub correlation: Option<String>,

    /// Time-averaging bin width in seconds; zero or less disables time
    /// averaging.
    pub time_bin: f64,

    pub data_columns: Vec<DataColumn>,

    /// Flag every sample of rows whose FLAG_ROW is set.
    pub propagate_row_flags: bool,

    /// Working memory budget in bytes; None means total system memory.
    pub memory_limit: Option<u64>,
}

impl Default for SplitConfig {
    fn default() -> Self {
        SplitConfig {
            spws: Vec::new(),
            default_channels: ChannelSelection::all(),
            field: String::new(),
            antenna: String::new(),
            scan: String::new(),
            array: String::new(),
            state: String::new(),
            uvrange: String::new(),
            timerange: String::new(),
            row_filter: None,
            correlation: None,
            time_bin: 0.,
            data_columns: vec![DataColumn::Data],
            propagate_row_flags: true,
            memory_limit: None,
        }
    }
}

impl SplitConfig {
    pub fn time_averaging(&self) -> bool {
        self.time_bin > 0.
    }

    /// The channel selection that applies to spectral window `spw`.
    pub fn channels_for(&self, spw: i32) -> ChannelSelection {
        self.spws
            .iter()
            .find(|s| s.spw == spw)
            .and_then(|s| s.channels)
            .unwrap_or(self.default_channels)
    }

    /// Build a configuration from arguments added by
    /// [`ClapSplitArgsExt::msplit_split_args`].
    pub fn from_matches(m: &ArgMatches) -> Result<Self> {
        let text = |name: &str| m.get_one::<String>(name).cloned().unwrap_or_default();

        let mut cfg = SplitConfig {
            spws: parse_spw_selection(&text("spw"))?,
            field: text("field"),
            antenna: text("antenna"),
            scan: text("scan"),
            array: text("array"),
            state: text("state"),
            uvrange: text("uvrange"),
            timerange: text("timerange"),
            correlation: m.get_one::<String>("correlation").cloned(),
            time_bin: m.get_one::<f64>("timebin").copied().unwrap_or(0.),
            data_columns: parse_data_columns(&text("datacolumn"))?,
            propagate_row_flags: !m.get_flag("keep_row_flags_local"),
            memory_limit: m.get_one::<u64>("memory_limit").copied(),
            ..SplitConfig::default()
        };

        if let Some(w) = m.get_one::<usize>("width").copied() {
            if w > 1 {
                cfg.default_channels = ChannelSelection::averaging(w);
            }
        }

        Ok(cfg)
    }
}

/// An extension trait for adding the split options to a clap Command.
pub trait ClapSplitArgsExt {
    fn msplit_split_args(self) -> Self;
}

impl ClapSplitArgsExt for Command {
    fn msplit_split_args(self) -> Self {
        self.arg(
            Arg::new("spw")
                .long("spw")
                .value_name("SPWS")
                .help("Spectral windows and channels to keep, e.g. \"0,2:5~20^2\""),
        )
        .arg(
            Arg::new("field")
                .long("field")
                .value_name("IDS")
                .help("Field IDs to keep, e.g. \"0,3~5\""),
        )
        .arg(
            Arg::new("antenna")
                .long("antenna")
                .value_name("EXPR")
                .help("Antennas or baselines to keep, e.g. \"1,2\", \"3&4\", \"!7\""),
        )
        .arg(
            Arg::new("scan")
                .long("scan")
                .value_name("RANGES")
                .help("Scan numbers to keep, e.g. \"1,3~5\""),
        )
        .arg(
            Arg::new("array")
                .long("array")
                .value_name("RANGES")
                .help("Array IDs to keep"),
        )
        .arg(
            Arg::new("state")
                .long("state")
                .value_name("RANGES")
                .help("State (intent) IDs to keep"),
        )
        .arg(
            Arg::new("uvrange")
                .long("uvrange")
                .value_name("RANGE")
                .help("Projected baseline lengths to keep, in metres, e.g. \"0~1000\" or \">50\""),
        )
        .arg(
            Arg::new("timerange")
                .long("timerange")
                .value_name("RANGE")
                .help("Times to keep, in the units of the TIME column"),
        )
        .arg(
            Arg::new("correlation")
                .long("correlation")
                .value_name("PRODUCTS")
                .help("Polarization products to form, e.g. \"I,V\" or \"RR,LL\""),
        )
        .arg(
            Arg::new("timebin")
                .long("timebin")
                .value_name("SECONDS")
                .help("Time averaging interval; 0 disables time averaging")
                .value_parser(clap::value_parser!(f64))
                .default_value("0"),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .value_name("NCHAN")
                .help("Average this many channels together in every window")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("datacolumn")
                .long("datacolumn")
                .value_name("COLUMNS")
                .help("Data columns to carry over: DATA, MODEL, CORRECTED, FLOAT, or ALL")
                .default_value("DATA"),
        )
        .arg(
            Arg::new("keep_row_flags_local")
                .long("keep-row-flags-local")
                .help("Do not copy row flags down to the per-sample flags")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("memory_limit")
                .long("memory-limit")
                .value_name("BYTES")
                .help("Working memory budget; defaults to the system total")
                .value_parser(clap::value_parser!(u64)),
        )
    }
}
