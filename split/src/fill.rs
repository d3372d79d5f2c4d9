// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!
Selecting, relabeling, and averaging: the driver.

A split runs in three steps, each consuming the previous one:

```rust,ignore
let out = Splitter::new(&input, &config)
    .select(nb)?   // which rows survive
    .shape(nb)?    // dense indices, output layout, strategy, row count
    .fill(nb)?;    // the output dataset
```

Every check that can reject the request happens in the first two steps.
Rows are processed one data description at a time: for each, the sample
cubes are read, flags are pushed through the flag planes, derived
polarization products are formed, and channels are reduced, giving a
[`SampleChunk`]. Chunks are then either copied out row for row or
time-averaged slot by slot.

*/

use msplit_core::ndarray::{Array1, Array2, Array3, Axis};
use msplit_core::notify::NotificationBackend;
use msplit_core::{check_shape, rn_note, rn_warning, Complex, Vis};
use msplit_visdata::{CorrPositionMap, CorrelationSelection, FlagMapper, VisPol};
use std::collections::HashMap;
use std::fmt;
use sysinfo::{MemoryRefreshKind, System};

use crate::average::{average_slot, ChannelReducer, SampleChunk};
use crate::config::{DataColumn, SplitConfig};
use crate::errors::{Result, SplitError};
use crate::remap::{Category, IndexRemapper};
use crate::select::RowSelector;
use crate::slots::{BinAssignment, BinningInput, SlotKey, TimeBinner};
use crate::subtables::{
    copy_table, filter_and_relabel, rewrite_data_descriptions, rewrite_polarizations,
    rewrite_spectral_windows, select_rows,
};
use crate::table::{CellData, Dataset, TableError, VisTable};

/// Headroom applied to the working-memory estimate.
const MEMORY_SAFETY_FACTOR: f64 = 1.3;

/// Used when the amount of system memory cannot be determined.
const FALLBACK_MEMORY_BYTES: u64 = 16 * 1024 * 1024 * 1024;

/// Columns that are dropped from the output because nothing here keeps
/// them consistent with the rewritten samples.
const DROPPED_COLUMNS: &[&str] = &["SIGMA_SPECTRUM", "FLAG_CATEGORY"];

/// How the output rows get produced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Strategy {
    /// One output row per selected input row.
    Copy,

    /// Time averaging with every selected row in memory at once.
    TimeAverage,

    /// Time averaging one data description at a time.
    StreamingTimeAverage,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Strategy::Copy => "copy",
            Strategy::TimeAverage => "time averaging",
            Strategy::StreamingTimeAverage => "streaming time averaging",
        })
    }
}

/// Total system memory in bytes.
fn system_memory() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory_specifics(MemoryRefreshKind::everything());

    match sys.total_memory() {
        0 => FALLBACK_MEMORY_BYTES,
        n => n,
    }
}

fn read_or<T: VisTable, C: CellData>(table: &T, col_name: &str, default: C) -> Result<Vec<C>> {
    if table.has_column(col_name) {
        Ok(table.get_col_as_vec(col_name)?)
    } else {
        Ok(vec![default; table.n_rows()])
    }
}

/// Read `[corr, chan]` cells of `rows` into a `[corr, chan, row]` cube.
fn read_cube<T, E>(table: &T, col_name: &str, rows: &[usize], shape: (usize, usize)) -> Result<Array3<E>>
where
    T: VisTable,
    E: Clone + Default,
    Array2<E>: CellData,
{
    let mut cube = Array3::from_elem((shape.0, shape.1, rows.len()), E::default());

    for (i, r) in rows.iter().enumerate() {
        let cell = table.get_cell::<Array2<E>>(col_name, *r)?;
        check_shape(col_name, &[shape.0, shape.1], cell.shape())?;
        cube.index_axis_mut(Axis(2), i).assign(&cell);
    }

    Ok(cube)
}

/// The scalar main-table columns, read in bulk.
#[derive(Clone, Debug, Default)]
struct MainColumns {
    antenna1: Vec<i32>,
    antenna2: Vec<i32>,
    ddid: Vec<i32>,
    field: Vec<i32>,
    scan: Vec<i32>,
    state: Vec<i32>,
    observation: Vec<i32>,
    processor: Vec<i32>,
    array: Vec<i32>,
    feed1: Vec<i32>,
    feed2: Vec<i32>,
    time: Vec<f64>,
    interval: Vec<f64>,
    exposure: Vec<f64>,
    time_centroid: Vec<f64>,
    uvw: Vec<Vec<f64>>,
    flag_row: Vec<bool>,
}

impl MainColumns {
    fn read<T: VisTable>(t: &T) -> Result<Self> {
        let time: Vec<f64> = t.get_col_as_vec("TIME")?;
        let interval: Vec<f64> = t.get_col_as_vec("INTERVAL")?;

        let exposure = if t.has_column("EXPOSURE") {
            t.get_col_as_vec("EXPOSURE")?
        } else {
            interval.clone()
        };

        let time_centroid = if t.has_column("TIME_CENTROID") {
            t.get_col_as_vec("TIME_CENTROID")?
        } else {
            time.clone()
        };

        Ok(MainColumns {
            antenna1: t.get_col_as_vec("ANTENNA1")?,
            antenna2: t.get_col_as_vec("ANTENNA2")?,
            ddid: t.get_col_as_vec("DATA_DESC_ID")?,
            field: t.get_col_as_vec("FIELD_ID")?,
            scan: t.get_col_as_vec("SCAN_NUMBER")?,
            state: read_or(t, "STATE_ID", -1)?,
            observation: read_or(t, "OBSERVATION_ID", 0)?,
            processor: read_or(t, "PROCESSOR_ID", -1)?,
            array: read_or(t, "ARRAY_ID", 0)?,
            feed1: read_or(t, "FEED1", 0)?,
            feed2: read_or(t, "FEED2", 0)?,
            time,
            interval,
            exposure,
            time_centroid,
            uvw: t.get_col_as_vec("UVW")?,
            flag_row: t.get_col_as_vec("FLAG_ROW")?,
        })
    }
}

/// The dense renumbering of every category.
///
/// State, observation, and processor IDs may be negative to mean "not
/// applicable"; those maps only cover the non-negative values, and negative
/// values pass through unchanged.
#[derive(Clone, Debug)]
pub struct Remappers {
    pub antenna: IndexRemapper,
    pub ddid: IndexRemapper,
    pub spw: IndexRemapper,
    pub pol: IndexRemapper,
    pub field: IndexRemapper,
    pub scan: IndexRemapper,
    pub state: IndexRemapper,
    pub observation: IndexRemapper,
    pub processor: IndexRemapper,
    pub array: IndexRemapper,
}

fn relabel_optional(map: &IndexRemapper, raw: i32) -> Result<i32> {
    if raw < 0 {
        Ok(raw)
    } else {
        Ok(map.remap(raw, 0)? as i32)
    }
}

/// A dense index for slot keys; every negative value shares one index
/// past the end.
fn slot_index(map: &IndexRemapper, raw: i32) -> Result<usize> {
    if raw < 0 {
        Ok(map.len())
    } else {
        map.remap(raw, 0)
    }
}

/// Everything needed to process the rows of one data description.
#[derive(Clone, Debug)]
struct DdidPlan {
    ddid: i32,
    n_corr: usize,
    n_chan: usize,
    selection: CorrelationSelection,
    reducer: ChannelReducer,
    rows: Vec<usize>,
}

impl DdidPlan {
    fn output_shape(&self) -> (usize, usize) {
        (self.selection.len(), self.reducer.nchan)
    }
}

#[derive(Debug, Default)]
enum Binning {
    #[default]
    None,
    Single(BinAssignment),
    PerDescription(Vec<BinAssignment>),
}

/// The output main-table columns, built in memory and stored at the end.
#[derive(Clone, Debug, Default)]
struct OutputRows {
    antenna1: Vec<i32>,
    antenna2: Vec<i32>,
    ddid: Vec<i32>,
    field: Vec<i32>,
    scan: Vec<i32>,
    state: Vec<i32>,
    observation: Vec<i32>,
    processor: Vec<i32>,
    array: Vec<i32>,
    feed1: Vec<i32>,
    feed2: Vec<i32>,
    time: Vec<f64>,
    interval: Vec<f64>,
    exposure: Vec<f64>,
    time_centroid: Vec<f64>,
    uvw: Vec<Vec<f64>>,
    flag_row: Vec<bool>,
    data: Vec<Vec<Array2<Vis>>>,
    flag: Vec<Array2<bool>>,
    weight: Vec<Vec<f32>>,
    sigma: Vec<Vec<f32>>,
    weight_spectrum: Option<Vec<Array2<f32>>>,
}

fn put_if_present<T: VisTable, C: CellData>(table: &mut T, col_name: &str, values: Vec<C>) -> Result<()> {
    if table.has_column(col_name) {
        table.put_column(col_name, values)?;
    }

    Ok(())
}

impl OutputRows {
    fn new(n: usize, n_data_cols: usize, weight_spectrum: bool) -> Self {
        OutputRows {
            antenna1: vec![0; n],
            antenna2: vec![0; n],
            ddid: vec![0; n],
            field: vec![0; n],
            scan: vec![0; n],
            state: vec![0; n],
            observation: vec![0; n],
            processor: vec![0; n],
            array: vec![0; n],
            feed1: vec![0; n],
            feed2: vec![0; n],
            time: vec![0.; n],
            interval: vec![0.; n],
            exposure: vec![0.; n],
            time_centroid: vec![0.; n],
            uvw: vec![Vec::new(); n],
            flag_row: vec![false; n],
            data: vec![vec![Array2::default((0, 0)); n]; n_data_cols],
            flag: vec![Array2::default((0, 0)); n],
            weight: vec![Vec::new(); n],
            sigma: vec![Vec::new(); n],
            weight_spectrum: if weight_spectrum {
                Some(vec![Array2::default((0, 0)); n])
            } else {
                None
            },
        }
    }

    fn store<T: VisTable>(self, table: &mut T, data_cols: &[DataColumn]) -> Result<()> {
        put_if_present(table, "ANTENNA1", self.antenna1)?;
        put_if_present(table, "ANTENNA2", self.antenna2)?;
        put_if_present(table, "DATA_DESC_ID", self.ddid)?;
        put_if_present(table, "FIELD_ID", self.field)?;
        put_if_present(table, "SCAN_NUMBER", self.scan)?;
        put_if_present(table, "STATE_ID", self.state)?;
        put_if_present(table, "OBSERVATION_ID", self.observation)?;
        put_if_present(table, "PROCESSOR_ID", self.processor)?;
        put_if_present(table, "ARRAY_ID", self.array)?;
        put_if_present(table, "FEED1", self.feed1)?;
        put_if_present(table, "FEED2", self.feed2)?;
        put_if_present(table, "TIME", self.time)?;
        put_if_present(table, "INTERVAL", self.interval)?;
        put_if_present(table, "EXPOSURE", self.exposure)?;
        put_if_present(table, "TIME_CENTROID", self.time_centroid)?;
        put_if_present(table, "UVW", self.uvw)?;
        put_if_present(table, "FLAG_ROW", self.flag_row)?;
        put_if_present(table, "FLAG", self.flag)?;
        put_if_present(table, "WEIGHT", self.weight)?;
        put_if_present(table, "SIGMA", self.sigma)?;

        if let Some(ws) = self.weight_spectrum {
            put_if_present(table, "WEIGHT_SPECTRUM", ws)?;
        }

        for (dc, values) in data_cols.iter().zip(self.data) {
            if dc.is_float() {
                let reals: Vec<Array2<f32>> = values.into_iter().map(|a| a.mapv(|v| v.re)).collect();
                table.put_column(dc.col_name(), reals)?;
            } else {
                table.put_column(dc.col_name(), values)?;
            }
        }

        Ok(())
    }
}

fn sigma_from_weight(w: f32) -> f32 {
    if w > 0. {
        1. / w.sqrt()
    } else {
        0.
    }
}

/// A split that has not yet looked at any data.
#[derive(Debug)]
pub struct Splitter<'a, T: VisTable> {
    input: &'a Dataset<T>,
    config: &'a SplitConfig,
}

impl<'a, T: VisTable> Splitter<'a, T> {
    pub fn new(input: &'a Dataset<T>, config: &'a SplitConfig) -> Self {
        Splitter { input, config }
    }

    /// Evaluate the row selection.
    pub fn select(self, nb: &mut dyn NotificationBackend) -> Result<SelectedSplit<'a, T>> {
        let selector = RowSelector::new(self.config)?;
        let rows = selector.select(self.input)?;

        rn_note!(
            nb,
            "{} out of {} rows are going to be considered due to the selection criteria.",
            rows.len(),
            self.input.main.n_rows()
        );

        if rows.is_empty() {
            return Err(SplitError::EmptySelection);
        }

        let cols = MainColumns::read(&self.input.main)?;

        Ok(SelectedSplit {
            input: self.input,
            config: self.config,
            relabel_antennas: selector.selects_antennas(),
            rows,
            cols,
        })
    }
}

/// A split whose input rows are known.
#[derive(Debug)]
pub struct SelectedSplit<'a, T: VisTable> {
    input: &'a Dataset<T>,
    config: &'a SplitConfig,
    relabel_antennas: bool,
    rows: Vec<usize>,
    cols: MainColumns,
}

impl<'a, T: VisTable> SelectedSplit<'a, T> {
    /// The selected input rows, in ascending order.
    pub fn rows(&self) -> &[usize] {
        &self.rows[..]
    }

    fn build_remappers(&self, dd_spw: &[i32], dd_pol: &[i32]) -> Result<Remappers> {
        let c = &self.cols;
        let selected = |v: &[i32]| self.rows.iter().map(|r| v[*r]).collect::<Vec<i32>>();
        let non_negative = |v: &[i32]| {
            self.rows
                .iter()
                .map(|r| v[*r])
                .filter(|x| *x >= 0)
                .collect::<Vec<i32>>()
        };

        let ddid = IndexRemapper::build(Category::DataDescription, selected(&c.ddid[..]));

        for d in ddid.values() {
            if *d < 0 || *d as usize >= dd_spw.len() {
                return inconsistent!("DATA_DESC_ID {} has no DATA_DESCRIPTION row", d);
            }
        }

        let spw = IndexRemapper::build(
            Category::SpectralWindow,
            ddid.values().iter().map(|d| dd_spw[*d as usize]),
        );
        let pol = IndexRemapper::build(
            Category::Polarization,
            ddid.values().iter().map(|d| dd_pol[*d as usize]),
        );

        let mut ants = selected(&c.antenna1[..]);
        ants.extend(selected(&c.antenna2[..]));

        Ok(Remappers {
            antenna: IndexRemapper::build(Category::Antenna, ants),
            ddid,
            spw,
            pol,
            field: IndexRemapper::build(Category::Field, selected(&c.field[..])),
            scan: IndexRemapper::build(Category::Scan, selected(&c.scan[..])),
            state: IndexRemapper::build(Category::State, non_negative(&c.state[..])),
            observation: IndexRemapper::build(Category::Observation, non_negative(&c.observation[..])),
            processor: IndexRemapper::build(Category::Processor, non_negative(&c.processor[..])),
            array: IndexRemapper::build(Category::Array, selected(&c.array[..])),
        })
    }

    /// Work out the output layout and processing strategy.
    pub fn shape(self, nb: &mut dyn NotificationBackend) -> Result<ShapedSplit<'a, T>> {
        let input = self.input;
        let cfg = self.config;

        for dc in &cfg.data_columns {
            if !input.main.has_column(dc.col_name()) {
                return Err(TableError::NoSuchColumn(dc.col_name().to_owned()).into());
            }
        }

        let has_weight_spectrum = input.main.has_column("WEIGHT_SPECTRUM");

        let dd_table = input.subtable("DATA_DESCRIPTION")?;
        let dd_spw = dd_table.get_col_as_vec::<i32>("SPECTRAL_WINDOW_ID")?;
        let dd_pol = dd_table.get_col_as_vec::<i32>("POLARIZATION_ID")?;
        let maps = self.build_remappers(&dd_spw, &dd_pol)?;

        // Channel reductions, by dense spectral window.

        let num_chan = input
            .subtable("SPECTRAL_WINDOW")?
            .get_col_as_vec::<i32>("NUM_CHAN")?;
        let mut reducers = Vec::with_capacity(maps.spw.len());
        let mut n_chan_in = Vec::with_capacity(maps.spw.len());

        for raw in maps.spw.values() {
            let n = match num_chan.get(*raw as usize) {
                Some(n) if *raw >= 0 && *n >= 0 => *n as usize,
                _ => return inconsistent!("spectral window {} has no usable SPECTRAL_WINDOW row", raw),
            };

            reducers.push(cfg.channels_for(*raw).reducer(*raw, n)?);
            n_chan_in.push(n);
        }

        // Correlation selections, by dense polarization setup.

        let corr_types = input
            .subtable("POLARIZATION")?
            .get_col_as_vec::<Vec<i32>>("CORR_TYPE")?;
        let mut selections = Vec::with_capacity(maps.pol.len());

        for raw in maps.pol.values() {
            let codes = match corr_types.get(*raw as usize) {
                Some(c) if *raw >= 0 => c,
                _ => return inconsistent!("polarization setup {} has no POLARIZATION row", raw),
            };

            let map = CorrPositionMap::from_corr_types(codes)?;

            let sel = match cfg.correlation {
                Some(ref expr) => {
                    let sel = CorrelationSelection::resolve(expr, &map)?;
                    let labels: Vec<&str> = sel.recipes().iter().map(|r| r.label.as_str()).collect();
                    rn_note!(
                        nb,
                        "polarization setup {} ({}): forming {}",
                        raw,
                        map,
                        labels.join(", ")
                    );
                    sel
                }
                None => CorrelationSelection::all(&map),
            };

            selections.push((map.n_corr(), sel));
        }

        // Per-description plans.

        let mut per_dd: Vec<Vec<usize>> = vec![Vec::new(); maps.ddid.len()];
        let mut hint = 0;

        for r in &self.rows {
            hint = maps.ddid.remap(self.cols.ddid[*r], hint)?;
            per_dd[hint].push(*r);
        }

        let mut plans = Vec::with_capacity(maps.ddid.len());

        for (raw, rows) in maps.ddid.values().iter().zip(per_dd) {
            let s = maps.spw.remap(dd_spw[*raw as usize], 0)?;
            let p = maps.pol.remap(dd_pol[*raw as usize], 0)?;

            plans.push(DdidPlan {
                ddid: *raw,
                n_corr: selections[p].0,
                n_chan: n_chan_in[s],
                selection: selections[p].1.clone(),
                reducer: reducers[s],
                rows,
            });
        }

        let pol_products: Vec<Vec<VisPol>> = selections.iter().map(|(_, s)| s.products()).collect();

        // Strategy and output size.

        let n_data_cols = cfg.data_columns.len();
        let bytes_per_sample = (8 * n_data_cols + 1 + if has_weight_spectrum { 4 } else { 0 }) as u64;

        let (strategy, binning, n_output_rows) = if !cfg.time_averaging() {
            (Strategy::Copy, Binning::None, self.rows.len())
        } else {
            let shapes: Vec<(usize, usize)> = plans.iter().map(|p| p.output_shape()).collect();

            if shapes.windows(2).any(|w| w[0] != w[1]) {
                let desc: Vec<String> = plans
                    .iter()
                    .map(|p| {
                        let (nc, nf) = p.output_shape();
                        format!("data description {}: {}x{}", p.ddid, nc, nf)
                    })
                    .collect();

                return Err(SplitError::UnsupportedShape {
                    shapes: desc.join(", "),
                });
            }

            let binner = TimeBinner::new(cfg.time_bin)?;
            let mut keys = vec![SlotKey::default(); input.main.n_rows()];

            for (d, plan) in plans.iter().enumerate() {
                for r in &plan.rows {
                    let c = &self.cols;
                    keys[*r] = SlotKey::new(
                        maps.antenna.remap(c.antenna1[*r], 0)?,
                        maps.antenna.remap(c.antenna2[*r], 0)?,
                        d,
                        maps.field.remap(c.field[*r], 0)?,
                        maps.scan.remap(c.scan[*r], 0)?,
                        slot_index(&maps.state, c.state[*r])?,
                    );
                }
            }

            let binput = BinningInput {
                times: &self.cols.time,
                intervals: &self.cols.interval,
                row_flags: &self.cols.flag_row,
                keys: &keys,
            };

            let n_flagged = self.rows.iter().filter(|r| self.cols.flag_row[**r]).count();

            if n_flagged > 0 {
                rn_note!(
                    nb,
                    "{} selected rows are flagged and will not contribute to the time averages",
                    n_flagged
                );
            }

            let single = binner.assign(&binput, &self.rows);
            let n_out = single.n_output_rows();

            let input_samples: u64 = plans
                .iter()
                .map(|p| (p.rows.len() * p.n_corr * p.n_chan) as u64)
                .sum();
            let (oc, of) = shapes[0];
            let output_samples = (n_out * oc * of) as u64;
            let estimate = ((input_samples + output_samples) * bytes_per_sample) as f64;
            let budget = cfg.memory_limit.unwrap_or_else(system_memory);

            if estimate * MEMORY_SAFETY_FACTOR > budget as f64 {
                rn_note!(
                    nb,
                    "averaging needs about {:.0} MiB but only {:.0} MiB are available; \
                     processing one data description at a time",
                    estimate / 1048576.,
                    budget as f64 / 1048576.
                );

                let each: Vec<BinAssignment> = plans
                    .iter()
                    .map(|p| binner.assign(&binput, &p.rows))
                    .collect();
                let n = each.iter().map(|a| a.n_output_rows()).sum();
                (Strategy::StreamingTimeAverage, Binning::PerDescription(each), n)
            } else {
                (Strategy::TimeAverage, Binning::Single(single), n_out)
            }
        };

        if n_output_rows == 0 {
            rn_warning!(nb, "every selected row is flagged; the output will have no rows");
        }

        Ok(ShapedSplit {
            input,
            config: cfg,
            relabel_antennas: self.relabel_antennas,
            rows: self.rows,
            cols: self.cols,
            maps,
            plans,
            spw_reducers: reducers,
            pol_products,
            strategy,
            binning,
            n_output_rows,
            has_weight_spectrum,
        })
    }
}

/// A split whose output layout is fully determined.
#[derive(Debug)]
pub struct ShapedSplit<'a, T: VisTable> {
    input: &'a Dataset<T>,
    config: &'a SplitConfig,
    relabel_antennas: bool,
    rows: Vec<usize>,
    cols: MainColumns,
    maps: Remappers,
    plans: Vec<DdidPlan>,
    spw_reducers: Vec<ChannelReducer>,
    pol_products: Vec<Vec<VisPol>>,
    strategy: Strategy,
    binning: Binning,
    n_output_rows: usize,
    has_weight_spectrum: bool,
}

impl<'a, T: VisTable> ShapedSplit<'a, T> {
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// The exact number of rows the output main table will have.
    pub fn n_output_rows(&self) -> usize {
        self.n_output_rows
    }

    pub fn remappers(&self) -> &Remappers {
        &self.maps
    }

    /// The output columns to write samples to. A lone column goes to DATA,
    /// or FLOAT_DATA if it is real-valued.
    fn output_data_columns(&self) -> Vec<DataColumn> {
        match self.config.data_columns[..] {
            [only] => vec![only.lone_output()],
            ref cols => cols.to_vec(),
        }
    }

    /// Read and process the samples of one data description.
    ///
    /// Returns the chunk and the number of samples newly flagged because
    /// their row was flagged.
    fn prepare_chunk(&self, plan: &DdidPlan) -> Result<(SampleChunk, usize)> {
        let main = &self.input.main;
        let rows = &plan.rows[..];
        let n = rows.len();
        let shape = (plan.n_corr, plan.n_chan);

        // Flags, through the original, common, and private planes.

        let original = read_cube::<_, bool>(main, "FLAG", rows, shape)?;
        let original_row: Array1<bool> = rows.iter().map(|r| self.cols.flag_row[*r]).collect();
        let mut common = original.clone();
        let mut common_row = original_row.clone();
        let mut private = Array3::from_elem(original.dim(), false);
        let mut private_row = Array1::from_elem(n, false);

        let (flags, row_flags) = {
            let mut fm = FlagMapper::new(&plan.selection, common.view_mut(), common_row.view_mut())?
                .with_original(original.view(), original_row.view())?
                .with_private(private.view_mut(), private_row.view_mut())?;

            if self.config.propagate_row_flags {
                for i in 0..n {
                    if fm.get_original_row_flag(i) {
                        fm.apply_flag_in_row(i, true);
                    }
                }
            }

            let row_flags: Vec<bool> = (0..n).map(|i| fm.get_row_flag(i)).collect();
            (fm.combined_cube(), row_flags)
        };

        let n_newly_flagged = private
            .iter()
            .zip(original.iter())
            .filter(|(p, o)| **p && !**o)
            .count();

        // Samples and weights, in terms of the output products.

        let mut data = Vec::with_capacity(self.config.data_columns.len());

        for dc in &self.config.data_columns {
            let cube = if dc.is_float() {
                read_cube::<_, f32>(main, dc.col_name(), rows, shape)?.mapv(|x| Complex::new(x, 0.))
            } else {
                read_cube::<_, Vis>(main, dc.col_name(), rows, shape)?
            };

            data.push(plan.selection.bind(cube.view(), None)?.derived_cube());
        }

        let weights_in = rows
            .iter()
            .map(|r| main.get_cell::<Vec<f32>>("WEIGHT", *r))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for w in &weights_in {
            check_shape("WEIGHT", &[plan.n_corr], &[w.len()])?;
        }

        let recipes = plan.selection.recipes();
        let n_prod = recipes.len();

        let weights = Array2::from_shape_fn((n_prod, n), |(p, i)| {
            recipes[p].apply_weights(|c| weights_in[i][c])
        });

        let weight_spectrum = if self.has_weight_spectrum {
            let ws = read_cube::<_, f32>(main, "WEIGHT_SPECTRUM", rows, shape)?;
            Some(Array3::from_shape_fn((n_prod, plan.n_chan, n), |(p, ch, i)| {
                recipes[p].apply_weights(|c| ws[[c, ch, i]])
            }))
        } else {
            None
        };

        // Channel reduction.

        let (data, flags, weight_spectrum) = if plan.reducer.is_trivial(plan.n_chan) {
            (data, flags, weight_spectrum)
        } else {
            let ws = weight_spectrum
                .map(|ws| plan.reducer.reduce_weight_spectrum(ws.view(), flags.view()));

            let reduced: Vec<(Array3<Vis>, Array3<bool>)> = data
                .iter()
                .map(|d| plan.reducer.reduce_samples(d.view(), flags.view()))
                .collect();

            let new_flags = match reduced.first() {
                Some((_, f)) => f.clone(),
                None => Array3::from_elem((n_prod, plan.reducer.nchan, n), true),
            };

            (reduced.into_iter().map(|(d, _)| d).collect(), new_flags, ws)
        };

        let pick = |v: &[f64]| rows.iter().map(|r| v[*r]).collect::<Vec<f64>>();

        let chunk = SampleChunk {
            rows: rows.to_vec(),
            data,
            flags,
            weights,
            weight_spectrum,
            row_flags,
            times: pick(&self.cols.time),
            intervals: pick(&self.cols.interval),
            time_centroids: pick(&self.cols.time_centroid),
            exposures: pick(&self.cols.exposure),
        };

        Ok((chunk, n_newly_flagged))
    }

    /// Fill in the identifiers and UVW of output row `o` from input row `r`.
    fn write_row_ids(&self, out: &mut OutputRows, o: usize, r: usize) -> Result<()> {
        let c = &self.cols;
        let m = &self.maps;

        if self.relabel_antennas {
            out.antenna1[o] = m.antenna.remap(c.antenna1[r], 0)? as i32;
            out.antenna2[o] = m.antenna.remap(c.antenna2[r], 0)? as i32;
        } else {
            out.antenna1[o] = c.antenna1[r];
            out.antenna2[o] = c.antenna2[r];
        }

        out.ddid[o] = m.ddid.remap(c.ddid[r], 0)? as i32;
        out.field[o] = m.field.remap(c.field[r], 0)? as i32;
        out.scan[o] = c.scan[r];
        out.state[o] = relabel_optional(&m.state, c.state[r])?;
        out.observation[o] = relabel_optional(&m.observation, c.observation[r])?;
        out.processor[o] = relabel_optional(&m.processor, c.processor[r])?;
        out.array[o] = m.array.remap(c.array[r], 0)? as i32;
        out.feed1[o] = c.feed1[r];
        out.feed2[o] = c.feed2[r];
        out.uvw[o] = c.uvw[r].clone();
        Ok(())
    }

    /// Write each prepared row of `chunk` to the position of its input row
    /// among the selected rows.
    fn write_copied(&self, plan: &DdidPlan, chunk: &SampleChunk, out: &mut OutputRows) -> Result<()> {
        let main = &self.input.main;
        let keep_sigma = main.has_column("SIGMA") && plan.selection.is_identity(plan.n_corr);

        for (i, r) in chunk.rows.iter().enumerate() {
            let o = match self.rows.binary_search(r) {
                Ok(o) => o,
                Err(_) => return inconsistent!("prepared row {} was not selected", r),
            };

            self.write_row_ids(out, o, *r)?;
            out.time[o] = self.cols.time[*r];
            out.interval[o] = self.cols.interval[*r];
            out.exposure[o] = self.cols.exposure[*r];
            out.time_centroid[o] = self.cols.time_centroid[*r];
            out.flag_row[o] = chunk.row_flags[i];

            for (col, dest) in out.data.iter_mut().enumerate() {
                dest[o] = chunk.row_data(col, i);
            }

            out.flag[o] = chunk.row_flags_2d(i);
            out.weight[o] = chunk.row_weights(i);
            out.sigma[o] = if keep_sigma {
                main.get_cell::<Vec<f32>>("SIGMA", *r)?
            } else {
                out.weight[o].iter().map(|w| sigma_from_weight(*w)).collect()
            };

            if let (Some(dest), Some(ws)) = (out.weight_spectrum.as_mut(), chunk.row_weight_spectrum(i)) {
                dest[o] = ws;
            }
        }

        Ok(())
    }

    /// Average every slot of every bin in `assignment`, writing output rows
    /// starting at `*next`.
    fn write_averaged(
        &self,
        chunk: &SampleChunk,
        assignment: BinAssignment,
        out: &mut OutputRows,
        next: &mut usize,
    ) -> Result<()> {
        let index: HashMap<usize, usize> = chunk
            .rows
            .iter()
            .enumerate()
            .map(|(i, r)| (*r, i))
            .collect();

        for bin in assignment.into_bins() {
            for slot in bin.slots.values() {
                let local = slot
                    .iter()
                    .map(|r| match index.get(r) {
                        Some(i) => Ok(*i),
                        None => inconsistent!("binned row {} was not prepared", r),
                    })
                    .collect::<Result<Vec<usize>>>()?;

                let avg = average_slot(chunk, &local, bin.time);
                let o = *next;
                *next += 1;

                self.write_row_ids(out, o, chunk.rows[avg.best_row])?;
                out.time[o] = bin.time;
                out.interval[o] = self.config.time_bin;
                out.exposure[o] = avg.exposure;
                out.time_centroid[o] = avg.time_centroid;
                out.flag_row[o] = avg.flag_row;

                for (dest, d) in out.data.iter_mut().zip(avg.data) {
                    dest[o] = d;
                }

                out.flag[o] = avg.flags;
                out.weight[o] = avg.weight;
                out.sigma[o] = avg.sigma;

                if let (Some(dest), Some(ws)) = (out.weight_spectrum.as_mut(), avg.weight_spectrum) {
                    dest[o] = ws;
                }
            }
        }

        Ok(())
    }

    /// Rebuild every input subtable for the output.
    fn rewrite_subtables(&self, out: &mut Dataset<T>) -> Result<()> {
        let m = &self.maps;

        for name in self.input.subtable_names() {
            let src = self.input.subtable(name)?;

            let table = match name {
                "SPECTRAL_WINDOW" => rewrite_spectral_windows(src, &m.spw, &self.spw_reducers)?,
                "DATA_DESCRIPTION" => rewrite_data_descriptions(src, &m.ddid, &m.spw, &m.pol)?,
                "POLARIZATION" => rewrite_polarizations(src, &m.pol, &self.pol_products)?,
                "FIELD" => select_rows(src, m.field.values())?,
                "STATE" => select_rows(src, m.state.values())?,
                "OBSERVATION" => select_rows(src, m.observation.values())?,
                "PROCESSOR" => select_rows(src, m.processor.values())?,
                "ANTENNA" if self.relabel_antennas => select_rows(src, m.antenna.values())?,

                "FEED" => {
                    let t = if self.relabel_antennas {
                        filter_and_relabel(src, "ANTENNA_ID", &m.antenna)?
                    } else {
                        copy_table(src)?
                    };

                    if t.has_column("SPECTRAL_WINDOW_ID") {
                        filter_and_relabel(&t, "SPECTRAL_WINDOW_ID", &m.spw)?
                    } else {
                        t
                    }
                }

                _ => copy_table(src)?,
            };

            out.insert_subtable(name, table);
        }

        Ok(())
    }

    /// Build the output dataset.
    pub fn fill(mut self, nb: &mut dyn NotificationBackend) -> Result<Dataset<T>> {
        let mut main = self.input.main.deep_copy_no_rows();
        let out_cols = self.output_data_columns();

        for dc in DataColumn::every() {
            if main.has_column(dc.col_name()) && !out_cols.contains(&dc) {
                main.remove_column(dc.col_name())?;
            }
        }

        for dc in &out_cols {
            if main.has_column(dc.col_name()) {
                continue;
            }

            if dc.is_float() {
                main.add_column::<Array2<f32>>(dc.col_name())?;
            } else {
                main.add_column::<Array2<Vis>>(dc.col_name())?;
            }
        }

        for name in DROPPED_COLUMNS {
            if main.has_column(name) {
                rn_note!(nb, "column {} is not carried over", name);
                main.remove_column(name)?;
            }
        }

        main.add_rows(self.n_output_rows)?;

        let mut out = OutputRows::new(self.n_output_rows, out_cols.len(), self.has_weight_spectrum);
        let mut n_newly_flagged = 0;
        let mut next = 0;

        match std::mem::take(&mut self.binning) {
            Binning::None => {
                for plan in &self.plans {
                    let (chunk, nf) = self.prepare_chunk(plan)?;
                    n_newly_flagged += nf;
                    self.write_copied(plan, &chunk, &mut out)?;
                }
            }

            Binning::Single(assignment) => {
                let mut chunks = Vec::with_capacity(self.plans.len());

                for plan in &self.plans {
                    let (chunk, nf) = self.prepare_chunk(plan)?;
                    n_newly_flagged += nf;
                    chunks.push(chunk);
                }

                let chunk = SampleChunk::concatenate(chunks)?;
                self.write_averaged(&chunk, assignment, &mut out, &mut next)?;
            }

            Binning::PerDescription(assignments) => {
                for (plan, assignment) in self.plans.iter().zip(assignments) {
                    let (chunk, nf) = self.prepare_chunk(plan)?;
                    n_newly_flagged += nf;
                    self.write_averaged(&chunk, assignment, &mut out, &mut next)?;
                }
            }
        }

        if n_newly_flagged > 0 {
            rn_note!(
                nb,
                "{} samples were flagged because their rows were flagged",
                n_newly_flagged
            );
        }

        out.store(&mut main, &out_cols)?;

        let mut dataset = Dataset::new(main);
        self.rewrite_subtables(&mut dataset)?;

        rn_note!(
            nb,
            "wrote {} rows from {} selected rows ({})",
            self.n_output_rows,
            self.rows.len(),
            self.strategy
        );

        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_spw_selection, RowFilter};
    use crate::table::MemTable;
    use crate::testutil::{self, sample_value, Row};
    use approx::assert_abs_diff_eq;
    use msplit_core::notify::BufferingNotificationBackend;
    use msplit_core::Complex;
    use msplit_visdata::VisDataError;

    fn shaped<'a>(
        ds: &'a Dataset<MemTable>,
        cfg: &'a SplitConfig,
        nb: &mut BufferingNotificationBackend,
    ) -> Result<ShapedSplit<'a, MemTable>> {
        Splitter::new(ds, cfg).select(nb)?.shape(nb)
    }

    fn run(ds: &Dataset<MemTable>, cfg: &SplitConfig) -> Result<Dataset<MemTable>> {
        let mut nb = BufferingNotificationBackend::new();
        shaped(ds, cfg, &mut nb)?.fill(&mut nb)
    }

    fn ints(t: &MemTable, col: &str) -> Vec<i32> {
        t.get_col_as_vec(col).unwrap()
    }

    fn vis(t: &MemTable, col: &str, row: usize) -> Array2<Vis> {
        t.get_cell(col, row).unwrap()
    }

    #[test]
    fn plain_copy_keeps_everything() {
        let ds = testutil::dataset(&[
            Row::new(0, 1, 0, 0.),
            Row::new(0, 2, 1, 1.),
            Row::new(1, 2, 2, 2.),
        ]);
        let cfg = SplitConfig::default();

        let mut nb = BufferingNotificationBackend::new();
        let sh = shaped(&ds, &cfg, &mut nb).unwrap();
        assert_eq!(sh.strategy(), Strategy::Copy);
        assert_eq!(sh.n_output_rows(), 3);
        let out = sh.fill(&mut nb).unwrap();

        assert_eq!(out.main.n_rows(), 3);
        assert_eq!(ints(&out.main, "ANTENNA1"), vec![0, 0, 1]);
        assert_eq!(ints(&out.main, "DATA_DESC_ID"), vec![0, 1, 2]);
        assert_eq!(
            out.main.get_col_as_vec::<f64>("TIME").unwrap(),
            vec![0., 1., 2.]
        );
        assert_eq!(
            out.main.get_col_as_vec::<Array2<Vis>>("DATA").unwrap(),
            ds.main.get_col_as_vec::<Array2<Vis>>("DATA").unwrap()
        );
        assert_eq!(
            out.main.get_col_as_vec::<Vec<f32>>("SIGMA").unwrap(),
            ds.main.get_col_as_vec::<Vec<f32>>("SIGMA").unwrap()
        );
        assert!(!out.main.has_column("MODEL_DATA"));
        assert!(!out.main.has_column("CORRECTED_DATA"));

        assert_eq!(out.subtable("SPECTRAL_WINDOW").unwrap().n_rows(), 3);
        assert_eq!(out.subtable("ANTENNA").unwrap().n_rows(), 4);
        assert_eq!(out.subtable("FIELD").unwrap().n_rows(), 1);
        assert_eq!(
            out.subtable("HISTORY").unwrap(),
            ds.subtable("HISTORY").unwrap()
        );
    }

    #[test]
    fn field_and_antenna_relabeling() {
        let mut rows = vec![Row::new(1, 3, 0, 0.), Row::new(0, 1, 0, 1.), Row::new(1, 3, 0, 2.)];
        rows[0].field = 2;
        rows[2].field = 3;
        let ds = testutil::dataset(&rows);

        let cfg = SplitConfig {
            field: "2~3".to_owned(),
            antenna: "3".to_owned(),
            ..SplitConfig::default()
        };

        let mut nb = BufferingNotificationBackend::new();
        let out = shaped(&ds, &cfg, &mut nb).unwrap().fill(&mut nb).unwrap();

        assert!(nb
            .messages()
            .any(|(_, m)| m.starts_with("2 out of 3 rows are going to be considered")));

        assert_eq!(ints(&out.main, "ANTENNA1"), vec![0, 0]);
        assert_eq!(ints(&out.main, "ANTENNA2"), vec![1, 1]);
        assert_eq!(ints(&out.main, "FIELD_ID"), vec![0, 1]);

        let names = |t: &str| out.subtable(t).unwrap().get_col_as_vec::<String>("NAME").unwrap();
        assert_eq!(names("FIELD"), vec!["field2", "field3"]);
        assert_eq!(names("ANTENNA"), vec!["ant1", "ant3"]);
        assert_eq!(ints(out.subtable("FEED").unwrap(), "ANTENNA_ID"), vec![0, 1]);
    }

    #[test]
    fn window_selection_with_channel_averaging() {
        let ds = testutil::dataset(&[Row::new(0, 1, 0, 0.), Row::new(0, 1, 1, 0.)]);
        let cfg = SplitConfig {
            spws: parse_spw_selection("1:0~3^2").unwrap(),
            ..SplitConfig::default()
        };

        let out = run(&ds, &cfg).unwrap();
        assert_eq!(out.main.n_rows(), 1);
        assert_eq!(ints(&out.main, "DATA_DESC_ID"), vec![0]);

        let d = vis(&out.main, "DATA", 0);
        assert_eq!(d.dim(), (4, 2));
        assert_abs_diff_eq!(d[[2, 1]].re, 21., epsilon = 1e-5);
        assert_abs_diff_eq!(d[[2, 1]].im, 2.5, epsilon = 1e-5);
        assert!(out.main.get_cell::<Array2<bool>>("FLAG", 0).unwrap().iter().all(|f| !f));

        let spw = out.subtable("SPECTRAL_WINDOW").unwrap();
        assert_eq!(ints(spw, "NUM_CHAN"), vec![2]);
        assert_eq!(spw.get_cell::<String>("NAME", 0).unwrap(), "spw1");

        let dd = out.subtable("DATA_DESCRIPTION").unwrap();
        assert_eq!(ints(dd, "SPECTRAL_WINDOW_ID"), vec![0]);
        assert_eq!(ints(dd, "POLARIZATION_ID"), vec![0]);
        assert_eq!(out.subtable("POLARIZATION").unwrap().n_rows(), 1);
    }

    #[test]
    fn stokes_i_from_linear_and_circular() {
        let mut rows = vec![Row::new(0, 1, 0, 0.), Row::new(0, 1, 2, 0.)];
        rows[0].weight = 2.;
        let ds = testutil::dataset(&rows);
        let cfg = SplitConfig {
            correlation: Some("I".to_owned()),
            ..SplitConfig::default()
        };

        let out = run(&ds, &cfg).unwrap();

        // (XX + YY)/2 with XX at position 0 and YY at position 3
        let d = vis(&out.main, "DATA", 0);
        assert_eq!(d.dim(), (1, 4));
        assert_eq!(d[[0, 2]], Complex::new(16., 2.));
        assert_eq!(out.main.get_cell::<Vec<f32>>("WEIGHT", 0).unwrap(), vec![4.]);
        assert_eq!(out.main.get_cell::<Vec<f32>>("SIGMA", 0).unwrap(), vec![0.5]);

        // (RR + LL)/2
        let d = vis(&out.main, "DATA", 1);
        assert_eq!(d.dim(), (1, 2));
        assert_eq!(d[[0, 1]], Complex::new(6., 1.));

        let pol = out.subtable("POLARIZATION").unwrap();
        assert_eq!(
            pol.get_col_as_vec::<Vec<i32>>("CORR_TYPE").unwrap(),
            vec![vec![1], vec![1]]
        );
        assert_eq!(ints(pol, "NUM_CORR"), vec![1, 1]);
    }

    #[test]
    fn unformable_products_are_rejected() {
        let ds = testutil::dataset(&[Row::new(0, 1, 2, 0.)]);
        let cfg = SplitConfig {
            correlation: Some("Q".to_owned()),
            ..SplitConfig::default()
        };

        assert!(matches!(
            run(&ds, &cfg),
            Err(SplitError::VisData(VisDataError::UnresolvableCorrelation { .. }))
        ));
    }

    #[test]
    fn four_row_time_average() {
        let mut rows = vec![
            Row::new(0, 1, 0, 0.),
            Row::new(0, 1, 0, 1.),
            Row::new(0, 2, 0, 2.),
            Row::new(0, 1, 0, 10.),
        ];
        rows[1].value = Complex::new(3., 0.);
        rows[1].uvw = [5., 0., 0.];
        let ds = testutil::dataset(&rows);

        let cfg = SplitConfig {
            time_bin: 3.,
            memory_limit: Some(u64::MAX),
            ..SplitConfig::default()
        };

        let mut nb = BufferingNotificationBackend::new();
        let sh = shaped(&ds, &cfg, &mut nb).unwrap();
        assert_eq!(sh.strategy(), Strategy::TimeAverage);
        assert_eq!(sh.n_output_rows(), 3);
        let out = sh.fill(&mut nb).unwrap();

        assert_eq!(out.main.n_rows(), 3);
        assert_eq!(out.main.get_col_as_vec::<f64>("TIME").unwrap(), vec![1., 1., 10.]);
        assert_eq!(out.main.get_col_as_vec::<f64>("INTERVAL").unwrap(), vec![3., 3., 3.]);
        assert_eq!(ints(&out.main, "ANTENNA2"), vec![1, 2, 1]);

        let d = vis(&out.main, "DATA", 0);
        assert_abs_diff_eq!(d[[0, 0]].re, 2., epsilon = 1e-6);
        assert_abs_diff_eq!(d[[1, 3]].re, 12., epsilon = 1e-6);
        assert_abs_diff_eq!(d[[1, 3]].im, 3., epsilon = 1e-6);
        assert_eq!(out.main.get_cell::<Vec<f32>>("WEIGHT", 0).unwrap(), vec![2.; 4]);

        let tc = out.main.get_col_as_vec::<f64>("TIME_CENTROID").unwrap();
        assert_abs_diff_eq!(tc[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(tc[1], 2., epsilon = 1e-12);
        let exposure = out.main.get_col_as_vec::<f64>("EXPOSURE").unwrap();
        assert_abs_diff_eq!(exposure[0], 2., epsilon = 1e-12);
        assert_abs_diff_eq!(exposure[1], 1., epsilon = 1e-12);

        // scalar values come from the row nearest the bin center
        assert_eq!(out.main.get_cell::<Vec<f64>>("UVW", 0).unwrap(), vec![5., 0., 0.]);
        assert_eq!(vis(&out.main, "DATA", 1)[[0, 0]], sample_value(Complex::new(1., 0.), 0, 0));
    }

    #[test]
    fn spectral_weights_are_used_and_summed() {
        let mut rows = vec![Row::new(0, 1, 0, 0.), Row::new(0, 1, 0, 1.)];
        rows[1].value = Complex::new(5., 0.);
        let mut ds = testutil::dataset(&rows);
        ds.main = ds
            .main
            .clone()
            .with_column(
                "WEIGHT_SPECTRUM",
                vec![Array2::from_elem((4, 4), 1f32), Array2::from_elem((4, 4), 3f32)],
            )
            .unwrap();

        let cfg = SplitConfig {
            time_bin: 10.,
            ..SplitConfig::default()
        };

        let out = run(&ds, &cfg).unwrap();
        assert_eq!(out.main.n_rows(), 1);
        assert_abs_diff_eq!(vis(&out.main, "DATA", 0)[[0, 0]].re, 4., epsilon = 1e-6);
        let ws = out.main.get_cell::<Array2<f32>>("WEIGHT_SPECTRUM", 0).unwrap();
        assert_eq!(ws.dim(), (4, 4));
        assert!(ws.iter().all(|w| *w == 4.));
    }

    fn keyed_rows(out: &Dataset<MemTable>) -> Vec<((i32, i32, i32, i64), Array2<Vis>)> {
        let m = &out.main;
        let dd = ints(m, "DATA_DESC_ID");
        let a1 = ints(m, "ANTENNA1");
        let a2 = ints(m, "ANTENNA2");
        let t = m.get_col_as_vec::<f64>("TIME").unwrap();

        let mut v: Vec<_> = (0..m.n_rows())
            .map(|i| ((dd[i], a1[i], a2[i], (t[i] * 1000.) as i64), vis(m, "DATA", i)))
            .collect();
        v.sort_by_key(|(k, _)| *k);
        v
    }

    #[test]
    fn streaming_matches_single_pass() {
        let mut rows = Vec::new();

        for ddid in 0..2 {
            for (i, t) in [0., 1., 5.].iter().enumerate() {
                let mut r = Row::new(0, 1 + i as i32 % 2, ddid, *t);
                r.value = Complex::new(*t as f32, ddid as f32);
                rows.push(r);
            }
        }

        let ds = testutil::dataset(&rows);

        let single = SplitConfig {
            time_bin: 3.,
            memory_limit: Some(u64::MAX),
            ..SplitConfig::default()
        };
        let streaming = SplitConfig {
            memory_limit: Some(1),
            ..single.clone()
        };

        let mut nb = BufferingNotificationBackend::new();
        assert_eq!(
            shaped(&ds, &streaming, &mut nb).unwrap().strategy(),
            Strategy::StreamingTimeAverage
        );

        let a = run(&ds, &single).unwrap();
        let b = run(&ds, &streaming).unwrap();
        assert_eq!(a.main.n_rows(), 6);
        assert_eq!(keyed_rows(&a), keyed_rows(&b));
    }

    #[test]
    fn mixed_shapes_cannot_be_time_averaged() {
        let ds = testutil::dataset(&[Row::new(0, 1, 0, 0.), Row::new(0, 1, 2, 0.)]);
        let cfg = SplitConfig {
            time_bin: 10.,
            ..SplitConfig::default()
        };

        assert!(matches!(
            run(&ds, &cfg),
            Err(SplitError::UnsupportedShape { .. })
        ));

        // but copying them is fine
        let out = run(&ds, &SplitConfig::default()).unwrap();
        assert_eq!(out.main.n_rows(), 2);
    }

    #[test]
    fn empty_selection() {
        let ds = testutil::dataset(&[Row::new(0, 1, 0, 0.)]);
        let cfg = SplitConfig {
            field: "9".to_owned(),
            ..SplitConfig::default()
        };
        assert_eq!(run(&ds, &cfg).err(), Some(SplitError::EmptySelection));

        let cfg = SplitConfig {
            row_filter: Some(RowFilter::Rows(Vec::new())),
            ..SplitConfig::default()
        };
        assert_eq!(run(&ds, &cfg).err(), Some(SplitError::EmptySelection));
    }

    #[test]
    fn bad_channel_range() {
        let ds = testutil::dataset(&[Row::new(0, 1, 0, 0.)]);
        let cfg = SplitConfig {
            spws: parse_spw_selection("0:0~9").unwrap(),
            ..SplitConfig::default()
        };

        assert!(matches!(
            run(&ds, &cfg),
            Err(SplitError::BadChannelRange { spw: 0, available: 4, .. })
        ));
    }

    #[test]
    fn row_flags_propagate() {
        let mut rows = vec![Row::new(0, 1, 0, 0.), Row::new(0, 2, 0, 0.)];
        rows[0].flag_row = true;
        let ds = testutil::dataset(&rows);

        let cfg = SplitConfig::default();
        let mut nb = BufferingNotificationBackend::new();
        let out = shaped(&ds, &cfg, &mut nb).unwrap().fill(&mut nb).unwrap();

        assert!(nb
            .messages()
            .any(|(_, m)| m == "16 samples were flagged because their rows were flagged"));
        assert!(out.main.get_cell::<Array2<bool>>("FLAG", 0).unwrap().iter().all(|f| *f));
        assert!(out.main.get_cell::<Array2<bool>>("FLAG", 1).unwrap().iter().all(|f| !f));
        assert_eq!(
            out.main.get_col_as_vec::<bool>("FLAG_ROW").unwrap(),
            vec![true, false]
        );

        let cfg = SplitConfig {
            propagate_row_flags: false,
            ..SplitConfig::default()
        };
        let out = run(&ds, &cfg).unwrap();
        assert!(out.main.get_cell::<Array2<bool>>("FLAG", 0).unwrap().iter().all(|f| !f));

        // flagged rows do not contribute to averages
        let cfg = SplitConfig {
            time_bin: 10.,
            ..SplitConfig::default()
        };
        let out = run(&ds, &cfg).unwrap();
        assert_eq!(out.main.n_rows(), 1);
        assert_eq!(ints(&out.main, "ANTENNA2"), vec![2]);
    }

    #[test]
    fn data_column_routing() {
        let ds = testutil::dataset(&[Row::new(0, 1, 0, 0.)]);

        let cfg = SplitConfig {
            data_columns: vec![DataColumn::CorrectedData],
            ..SplitConfig::default()
        };
        let out = run(&ds, &cfg).unwrap();
        assert_eq!(vis(&out.main, "DATA", 0), vis(&ds.main, "CORRECTED_DATA", 0));
        assert!(!out.main.has_column("CORRECTED_DATA"));
        assert!(!out.main.has_column("MODEL_DATA"));

        let cfg = SplitConfig {
            data_columns: DataColumn::all().to_vec(),
            ..SplitConfig::default()
        };
        let out = run(&ds, &cfg).unwrap();

        for name in ["DATA", "MODEL_DATA", "CORRECTED_DATA"] {
            assert_eq!(vis(&out.main, name, 0), vis(&ds.main, name, 0));
        }
    }

    #[test]
    fn channel_selection_keeps_flagged_samples() {
        let mut ds = testutil::dataset(&[Row::new(0, 1, 0, 0.)]);
        let mut flag = Array2::from_elem((4, 4), false);
        flag[[0, 1]] = true;
        ds.main.put_cell("FLAG", 0, flag).unwrap();

        let cfg = SplitConfig {
            spws: parse_spw_selection("0:1~2").unwrap(),
            ..SplitConfig::default()
        };
        let out = run(&ds, &cfg).unwrap();

        let d = vis(&out.main, "DATA", 0);
        assert_eq!(d.dim(), (4, 2));
        assert_eq!(d[[0, 0]], Complex::new(1., 1.));
        assert_eq!(d[[0, 1]], sample_value(Complex::new(1., 0.), 0, 2));

        let f = out.main.get_cell::<Array2<bool>>("FLAG", 0).unwrap();
        assert!(f[[0, 0]]);
        assert!(!f[[0, 1]]);
        assert!(!f[[1, 0]]);
    }

    fn floats(t: &MemTable, row: usize) -> Array2<f32> {
        t.get_cell("FLOAT_DATA", row).unwrap()
    }

    #[test]
    fn float_data_copy() {
        let ds = testutil::with_float_data(testutil::dataset(&[
            Row::new(0, 1, 0, 0.),
            Row::new(0, 2, 2, 1.),
        ]));
        let cfg = SplitConfig {
            data_columns: vec![DataColumn::FloatData],
            ..SplitConfig::default()
        };

        let out = run(&ds, &cfg).unwrap();
        assert_eq!(out.main.n_rows(), 2);
        assert!(!out.main.has_column("DATA"));
        assert_eq!(floats(&out.main, 0), floats(&ds.main, 0));
        assert_eq!(floats(&out.main, 1), floats(&ds.main, 1));

        // complex columns named but absent are an error
        let cfg = SplitConfig::default();
        assert!(matches!(
            run(&ds, &cfg),
            Err(SplitError::Table(TableError::NoSuchColumn(_)))
        ));
    }

    #[test]
    fn float_data_time_average() {
        let mut rows = vec![Row::new(0, 1, 0, 0.), Row::new(0, 1, 0, 1.)];
        rows[1].value = Complex::new(3., 0.);
        let ds = testutil::with_float_data(testutil::dataset(&rows));

        let cfg = SplitConfig {
            time_bin: 10.,
            data_columns: vec![DataColumn::FloatData],
            ..SplitConfig::default()
        };

        let out = run(&ds, &cfg).unwrap();
        assert_eq!(out.main.n_rows(), 1);

        let d = floats(&out.main, 0);
        assert_eq!(d.dim(), (4, 4));
        assert_abs_diff_eq!(d[[0, 0]], 2., epsilon = 1e-6);
        assert_abs_diff_eq!(d[[1, 3]], 12., epsilon = 1e-6);
        assert_eq!(out.main.get_cell::<Vec<f32>>("WEIGHT", 0).unwrap(), vec![2.; 4]);
    }
}
