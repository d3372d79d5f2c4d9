// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

//! Synthetic datasets for the test suite.
//!
//! Three data descriptions are defined: 0 is window 0 (4 channels) with
//! linear feeds, 1 is window 1 (4 channels) with linear feeds, and 2 is
//! window 2 (2 channels) with RR and LL only.

use msplit_core::{Array2, Complex, Vis};

use crate::table::{Dataset, MemTable, VisTable};

/// (number of channels, first frequency) of each spectral window.
pub const SPWS: [(usize, f64); 3] = [(4, 1.0e9), (4, 2.0e9), (2, 3.0e9)];

/// CORR_TYPE of each polarization setup.
pub const POLS: [&[i32]; 2] = [&[9, 10, 11, 12], &[5, 8]];

/// (spectral window, polarization) of each data description.
pub const DDS: [(usize, usize); 3] = [(0, 0), (1, 0), (2, 1)];

pub const N_ANTENNAS: usize = 4;
pub const N_FIELDS: usize = 4;

pub const CHAN_WIDTH: f64 = 1.0e6;

#[derive(Clone, Debug)]
pub struct Row {
    pub antenna1: i32,
    pub antenna2: i32,
    pub ddid: i32,
    pub field: i32,
    pub scan: i32,
    pub state: i32,
    pub time: f64,
    pub interval: f64,
    pub flag_row: bool,
    pub value: Vis,
    pub weight: f32,
    pub uvw: [f64; 3],
}

impl Row {
    pub fn new(antenna1: i32, antenna2: i32, ddid: i32, time: f64) -> Self {
        Row {
            antenna1,
            antenna2,
            ddid,
            field: 0,
            scan: 1,
            state: 0,
            time,
            interval: 1.,
            flag_row: false,
            value: Complex::new(1., 0.),
            weight: 1.,
            uvw: [100., 0., 0.],
        }
    }
}

pub fn shape(ddid: i32) -> (usize, usize) {
    let (spw, pol) = DDS[ddid as usize];
    (POLS[pol].len(), SPWS[spw].0)
}

/// The DATA sample of a row at a given correlation and channel.
pub fn sample_value(value: Vis, corr: usize, chan: usize) -> Vis {
    value + Complex::new(10. * corr as f32, chan as f32)
}

pub fn dataset(rows: &[Row]) -> Dataset<MemTable> {
    let ints = |f: &dyn Fn(&Row) -> i32| rows.iter().map(f).collect::<Vec<i32>>();
    let doubles = |f: &dyn Fn(&Row) -> f64| rows.iter().map(f).collect::<Vec<f64>>();

    let data: Vec<Array2<Vis>> = rows
        .iter()
        .map(|r| Array2::from_shape_fn(shape(r.ddid), |(c, ch)| sample_value(r.value, c, ch)))
        .collect();
    let model: Vec<Array2<Vis>> = rows
        .iter()
        .map(|r| Array2::from_elem(shape(r.ddid), Complex::new(1., 0.)))
        .collect();
    let corrected: Vec<Array2<Vis>> = data.iter().map(|d| d.mapv(|v| v * 2.)).collect();
    let flags: Vec<Array2<bool>> = rows
        .iter()
        .map(|r| Array2::from_elem(shape(r.ddid), false))
        .collect();
    let weights: Vec<Vec<f32>> = rows
        .iter()
        .map(|r| vec![r.weight; shape(r.ddid).0])
        .collect();
    let sigmas: Vec<Vec<f32>> = rows
        .iter()
        .map(|r| vec![1. / r.weight.sqrt(); shape(r.ddid).0])
        .collect();

    let main = MemTable::new()
        .with_column("ANTENNA1", ints(&|r| r.antenna1))
        .and_then(|t| t.with_column("ANTENNA2", ints(&|r| r.antenna2)))
        .and_then(|t| t.with_column("DATA_DESC_ID", ints(&|r| r.ddid)))
        .and_then(|t| t.with_column("FIELD_ID", ints(&|r| r.field)))
        .and_then(|t| t.with_column("SCAN_NUMBER", ints(&|r| r.scan)))
        .and_then(|t| t.with_column("STATE_ID", ints(&|r| r.state)))
        .and_then(|t| t.with_column("OBSERVATION_ID", ints(&|_| 0)))
        .and_then(|t| t.with_column("PROCESSOR_ID", ints(&|_| 0)))
        .and_then(|t| t.with_column("ARRAY_ID", ints(&|_| 0)))
        .and_then(|t| t.with_column("FEED1", ints(&|_| 0)))
        .and_then(|t| t.with_column("FEED2", ints(&|_| 0)))
        .and_then(|t| t.with_column("TIME", doubles(&|r| r.time)))
        .and_then(|t| t.with_column("INTERVAL", doubles(&|r| r.interval)))
        .and_then(|t| t.with_column("EXPOSURE", doubles(&|r| r.interval)))
        .and_then(|t| t.with_column("TIME_CENTROID", doubles(&|r| r.time)))
        .and_then(|t| {
            t.with_column(
                "UVW",
                rows.iter().map(|r| r.uvw.to_vec()).collect::<Vec<_>>(),
            )
        })
        .and_then(|t| t.with_column("FLAG_ROW", rows.iter().map(|r| r.flag_row).collect()))
        .and_then(|t| t.with_column("DATA", data))
        .and_then(|t| t.with_column("MODEL_DATA", model))
        .and_then(|t| t.with_column("CORRECTED_DATA", corrected))
        .and_then(|t| t.with_column("FLAG", flags))
        .and_then(|t| t.with_column("WEIGHT", weights))
        .and_then(|t| t.with_column("SIGMA", sigmas))
        .unwrap();

    let spw = MemTable::new()
        .with_column("NUM_CHAN", SPWS.iter().map(|s| s.0 as i32).collect())
        .and_then(|t| {
            t.with_column(
                "CHAN_FREQ",
                SPWS.iter()
                    .map(|(n, f0)| (0..*n).map(|c| f0 + c as f64 * CHAN_WIDTH).collect())
                    .collect::<Vec<Vec<f64>>>(),
            )
        })
        .and_then(|t| {
            t.with_column(
                "CHAN_WIDTH",
                SPWS.iter()
                    .map(|(n, _)| vec![CHAN_WIDTH; *n])
                    .collect::<Vec<Vec<f64>>>(),
            )
        })
        .and_then(|t| {
            t.with_column(
                "EFFECTIVE_BW",
                SPWS.iter()
                    .map(|(n, _)| vec![CHAN_WIDTH; *n])
                    .collect::<Vec<Vec<f64>>>(),
            )
        })
        .and_then(|t| {
            t.with_column(
                "RESOLUTION",
                SPWS.iter()
                    .map(|(n, _)| vec![CHAN_WIDTH; *n])
                    .collect::<Vec<Vec<f64>>>(),
            )
        })
        .and_then(|t| {
            t.with_column(
                "TOTAL_BANDWIDTH",
                SPWS.iter().map(|(n, _)| *n as f64 * CHAN_WIDTH).collect(),
            )
        })
        .and_then(|t| t.with_column("REF_FREQUENCY", SPWS.iter().map(|s| s.1).collect()))
        .and_then(|t| {
            t.with_column(
                "NAME",
                (0..SPWS.len()).map(|i| format!("spw{i}")).collect(),
            )
        })
        .unwrap();

    let pol = MemTable::new()
        .with_column("CORR_TYPE", POLS.iter().map(|p| p.to_vec()).collect())
        .and_then(|t| t.with_column("NUM_CORR", POLS.iter().map(|p| p.len() as i32).collect()))
        .unwrap();

    let dd = MemTable::new()
        .with_column(
            "SPECTRAL_WINDOW_ID",
            DDS.iter().map(|d| d.0 as i32).collect(),
        )
        .and_then(|t| t.with_column("POLARIZATION_ID", DDS.iter().map(|d| d.1 as i32).collect()))
        .unwrap();

    let names = |prefix: &str, n: usize| (0..n).map(|i| format!("{prefix}{i}")).collect::<Vec<_>>();

    let antenna = MemTable::new()
        .with_column("NAME", names("ant", N_ANTENNAS))
        .unwrap();

    let feed = MemTable::new()
        .with_column("ANTENNA_ID", (0..N_ANTENNAS as i32).collect())
        .and_then(|t| t.with_column("SPECTRAL_WINDOW_ID", vec![-1; N_ANTENNAS]))
        .unwrap();

    let field = MemTable::new()
        .with_column("NAME", names("field", N_FIELDS))
        .unwrap();

    let state = MemTable::new()
        .with_column("OBS_MODE", names("mode", 2))
        .unwrap();

    let observation = MemTable::new()
        .with_column("TELESCOPE_NAME", vec!["VLA".to_owned()])
        .unwrap();

    let processor = MemTable::new()
        .with_column("TYPE", vec!["CORRELATOR".to_owned()])
        .unwrap();

    let history = MemTable::new()
        .with_column("MESSAGE", vec!["created".to_owned()])
        .unwrap();

    Dataset::new(main)
        .with_subtable("SPECTRAL_WINDOW", spw)
        .with_subtable("POLARIZATION", pol)
        .with_subtable("DATA_DESCRIPTION", dd)
        .with_subtable("ANTENNA", antenna)
        .with_subtable("FEED", feed)
        .with_subtable("FIELD", field)
        .with_subtable("STATE", state)
        .with_subtable("OBSERVATION", observation)
        .with_subtable("PROCESSOR", processor)
        .with_subtable("HISTORY", history)
}

/// Swap the complex data columns of a dataset for a FLOAT_DATA column
/// holding the real parts of its DATA samples.
pub fn with_float_data(mut ds: Dataset<MemTable>) -> Dataset<MemTable> {
    let reals: Vec<Array2<f32>> = ds
        .main
        .get_col_as_vec::<Array2<Vis>>("DATA")
        .unwrap()
        .into_iter()
        .map(|d| d.mapv(|v| v.re))
        .collect();

    for name in ["DATA", "MODEL_DATA", "CORRECTED_DATA"] {
        ds.main.remove_column(name).unwrap();
    }

    ds.main = ds.main.with_column("FLOAT_DATA", reals).unwrap();
    ds
}
