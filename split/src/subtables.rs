// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!
Rewriting subtables to match a relabeled main table.

Each subtable that is indexed by a renumbered identifier is rebuilt with only
the surviving rows, in dense-index order, so that row `i` of the output
subtable describes dense index `i`. Subtables not indexed by anything we
renumber are carried over unchanged.

*/

use msplit_visdata::VisPol;

use crate::average::ChannelReducer;
use crate::errors::Result;
use crate::remap::IndexRemapper;
use crate::table::VisTable;

/// Copy a table in its entirety.
pub fn copy_table<T: VisTable>(src: &T) -> Result<T> {
    let mut dest = src.deep_copy_no_rows();
    src.copy_rows_to(&mut dest)?;
    Ok(dest)
}

/// Build a table holding the rows of `src` listed in `rows`, in that order.
pub fn select_rows<T: VisTable>(src: &T, rows: &[i32]) -> Result<T> {
    let mut dest = src.deep_copy_no_rows();
    dest.add_rows(rows.len())?;

    for (i, raw) in rows.iter().enumerate() {
        if *raw < 0 || *raw as usize >= src.n_rows() {
            return inconsistent!(
                "a main-table row refers to subtable row {}, but the subtable has {} rows",
                raw,
                src.n_rows()
            );
        }

        src.copy_row_to(*raw as usize, &mut dest, i)?;
    }

    Ok(dest)
}

/// Keep the rows of `src` whose `col_name` value is mapped by `map`,
/// relabeling that column; negative values are kept as-is.
///
/// Rows are ordered by the dense index of `col_name` and keep their input
/// order otherwise.
pub fn filter_and_relabel<T: VisTable>(src: &T, col_name: &str, map: &IndexRemapper) -> Result<T> {
    let raw = src.get_col_as_vec::<i32>(col_name)?;

    let mut keep: Vec<(i32, usize)> = Vec::new();

    for (row, v) in raw.iter().enumerate() {
        if *v < 0 {
            keep.push((*v, row));
        } else if map.contains(*v) {
            keep.push((map.remap(*v, 0)? as i32, row));
        }
    }

    keep.sort_by_key(|(v, _)| *v);

    let rows: Vec<i32> = keep.iter().map(|(_, r)| *r as i32).collect();
    let mut dest = select_rows(src, &rows)?;
    dest.put_column(col_name, keep.into_iter().map(|(v, _)| v).collect())?;
    Ok(dest)
}

/// How one SPECTRAL_WINDOW column changes when channels are reduced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SpectralWindowColumnHandler {
    ChanFreq,
    ChanWidth,
    EffectiveBw,
    NumChan,
    RefFrequency,
    Resolution,
    TotalBandwidth,
    /// Not channel-dependent; left alone.
    Carry,
}

impl SpectralWindowColumnHandler {
    fn for_column(col_name: &str) -> Self {
        match col_name {
            "CHAN_FREQ" => SpectralWindowColumnHandler::ChanFreq,
            "CHAN_WIDTH" => SpectralWindowColumnHandler::ChanWidth,
            "EFFECTIVE_BW" => SpectralWindowColumnHandler::EffectiveBw,
            "NUM_CHAN" => SpectralWindowColumnHandler::NumChan,
            "REF_FREQUENCY" => SpectralWindowColumnHandler::RefFrequency,
            "RESOLUTION" => SpectralWindowColumnHandler::Resolution,
            "TOTAL_BANDWIDTH" => SpectralWindowColumnHandler::TotalBandwidth,
            _ => SpectralWindowColumnHandler::Carry,
        }
    }

    /// Rewrite row `row` of `dest` given the unreduced values in `src`.
    fn process<T: VisTable>(
        self,
        col_name: &str,
        src: &T,
        row: usize,
        reducer: &ChannelReducer,
        dest: &mut T,
    ) -> Result<()> {
        use SpectralWindowColumnHandler::*;

        match self {
            Carry => Ok(()),

            NumChan => Ok(dest.put_cell(col_name, row, reducer.nchan as i32)?),

            ChanFreq => {
                let freqs = src.get_cell::<Vec<f64>>(col_name, row)?;
                Ok(dest.put_cell(col_name, row, reducer.reduce_frequencies(&freqs))?)
            }

            ChanWidth | EffectiveBw | Resolution => {
                let widths = src.get_cell::<Vec<f64>>(col_name, row)?;
                Ok(dest.put_cell(col_name, row, reducer.reduce_widths(&widths))?)
            }

            RefFrequency => {
                let freqs = src.get_cell::<Vec<f64>>("CHAN_FREQ", row)?;

                match reducer.reduce_frequencies(&freqs).first() {
                    Some(f) => Ok(dest.put_cell(col_name, row, *f)?),
                    None => Ok(()),
                }
            }

            TotalBandwidth => {
                let widths = src.get_cell::<Vec<f64>>("CHAN_WIDTH", row)?;
                let total = reducer.reduce_widths(&widths).iter().map(|w| w.abs()).sum::<f64>();
                Ok(dest.put_cell(col_name, row, total)?)
            }
        }
    }
}

/// Rebuild SPECTRAL_WINDOW for the surviving windows.
///
/// `reducers[i]` is the channel reduction applied to dense window `i`.
pub fn rewrite_spectral_windows<T: VisTable>(
    src: &T,
    spws: &IndexRemapper,
    reducers: &[ChannelReducer],
) -> Result<T> {
    let selected = select_rows(src, spws.values())?;
    let mut dest = select_rows(src, spws.values())?;

    for col_name in selected.column_names() {
        let handler = SpectralWindowColumnHandler::for_column(&col_name);

        for (row, reducer) in reducers.iter().enumerate() {
            let n_in = selected.get_cell::<i32>("NUM_CHAN", row)? as usize;

            if !reducer.is_trivial(n_in) {
                handler.process(&col_name, &selected, row, reducer, &mut dest)?;
            }
        }
    }

    Ok(dest)
}

/// Rebuild DATA_DESCRIPTION, relabeling its window and polarization IDs.
pub fn rewrite_data_descriptions<T: VisTable>(
    src: &T,
    ddids: &IndexRemapper,
    spws: &IndexRemapper,
    pols: &IndexRemapper,
) -> Result<T> {
    let mut dest = select_rows(src, ddids.values())?;

    let spw_ids = spws.remap_all(&dest.get_col_as_vec::<i32>("SPECTRAL_WINDOW_ID")?)?;
    dest.put_column("SPECTRAL_WINDOW_ID", spw_ids)?;

    let pol_ids = pols.remap_all(&dest.get_col_as_vec::<i32>("POLARIZATION_ID")?)?;
    dest.put_column("POLARIZATION_ID", pol_ids)?;

    Ok(dest)
}

/// Rebuild POLARIZATION. `products[i]` lists the output products of dense
/// polarization setup `i`.
pub fn rewrite_polarizations<T: VisTable>(
    src: &T,
    pols: &IndexRemapper,
    products: &[Vec<VisPol>],
) -> Result<T> {
    let mut dest = select_rows(src, pols.values())?;

    for (row, prods) in products.iter().enumerate() {
        let codes: Vec<i32> = prods.iter().map(|p| p.stokes_code()).collect();
        dest.put_cell("NUM_CORR", row, codes.len() as i32)?;
        dest.put_cell("CORR_TYPE", row, codes)?;
    }

    Ok(dest)
}
