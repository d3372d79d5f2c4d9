// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!
Channel reduction and weighted time averaging.

Samples are handled in [`SampleChunk`]s: cubes with axes `[correlation,
channel, row]` holding already-prepared rows, plus the per-row quantities
that averaging needs. A [`ChannelReducer`] shrinks the channel axis of a
chunk; [`average_slot`] collapses the rows of one time-bin slot into a single
output row.

Sums are accumulated in double precision.

*/

use msplit_core::ndarray::{concatenate, s, Array2, Array3, ArrayView3, Axis};
use msplit_core::{check_shape, Complex, Vis};
use std::ops::Range;

use crate::errors::{Result, SplitError};

/// Selection or averaging along the channel axis.
///
/// Output channel `c` draws on input channels starting at `start + c*step`.
/// In selection mode it is just that channel; in averaging mode it is the
/// `step` channels from there on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChannelReducer {
    pub start: usize,
    pub nchan: usize,
    pub step: usize,
    pub average: bool,
}

impl ChannelReducer {
    /// Keep all of `n_in` channels unchanged.
    pub fn full(n_in: usize) -> Self {
        ChannelReducer {
            start: 0,
            nchan: n_in,
            step: 1,
            average: false,
        }
    }

    /// Check that this reduction fits in a window of `available` channels.
    pub fn validate(&self, spw: i32, available: usize) -> Result<()> {
        let needed = if self.average {
            self.start + self.nchan * self.step
        } else {
            self.start + (self.nchan.max(1) - 1) * self.step + 1
        };

        if self.nchan == 0 || self.step == 0 || needed > available {
            return Err(SplitError::BadChannelRange {
                spw,
                start: self.start,
                nchan: self.nchan,
                step: self.step,
                available,
            });
        }

        Ok(())
    }

    /// True if this reduction leaves `n_in` channels untouched.
    pub fn is_trivial(&self, n_in: usize) -> bool {
        self.start == 0 && self.nchan == n_in && (self.step == 1 || (self.nchan <= 1 && !self.average))
    }

    /// The input channels feeding output channel `c`.
    pub fn input_channels(&self, c: usize) -> Range<usize> {
        let first = self.start + c * self.step;

        if self.average {
            first..first + self.step
        } else {
            first..first + 1
        }
    }

    /// Reduce sample and flag cubes with axes `[corr, chan, row]`.
    ///
    /// In selection mode the chosen channel is copied along with its flag,
    /// flagged or not. In averaging mode each output value is the plain mean
    /// of the unflagged inputs; an output channel with no unflagged input is
    /// zero and flagged.
    pub fn reduce_samples(
        &self,
        data: ArrayView3<Vis>,
        flags: ArrayView3<bool>,
    ) -> (Array3<Vis>, Array3<bool>) {
        let (n_corr, _, n_row) = data.dim();

        if !self.average {
            let shape = (n_corr, self.nchan, n_row);
            let at = |c: usize| self.start + c * self.step;
            let out = Array3::from_shape_fn(shape, |(corr, c, row)| data[[corr, at(c), row]]);
            let out_flags = Array3::from_shape_fn(shape, |(corr, c, row)| flags[[corr, at(c), row]]);
            return (out, out_flags);
        }

        let mut out = Array3::zeros((n_corr, self.nchan, n_row));
        let mut out_flags = Array3::from_elem((n_corr, self.nchan, n_row), true);

        for c in 0..self.nchan {
            let chans = self.input_channels(c);

            for corr in 0..n_corr {
                for row in 0..n_row {
                    let mut sum = Complex::<f64>::new(0., 0.);
                    let mut n = 0usize;

                    for ic in chans.clone() {
                        if !flags[[corr, ic, row]] {
                            let v = data[[corr, ic, row]];
                            sum += Complex::new(v.re as f64, v.im as f64);
                            n += 1;
                        }
                    }

                    if n > 0 {
                        let mean = sum / n as f64;
                        out[[corr, c, row]] = Complex::new(mean.re as f32, mean.im as f32);
                        out_flags[[corr, c, row]] = false;
                    }
                }
            }
        }

        (out, out_flags)
    }

    /// Reduce a WEIGHT_SPECTRUM cube: the sum of the unflagged inputs when
    /// averaging, the chosen channel otherwise.
    pub fn reduce_weight_spectrum(
        &self,
        weights: ArrayView3<f32>,
        flags: ArrayView3<bool>,
    ) -> Array3<f32> {
        let (n_corr, _, n_row) = weights.dim();

        Array3::from_shape_fn((n_corr, self.nchan, n_row), |(corr, c, row)| {
            self.input_channels(c)
                .filter(|ic| !self.average || !flags[[corr, *ic, row]])
                .map(|ic| weights[[corr, ic, row]])
                .sum()
        })
    }

    /// Reduce a per-channel frequency axis: mean of the inputs when
    /// averaging.
    pub fn reduce_frequencies(&self, freqs: &[f64]) -> Vec<f64> {
        (0..self.nchan)
            .map(|c| {
                let chans = self.input_channels(c);
                let n = chans.len() as f64;
                freqs[chans].iter().sum::<f64>() / n
            })
            .collect()
    }

    /// Reduce a per-channel width axis: sum of the inputs when averaging.
    pub fn reduce_widths(&self, widths: &[f64]) -> Vec<f64> {
        (0..self.nchan)
            .map(|c| widths[self.input_channels(c)].iter().sum())
            .collect()
    }
}

/// Prepared rows awaiting averaging or output.
///
/// All arrays share their row axis; `rows[i]` says which selected input row
/// produced prepared row `i`.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleChunk {
    pub rows: Vec<usize>,
    /// One `[corr, chan, row]` cube per data column.
    pub data: Vec<Array3<Vis>>,
    pub flags: Array3<bool>,
    /// `[corr, row]`.
    pub weights: Array2<f32>,
    pub weight_spectrum: Option<Array3<f32>>,
    pub row_flags: Vec<bool>,
    pub times: Vec<f64>,
    pub intervals: Vec<f64>,
    pub time_centroids: Vec<f64>,
    pub exposures: Vec<f64>,
}

impl SampleChunk {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// The `(n_corr, n_chan)` shape of every row.
    pub fn sample_shape(&self) -> (usize, usize) {
        let (n_corr, n_chan, _) = self.flags.dim();
        (n_corr, n_chan)
    }

    /// Join chunks with identical sample shapes along the row axis.
    pub fn concatenate(chunks: Vec<SampleChunk>) -> Result<SampleChunk> {
        let mut iter = chunks.into_iter();

        let mut joined = match iter.next() {
            Some(c) => c,
            None => {
                return Err(SplitError::Inconsistent(
                    "no sample chunks to join".to_owned(),
                ))
            }
        };

        for chunk in iter {
            let (a_corr, a_chan) = joined.sample_shape();
            let (b_corr, b_chan) = chunk.sample_shape();
            check_shape("sample rows", &[a_corr, a_chan], &[b_corr, b_chan])?;

            if chunk.data.len() != joined.data.len()
                || chunk.weight_spectrum.is_some() != joined.weight_spectrum.is_some()
            {
                return inconsistent!("sample chunks carry different sets of columns");
            }

            let join3 = |a: &Array3<Vis>, b: &Array3<Vis>| {
                concatenate(Axis(2), &[a.view(), b.view()])
                    .map_err(|e| SplitError::Inconsistent(e.to_string()))
            };

            for (a, b) in joined.data.iter_mut().zip(chunk.data.iter()) {
                *a = join3(a, b)?;
            }

            joined.flags = concatenate(Axis(2), &[joined.flags.view(), chunk.flags.view()])
                .map_err(|e| SplitError::Inconsistent(e.to_string()))?;
            joined.weights = concatenate(Axis(1), &[joined.weights.view(), chunk.weights.view()])
                .map_err(|e| SplitError::Inconsistent(e.to_string()))?;

            if let (Some(a), Some(b)) = (joined.weight_spectrum.as_mut(), chunk.weight_spectrum.as_ref()) {
                *a = concatenate(Axis(2), &[a.view(), b.view()])
                    .map_err(|e| SplitError::Inconsistent(e.to_string()))?;
            }

            joined.rows.extend(chunk.rows);
            joined.row_flags.extend(chunk.row_flags);
            joined.times.extend(chunk.times);
            joined.intervals.extend(chunk.intervals);
            joined.time_centroids.extend(chunk.time_centroids);
            joined.exposures.extend(chunk.exposures);
        }

        Ok(joined)
    }

    /// Extract the samples of one prepared row as `[corr, chan]` arrays.
    pub fn row_data(&self, col: usize, row: usize) -> Array2<Vis> {
        self.data[col].slice(s![.., .., row]).to_owned()
    }

    pub fn row_flags_2d(&self, row: usize) -> Array2<bool> {
        self.flags.slice(s![.., .., row]).to_owned()
    }

    pub fn row_weights(&self, row: usize) -> Vec<f32> {
        self.weights.column(row).to_vec()
    }

    pub fn row_weight_spectrum(&self, row: usize) -> Option<Array2<f32>> {
        self.weight_spectrum
            .as_ref()
            .map(|ws| ws.slice(s![.., .., row]).to_owned())
    }
}

/// The result of averaging one slot.
#[derive(Clone, Debug, PartialEq)]
pub struct AveragedRow {
    /// One `[corr, chan]` array per data column.
    pub data: Vec<Array2<Vis>>,
    pub flags: Array2<bool>,
    pub weight: Vec<f32>,
    pub sigma: Vec<f32>,
    pub weight_spectrum: Option<Array2<f32>>,
    pub time_centroid: f64,
    pub exposure: f64,
    pub flag_row: bool,
    /// The prepared row whose timestamp is closest to the bin time. Scalar
    /// identifiers and UVW are taken from it.
    pub best_row: usize,
}

/// The prepared row in `slot` closest in time to `bin_time`; the earliest
/// listed row wins ties.
pub fn best_match_row(chunk: &SampleChunk, slot: &[usize], bin_time: f64) -> usize {
    let mut best = slot[0];
    let mut best_dt = (chunk.times[best] - bin_time).abs();

    for &r in &slot[1..] {
        let dt = (chunk.times[r] - bin_time).abs();

        if dt < best_dt {
            best = r;
            best_dt = dt;
        }
    }

    best
}

/// Collapse the prepared rows listed in `slot` into a single row.
///
/// Each (correlation, channel) element is the weighted mean of its
/// unflagged contributions, using WEIGHT_SPECTRUM when the chunk carries it
/// and the per-correlation row weights otherwise. An element with no
/// unflagged contribution, or whose weights sum to zero, is zero and
/// flagged. `slot` must not be empty.
pub fn average_slot(chunk: &SampleChunk, slot: &[usize], bin_time: f64) -> AveragedRow {
    let (n_corr, n_chan) = chunk.sample_shape();
    let n_col = chunk.data.len();

    let mut sums = vec![Array2::<Complex<f64>>::zeros((n_corr, n_chan)); n_col];
    let mut wsum = Array2::<f64>::zeros((n_corr, n_chan));
    let mut seen = Array2::from_elem((n_corr, n_chan), false);
    let mut corr_weight = vec![0f64; n_corr];
    let mut tc_sum = 0.;
    let mut exp_sum = 0.;
    let mut total_weight = 0.;

    for &r in slot {
        let mut row_weight = 0.;

        for corr in 0..n_corr {
            let w_corr = chunk.weights[[corr, r]] as f64;
            let mut used = false;

            for chan in 0..n_chan {
                if chunk.flags[[corr, chan, r]] {
                    continue;
                }

                let w = match chunk.weight_spectrum {
                    Some(ref ws) => ws[[corr, chan, r]] as f64,
                    None => w_corr,
                };

                used = true;
                seen[[corr, chan]] = true;
                wsum[[corr, chan]] += w;

                for (col, sum) in sums.iter_mut().enumerate() {
                    let v = chunk.data[col][[corr, chan, r]];
                    sum[[corr, chan]] += Complex::new(v.re as f64, v.im as f64) * w;
                }
            }

            if used {
                corr_weight[corr] += w_corr;
                row_weight += w_corr;
            }
        }

        tc_sum += row_weight * chunk.time_centroids[r];
        exp_sum += row_weight * chunk.exposures[r];
        total_weight += row_weight;
    }

    let flags = Array2::from_shape_fn((n_corr, n_chan), |ij| !seen[ij] || wsum[ij] == 0.);

    let data = sums
        .into_iter()
        .map(|sum| {
            Array2::from_shape_fn((n_corr, n_chan), |ij| {
                if flags[ij] {
                    Complex::new(0., 0.)
                } else {
                    let m = sum[ij] / wsum[ij];
                    Complex::new(m.re as f32, m.im as f32)
                }
            })
        })
        .collect();

    let weight: Vec<f32> = corr_weight.iter().map(|w| *w as f32).collect();
    let sigma = weight
        .iter()
        .map(|w| if *w > 0. { 1. / w.sqrt() } else { 0. })
        .collect();

    let n = slot.len() as f64;

    let (time_centroid, exposure) = if total_weight > 0. {
        (tc_sum / total_weight, exp_sum * n / total_weight)
    } else {
        (
            slot.iter().map(|r| chunk.time_centroids[*r]).sum::<f64>() / n,
            slot.iter().map(|r| chunk.exposures[*r]).sum::<f64>(),
        )
    };

    AveragedRow {
        data,
        flag_row: flags.iter().all(|f| *f),
        flags,
        weight,
        sigma,
        weight_spectrum: chunk
            .weight_spectrum
            .as_ref()
            .map(|_| wsum.mapv(|w| w as f32)),
        time_centroid,
        exposure,
        best_row: best_match_row(chunk, slot, bin_time),
    }
}
