// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!
Reading and writing the flags of derived polarization products.

A derived product such as Stokes I is flagged whenever any of the raw
correlations it is formed from is flagged, and flagging it means flagging all
of them. [`FlagMapper`] expresses both directions on top of up to three
borrowed flag planes:

- the *common* plane, the working flags that downstream consumers see;
- the optional *original* plane, the flags as they were read, never written;
- the optional *private* plane, recording what the current agent flagged.

Every plane carries a `[correlation, channel, row]` cube plus a per-row flag
vector. Writes go to the common plane and are mirrored into the private plane
when one is attached.

*/

use msplit_core::{check_shape, Array3, ArrayView3, ArrayViewMut3, CoreError};
use msplit_core::ndarray::{ArrayView1, ArrayViewMut1};

use crate::{CorrelationSelection, VisDataError};

/// Flag access for derived products over borrowed flag planes.
#[derive(Debug)]
pub struct FlagMapper<'a> {
    selection: &'a CorrelationSelection,
    common: ArrayViewMut3<'a, bool>,
    common_row: ArrayViewMut1<'a, bool>,
    original: Option<(ArrayView3<'a, bool>, ArrayView1<'a, bool>)>,
    private: Option<(ArrayViewMut3<'a, bool>, ArrayViewMut1<'a, bool>)>,
}

impl<'a> FlagMapper<'a> {
    /// Create a mapper over the common plane.
    pub fn new(
        selection: &'a CorrelationSelection,
        common: ArrayViewMut3<'a, bool>,
        common_row: ArrayViewMut1<'a, bool>,
    ) -> Result<Self, VisDataError> {
        let shape = common.shape();

        if shape[0] < selection.min_corr_extent() {
            return Err(CoreError::ShapeMismatch {
                what: "correlation axis of flag cube".to_owned(),
                expected: vec![selection.min_corr_extent(), shape[1], shape[2]],
                actual: shape.to_vec(),
            }
            .into());
        }

        check_shape("row flags", &[shape[2]], common_row.shape())?;

        Ok(FlagMapper {
            selection,
            common,
            common_row,
            original: None,
            private: None,
        })
    }

    /// Attach the read-only original plane.
    pub fn with_original(
        mut self,
        cube: ArrayView3<'a, bool>,
        row: ArrayView1<'a, bool>,
    ) -> Result<Self, VisDataError> {
        check_shape("original flag cube", self.common.shape(), cube.shape())?;
        check_shape("original row flags", self.common_row.shape(), row.shape())?;
        self.original = Some((cube, row));
        Ok(self)
    }

    /// Attach the private plane.
    pub fn with_private(
        mut self,
        cube: ArrayViewMut3<'a, bool>,
        row: ArrayViewMut1<'a, bool>,
    ) -> Result<Self, VisDataError> {
        check_shape("private flag cube", self.common.shape(), cube.shape())?;
        check_shape("private row flags", self.common_row.shape(), row.shape())?;
        self.private = Some((cube, row));
        Ok(self)
    }

    pub fn n_products(&self) -> usize {
        self.selection.len()
    }

    pub fn n_chan(&self) -> usize {
        self.common.shape()[1]
    }

    pub fn n_rows(&self) -> usize {
        self.common.shape()[2]
    }

    fn positions(&self, pos: usize) -> &'a [usize] {
        let sel: &'a CorrelationSelection = self.selection;
        &sel.recipes()[pos].positions
    }

    /// The working flag of output product `pos`: set if any contributing
    /// correlation is flagged in the common plane.
    pub fn get_combined_flag(&self, pos: usize, chan: usize, row: usize) -> bool {
        self.positions(pos)
            .iter()
            .any(|p| self.common[[*p, chan, row]])
    }

    /// Like `get_combined_flag`, but reading the original plane. Reports
    /// false if there is no original plane.
    pub fn get_original_flag(&self, pos: usize, chan: usize, row: usize) -> bool {
        match self.original {
            Some((ref cube, _)) => self.positions(pos).iter().any(|p| cube[[*p, chan, row]]),
            None => false,
        }
    }

    /// Like `get_combined_flag`, but reading the private plane. Reports
    /// false if there is no private plane.
    pub fn get_private_flag(&self, pos: usize, chan: usize, row: usize) -> bool {
        match self.private {
            Some((ref cube, _)) => self.positions(pos).iter().any(|p| cube[[*p, chan, row]]),
            None => false,
        }
    }

    /// Set the flag of every correlation contributing to output product `pos`.
    pub fn set_flag(&mut self, pos: usize, chan: usize, row: usize, value: bool) {
        for p in self.positions(pos) {
            self.common[[*p, chan, row]] = value;

            if let Some((ref mut cube, _)) = self.private {
                cube[[*p, chan, row]] = value;
            }
        }
    }

    pub fn get_row_flag(&self, row: usize) -> bool {
        self.common_row[row]
    }

    pub fn get_original_row_flag(&self, row: usize) -> bool {
        self.original.as_ref().map_or(false, |(_, r)| r[row])
    }

    pub fn get_private_row_flag(&self, row: usize) -> bool {
        self.private.as_ref().map_or(false, |(_, r)| r[row])
    }

    pub fn set_row_flag(&mut self, row: usize, value: bool) {
        self.common_row[row] = value;

        if let Some((_, ref mut r)) = self.private {
            r[row] = value;
        }
    }

    /// Set the flags of every selected correlation in every channel of a row.
    pub fn apply_flag_in_row(&mut self, row: usize, value: bool) {
        for pos in 0..self.n_products() {
            for chan in 0..self.n_chan() {
                self.set_flag(pos, chan, row, value);
            }
        }
    }

    /// Compute the working flag of every output product, channel, and row.
    pub fn combined_cube(&self) -> Array3<bool> {
        Array3::from_shape_fn((self.n_products(), self.n_chan(), self.n_rows()), |(p, c, r)| {
            self.get_combined_flag(p, c, r)
        })
    }
}
