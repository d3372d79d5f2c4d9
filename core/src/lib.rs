// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!
Core types and traits for msplit, a toolkit for carving reduced datasets out
of radio interferometric visibility data.

This crate provides the pieces shared by the other msplit crates: a common
error type for array-shape problems, convenience re-exports of the numerical
crates that show up in public APIs, and (with the `notifications` feature) a
small framework for reporting progress and problems to the user.

The `ndarray` and `num-complex` crates are re-exported so that downstream
users can be sure to name the same versions of their types that we do.

*/

pub use ndarray::{self, Array, Array1, Array2, Array3, ArrayView3, ArrayViewMut3, Axis};
pub use num_complex::{self, Complex};

pub mod errors;

#[cfg(feature = "notifications")]
#[macro_use]
pub mod notify;

pub use errors::{check_shape, CoreError, Result};

/// The type of a single visibility sample as stored on disk.
pub type Vis = Complex<f32>;
