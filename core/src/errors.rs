// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!
Core error types used by msplit crates.

Higher-level crates define their own `thiserror` enums and wrap this one
transparently.

*/

use thiserror::Error;

/// An error arising from mismatched array geometry.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoreError {
    /// An array did not have the expected dimensionality.
    #[error("expected {expected}-dimensional array but found one that was {actual}-dimensional")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An array had the right dimensionality but the wrong extent.
    #[error("array shape mismatch in {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

/// A result whose error type is `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Check that `actual` matches the `expected` array shape.
///
/// `what` names the quantity being checked and is echoed in the error.
pub fn check_shape(what: &str, expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected.len() != actual.len() {
        return Err(CoreError::DimensionMismatch {
            expected: expected.len(),
            actual: actual.len(),
        });
    }

    if expected != actual {
        return Err(CoreError::ShapeMismatch {
            what: what.to_owned(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }

    Ok(())
}
