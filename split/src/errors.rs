// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!
Error types for the msplit crate.

Every fatal condition is detected before the first output row is allocated,
so an `Err` from the splitter never leaves a half-written dataset behind.
Recoverable conditions, such as a time bin whose samples are all flagged,
are handled where they arise and never show up here.

*/

use msplit_visdata::VisDataError;
use thiserror::Error;

use crate::remap::Category;
use crate::table::TableError;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum SplitError {
    #[error("no rows survive the selection")]
    EmptySelection,

    #[error("{category} value {value} has no dense index")]
    UnmappedValue { category: Category, value: i32 },

    #[error("time bin width must be a positive, finite number of seconds; got {0}")]
    InvalidBinWidth(f64),

    #[error(
        "cannot time-average spectral windows whose output sample shapes differ ({shapes}); \
         average each window separately and recombine the results"
    )]
    UnsupportedShape { shapes: String },

    #[error("invalid {what} selection \"{expr}\": {reason}")]
    BadSelection {
        what: &'static str,
        expr: String,
        reason: String,
    },

    #[error(
        "channel selection for spectral window {spw} (start {start}, {nchan} channels, \
         step {step}) does not fit in its {available} channels"
    )]
    BadChannelRange {
        spw: i32,
        start: usize,
        nchan: usize,
        step: usize,
        available: usize,
    },

    #[error("unrecognized data column name \"{0}\"")]
    BadDataColumn(String),

    #[error("inconsistent input dataset: {0}")]
    Inconsistent(String),

    #[error(transparent)]
    VisData(#[from] VisDataError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Core(#[from] msplit_core::CoreError),
}

pub type Result<T> = std::result::Result<T, SplitError>;

/// Format an `Inconsistent` error.
macro_rules! inconsistent {
    ($( $fmt_args:expr ),*) => {
        Err($crate::errors::SplitError::Inconsistent(format!($( $fmt_args ),*)))
    }
}
