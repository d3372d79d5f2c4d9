// Copyright 2017-2026 Peter Williams
// Licensed under the MIT License.

//! Working with interferometric visibility data.
//!
//! This crate knows about polarization products and how they are laid out
//! inside a visibility sample array, how to combine raw correlation products
//! into derived quantities such as Stokes parameters, and how to read and
//! write the flags of those derived quantities through several flag planes
//! at once.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod flagmap;
pub mod polmap;

pub use flagmap::FlagMapper;
pub use polmap::{CombineRule, CorrelationSelection, Recipe, UnitaryFn, VisMapper};

/// Errors arising in this crate.
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum VisDataError {
    #[error("unrecognized polarization code {0}")]
    UnknownStokesCode(i32),

    #[error("unrecognized polarization name \"{0}\"")]
    UnknownPolName(String),

    #[error("correlation product {0} appears more than once in a sample layout")]
    DuplicateCorrelation(VisPol),

    #[error("none of the correlation products requested in \"{expr}\" can be formed from the available products ({available})")]
    UnresolvableCorrelation { expr: String, available: String },

    #[error(transparent)]
    Core(#[from] msplit_core::CoreError),
}

/// A "feed pol(arization)" is the polarization component sampled by a
/// particular receptor on an radio antenna.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FeedPol {
    X,
    Y,
    R,
    L,
}

/// A "vis(ibility) pol(arization)" is the polarization sampled by the
/// cross-correlation of the voltages of two radio receptors, or a Stokes
/// parameter derived from such products.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum VisPol {
    XX,
    XY,
    YX,
    YY,
    RR,
    RL,
    LR,
    LL,
    I,
    Q,
    U,
    V,
}

impl VisPol {
    /// Decode a CASA "Stokes" enumeration value, as found in the CORR_TYPE
    /// column of a POLARIZATION table.
    pub fn from_stokes_code(code: i32) -> Result<Self, VisDataError> {
        Ok(match code {
            1 => VisPol::I,
            2 => VisPol::Q,
            3 => VisPol::U,
            4 => VisPol::V,
            5 => VisPol::RR,
            6 => VisPol::RL,
            7 => VisPol::LR,
            8 => VisPol::LL,
            9 => VisPol::XX,
            10 => VisPol::XY,
            11 => VisPol::YX,
            12 => VisPol::YY,
            other => return Err(VisDataError::UnknownStokesCode(other)),
        })
    }

    /// The CASA "Stokes" enumeration value of this product.
    pub fn stokes_code(self) -> i32 {
        match self {
            VisPol::I => 1,
            VisPol::Q => 2,
            VisPol::U => 3,
            VisPol::V => 4,
            VisPol::RR => 5,
            VisPol::RL => 6,
            VisPol::LR => 7,
            VisPol::LL => 8,
            VisPol::XX => 9,
            VisPol::XY => 10,
            VisPol::YX => 11,
            VisPol::YY => 12,
        }
    }

    /// The feeds correlated to produce this product, or None for Stokes
    /// parameters.
    pub fn feeds(self) -> Option<(FeedPol, FeedPol)> {
        match self {
            VisPol::XX => Some((FeedPol::X, FeedPol::X)),
            VisPol::XY => Some((FeedPol::X, FeedPol::Y)),
            VisPol::YX => Some((FeedPol::Y, FeedPol::X)),
            VisPol::YY => Some((FeedPol::Y, FeedPol::Y)),
            VisPol::RR => Some((FeedPol::R, FeedPol::R)),
            VisPol::RL => Some((FeedPol::R, FeedPol::L)),
            VisPol::LR => Some((FeedPol::L, FeedPol::R)),
            VisPol::LL => Some((FeedPol::L, FeedPol::L)),
            VisPol::I | VisPol::Q | VisPol::U | VisPol::V => None,
        }
    }

    pub fn is_stokes(self) -> bool {
        self.feeds().is_none()
    }

    pub fn name(self) -> &'static str {
        match self {
            VisPol::XX => "XX",
            VisPol::XY => "XY",
            VisPol::YX => "YX",
            VisPol::YY => "YY",
            VisPol::RR => "RR",
            VisPol::RL => "RL",
            VisPol::LR => "LR",
            VisPol::LL => "LL",
            VisPol::I => "I",
            VisPol::Q => "Q",
            VisPol::U => "U",
            VisPol::V => "V",
        }
    }
}

impl fmt::Display for VisPol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VisPol {
    type Err = VisDataError;

    fn from_str(s: &str) -> Result<Self, VisDataError> {
        Ok(match s.to_ascii_uppercase().as_ref() {
            "XX" => VisPol::XX,
            "XY" => VisPol::XY,
            "YX" => VisPol::YX,
            "YY" => VisPol::YY,
            "RR" => VisPol::RR,
            "RL" => VisPol::RL,
            "LR" => VisPol::LR,
            "LL" => VisPol::LL,
            "I" => VisPol::I,
            "Q" => VisPol::Q,
            "U" => VisPol::U,
            "V" => VisPol::V,
            _ => return Err(VisDataError::UnknownPolName(s.to_owned())),
        })
    }
}

/// Where each correlation product lives along the correlation axis of a
/// sample array.
///
/// Offsets are unique and each product appears at most once. The map is
/// read-only once built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CorrPositionMap {
    positions: BTreeMap<VisPol, usize>,
    order: Vec<VisPol>,
}

impl CorrPositionMap {
    /// Build a map from the products in on-disk order.
    pub fn new<I: IntoIterator<Item = VisPol>>(products: I) -> Result<Self, VisDataError> {
        let mut map = CorrPositionMap::default();

        for (offset, pol) in products.into_iter().enumerate() {
            if map.positions.insert(pol, offset).is_some() {
                return Err(VisDataError::DuplicateCorrelation(pol));
            }

            map.order.push(pol);
        }

        Ok(map)
    }

    /// Build a map from a CORR_TYPE vector of CASA Stokes codes.
    pub fn from_corr_types(codes: &[i32]) -> Result<Self, VisDataError> {
        let pols = codes
            .iter()
            .map(|c| VisPol::from_stokes_code(*c))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(pols)
    }

    /// The offset of the given product, if it is present.
    pub fn position(&self, pol: VisPol) -> Option<usize> {
        self.positions.get(&pol).copied()
    }

    pub fn contains(&self, pol: VisPol) -> bool {
        self.positions.contains_key(&pol)
    }

    /// The number of correlations in the layout.
    pub fn n_corr(&self) -> usize {
        self.order.len()
    }

    /// The products in offset order.
    pub fn products(&self) -> &[VisPol] {
        &self.order[..]
    }
}

impl fmt::Display for CorrPositionMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;

        for pol in &self.order {
            if !first {
                f.write_str(",")?;
            }

            write!(f, "{pol}")?;
            first = false;
        }

        Ok(())
    }
}
