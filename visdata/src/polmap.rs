// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!
Forming derived polarization products from raw correlation products.

A request such as `"ABS I,XX"` is resolved against the products physically
present in a sample array into a list of [`Recipe`]s. Each recipe names the
one or two correlation positions that contribute to an output product and the
[`CombineRule`] that joins them. Resolution never fails outright: products
that cannot be formed are dropped. [`CorrelationSelection::resolve`] is the
checked entry point that refuses a request where nothing could be formed.

A [`VisMapper`] then binds a resolved selection to borrowed sample cubes
with axes `[correlation, channel, row]`.

Conventions for the Stokes parameters, with linear feeds:
`XX = I + Q`, `YY = I - Q`, `XY = U + iV`, `YX = U - iV`; and with
circular feeds: `RR = I + V`, `LL = I - V`, `RL = Q + iU`, `LR = Q - iU`.

*/

use msplit_core::{Array3, ArrayView3, Complex, CoreError, Vis};
use std::collections::BTreeSet;

use crate::{CorrPositionMap, VisDataError, VisPol};

/// How the one or two contributing samples of a recipe are combined.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CombineRule {
    /// The single contributing sample, unchanged.
    Identity,

    /// `a - b`.
    Difference,

    /// `(a + b) / 2`.
    HalvedSum,

    /// `(a - b) / 2`.
    HalvedDifference,

    /// `(a - b) / 2i`.
    HalvedDifferenceOverI,
}

impl CombineRule {
    /// The number of samples this rule consumes.
    pub fn n_inputs(self) -> usize {
        match self {
            CombineRule::Identity => 1,
            _ => 2,
        }
    }

    /// Combine two complex samples. `b` is ignored by `Identity`.
    pub fn combine(self, a: Vis, b: Vis) -> Vis {
        match self {
            CombineRule::Identity => a,
            CombineRule::Difference => a - b,
            CombineRule::HalvedSum => (a + b) * 0.5,
            CombineRule::HalvedDifference => (a - b) * 0.5,
            CombineRule::HalvedDifferenceOverI => {
                // d / 2i = -i d / 2
                let d = a - b;
                Complex::new(0.5 * d.im, -0.5 * d.re)
            }
        }
    }

    /// Propagate the statistical weights (inverse variances) of the inputs
    /// to the weight of the combined value.
    ///
    /// A zero or negative input weight yields a zero output weight.
    pub fn combine_weights(self, wa: f32, wb: f32) -> f32 {
        if self == CombineRule::Identity {
            return wa;
        }

        if !(wa > 0. && wb > 0.) {
            return 0.;
        }

        let var = 1. / wa + 1. / wb;

        if self == CombineRule::Difference {
            1. / var
        } else {
            4. / var
        }
    }
}

/// The function applied to a combined complex value to obtain a scalar.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum UnitaryFn {
    Real,
    Imag,
    Arg,
    #[default]
    Abs,
    /// The squared magnitude.
    Norm,
}

impl UnitaryFn {
    /// Find the function named in an expression, falling back to `Abs`.
    ///
    /// The first function name found in the expression wins.
    pub fn from_expression(expr: &str) -> Self {
        for token in tokenize(expr) {
            match token.as_ref() {
                "REAL" => return UnitaryFn::Real,
                "IMAG" => return UnitaryFn::Imag,
                "ARG" => return UnitaryFn::Arg,
                "ABS" => return UnitaryFn::Abs,
                "NORM" => return UnitaryFn::Norm,
                _ => {}
            }
        }

        UnitaryFn::Abs
    }

    pub fn apply(self, z: Vis) -> f32 {
        match self {
            UnitaryFn::Real => z.re,
            UnitaryFn::Imag => z.im,
            UnitaryFn::Arg => z.arg(),
            UnitaryFn::Abs => z.norm(),
            UnitaryFn::Norm => z.norm_sqr(),
        }
    }
}

/// One resolved output product.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recipe {
    /// A human-readable description, e.g. `I = (XX+YY)/2`.
    pub label: String,

    /// The product this recipe produces.
    pub product: VisPol,

    /// The contributing positions along the correlation axis.
    pub positions: Vec<usize>,

    pub rule: CombineRule,
}

impl Recipe {
    fn literal(map: &CorrPositionMap, product: VisPol) -> Option<Self> {
        map.position(product).map(|p| Recipe {
            label: product.name().to_owned(),
            product,
            positions: vec![p],
            rule: CombineRule::Identity,
        })
    }

    fn derived(
        map: &CorrPositionMap,
        product: VisPol,
        a: VisPol,
        b: VisPol,
        rule: CombineRule,
    ) -> Option<Self> {
        let pa = map.position(a)?;
        let pb = map.position(b)?;

        let label = match rule {
            CombineRule::Identity => product.name().to_owned(),
            CombineRule::Difference => format!("{product} = {a}-{b}"),
            CombineRule::HalvedSum => format!("{product} = ({a}+{b})/2"),
            CombineRule::HalvedDifference => format!("{product} = ({a}-{b})/2"),
            CombineRule::HalvedDifferenceOverI => format!("{product} = ({a}-{b})/2i"),
        };

        Some(Recipe {
            label,
            product,
            positions: vec![pa, pb],
            rule,
        })
    }

    /// Combine the contributing samples, fetched through `sample`.
    pub fn apply<F: Fn(usize) -> Vis>(&self, sample: F) -> Vis {
        let a = sample(self.positions[0]);
        let b = match self.positions.get(1) {
            Some(p) => sample(*p),
            None => a,
        };
        self.rule.combine(a, b)
    }

    /// Combine the weights of the contributing positions, fetched through
    /// `weight`.
    pub fn apply_weights<F: Fn(usize) -> f32>(&self, weight: F) -> f32 {
        let a = weight(self.positions[0]);
        let b = match self.positions.get(1) {
            Some(p) => weight(*p),
            None => a,
        };
        self.rule.combine_weights(a, b)
    }
}

fn tokenize(expr: &str) -> impl Iterator<Item = String> + '_ {
    expr.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_uppercase())
}

/// Resolve a product request against the available products.
///
/// Requested products are visited in a fixed priority order (WVR, XX, YY,
/// XY, YX, RR, LL, LR, RL, I, Q, U, V), not in the order they appear in the
/// expression. Each output product is produced at most once. Tokens that
/// cannot be satisfied are omitted, so the result may be empty.
pub fn resolve_recipes(expr: &str, map: &CorrPositionMap) -> Vec<Recipe> {
    use CombineRule::*;
    use VisPol::*;

    let tokens: BTreeSet<String> = tokenize(expr).collect();
    let mut recipes: Vec<Recipe> = Vec::new();

    const PRIORITY: &[&str] = &[
        "WVR", "XX", "YY", "XY", "YX", "RR", "LL", "LR", "RL", "I", "Q", "U", "V",
    ];

    for &name in PRIORITY {
        if !tokens.contains(name) {
            continue;
        }

        let candidate = match name {
            // Water-vapor radiometer data are recorded as total intensity.
            "WVR" => Recipe::literal(map, I),
            "I" => Recipe::literal(map, I)
                .or_else(|| Recipe::derived(map, I, XX, YY, HalvedSum))
                .or_else(|| Recipe::derived(map, I, RR, LL, HalvedSum)),
            "Q" => Recipe::literal(map, Q)
                .or_else(|| Recipe::derived(map, Q, XX, YY, HalvedDifference))
                .or_else(|| Recipe::derived(map, Q, RL, LR, HalvedSum)),
            "U" => Recipe::literal(map, U)
                .or_else(|| Recipe::derived(map, U, XY, YX, HalvedSum))
                .or_else(|| Recipe::derived(map, U, RL, LR, HalvedDifferenceOverI)),
            "V" => Recipe::literal(map, V)
                .or_else(|| Recipe::derived(map, V, XY, YX, HalvedDifferenceOverI))
                .or_else(|| Recipe::derived(map, V, RR, LL, HalvedDifference)),
            other => other
                .parse::<VisPol>()
                .ok()
                .and_then(|p| Recipe::literal(map, p)),
        };

        if let Some(r) = candidate {
            if !recipes.iter().any(|x| x.product == r.product) {
                recipes.push(r);
            }
        }
    }

    recipes
}

/// A resolved, non-empty set of output products plus the scalar function to
/// apply when evaluating them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationSelection {
    func: UnitaryFn,
    recipes: Vec<Recipe>,
}

impl CorrelationSelection {
    /// Resolve `expr` against `map`, failing if nothing can be formed.
    pub fn resolve(expr: &str, map: &CorrPositionMap) -> Result<Self, VisDataError> {
        let recipes = resolve_recipes(expr, map);

        if recipes.is_empty() {
            return Err(VisDataError::UnresolvableCorrelation {
                expr: expr.to_owned(),
                available: map.to_string(),
            });
        }

        Ok(CorrelationSelection {
            func: UnitaryFn::from_expression(expr),
            recipes,
        })
    }

    /// Select every available product unchanged, in layout order.
    pub fn all(map: &CorrPositionMap) -> Self {
        let recipes = map
            .products()
            .iter()
            .filter_map(|p| Recipe::literal(map, *p))
            .collect();

        CorrelationSelection {
            func: UnitaryFn::default(),
            recipes,
        }
    }

    pub fn recipes(&self) -> &[Recipe] {
        &self.recipes[..]
    }

    pub fn func(&self) -> UnitaryFn {
        self.func
    }

    /// The number of output products.
    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// The output products, in output order.
    pub fn products(&self) -> Vec<VisPol> {
        self.recipes.iter().map(|r| r.product).collect()
    }

    /// True if every output product is a raw input product at its original
    /// position.
    pub fn is_identity(&self, n_corr: usize) -> bool {
        self.recipes.len() == n_corr
            && self
                .recipes
                .iter()
                .enumerate()
                .all(|(i, r)| r.rule == CombineRule::Identity && r.positions[0] == i)
    }

    /// The highest correlation position any recipe touches, plus one.
    pub(crate) fn min_corr_extent(&self) -> usize {
        self.recipes
            .iter()
            .flat_map(|r| r.positions.iter())
            .map(|p| p + 1)
            .max()
            .unwrap_or(0)
    }

    /// Bind this selection to sample data.
    ///
    /// If `right` is given, every raw sample is taken as the difference
    /// `left - right` before the recipes are applied.
    pub fn bind<'a>(
        &'a self,
        left: ArrayView3<'a, Vis>,
        right: Option<ArrayView3<'a, Vis>>,
    ) -> Result<VisMapper<'a>, VisDataError> {
        let shape = left.shape();

        if shape[0] < self.min_corr_extent() {
            return Err(CoreError::ShapeMismatch {
                what: "correlation axis of sample cube".to_owned(),
                expected: vec![self.min_corr_extent(), shape[1], shape[2]],
                actual: shape.to_vec(),
            }
            .into());
        }

        if let Some(ref r) = right {
            msplit_core::check_shape("right-hand sample cube", shape, r.shape())?;
        }

        Ok(VisMapper {
            selection: self,
            left,
            right,
        })
    }
}

/// A correlation selection bound to borrowed sample cubes.
#[derive(Debug)]
pub struct VisMapper<'a> {
    selection: &'a CorrelationSelection,
    left: ArrayView3<'a, Vis>,
    right: Option<ArrayView3<'a, Vis>>,
}

impl<'a> VisMapper<'a> {
    fn raw(&self, corr: usize, chan: usize, row: usize) -> Vis {
        let a = self.left[[corr, chan, row]];

        match self.right {
            Some(ref r) => CombineRule::Difference.combine(a, r[[corr, chan, row]]),
            None => a,
        }
    }

    /// The number of output products.
    pub fn n_products(&self) -> usize {
        self.selection.len()
    }

    /// The combined complex value of output product `pos`.
    pub fn correlation_product(&self, pos: usize, chan: usize, row: usize) -> Vis {
        self.selection.recipes[pos].apply(|c| self.raw(c, chan, row))
    }

    /// The scalar value of output product `pos`: the combined value passed
    /// through the selection's unitary function.
    pub fn evaluate(&self, pos: usize, chan: usize, row: usize) -> f32 {
        self.selection
            .func
            .apply(self.correlation_product(pos, chan, row))
    }

    /// Compute every output product for every channel and row.
    pub fn derived_cube(&self) -> Array3<Vis> {
        let (_, n_chan, n_row) = self.left.dim();

        Array3::from_shape_fn((self.n_products(), n_chan, n_row), |(p, c, r)| {
            self.correlation_product(p, c, r)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn map(pols: &[VisPol]) -> CorrPositionMap {
        CorrPositionMap::new(pols.iter().copied()).unwrap()
    }

    #[test]
    fn literal_needs_presence() {
        let circ = map(&[VisPol::RR, VisPol::LL]);
        assert!(resolve_recipes("XX", &circ).is_empty());
        assert!(CorrelationSelection::resolve("XX", &circ).is_err());
    }

    #[test]
    fn stokes_i_from_linear() {
        let lin = map(&[VisPol::XX, VisPol::YY]);
        let r = resolve_recipes("I", &lin);
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].rule, CombineRule::HalvedSum);
        assert_eq!(r[0].positions, vec![0, 1]);
        assert_eq!(r[0].label, "I = (XX+YY)/2");

        let half = map(&[VisPol::XX]);
        assert!(resolve_recipes("I", &half).is_empty());
    }

    #[test]
    fn priority_order_and_dedup() {
        let full = map(&[VisPol::RR, VisPol::RL, VisPol::LR, VisPol::LL]);
        let r = resolve_recipes("v,i,ll,wvr,I", &full);
        let labels: Vec<_> = r.iter().map(|x| x.label.as_str()).collect();
        assert_eq!(labels, vec!["LL", "I = (RR+LL)/2", "V = (RR-LL)/2"]);
    }

    #[test]
    fn whole_tokens_only() {
        // "IMAG" selects a function; it must not be read as a request for I.
        let lin = map(&[VisPol::XX, VisPol::YY]);
        assert!(resolve_recipes("IMAG XX", &lin).len() == 1);
        assert_eq!(UnitaryFn::from_expression("imag xx"), UnitaryFn::Imag);
        assert_eq!(UnitaryFn::from_expression("xx"), UnitaryFn::Abs);
    }

    #[test]
    fn combine_rules() {
        let a = Complex::new(3.0f32, 1.0);
        let b = Complex::new(1.0f32, -1.0);

        assert_eq!(CombineRule::Identity.combine(a, b), a);
        assert_eq!(CombineRule::Difference.combine(a, b), Complex::new(2., 2.));
        assert_eq!(CombineRule::HalvedSum.combine(a, b), Complex::new(2., 0.));
        assert_eq!(CombineRule::HalvedDifference.combine(a, b), Complex::new(1., 1.));

        let q = CombineRule::HalvedDifferenceOverI.combine(a, b);
        let back = q * Complex::new(0.0f32, 2.0);
        assert_abs_diff_eq!(back.re, 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(back.im, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn weights() {
        assert_eq!(CombineRule::Identity.combine_weights(3., 0.), 3.);
        assert_eq!(CombineRule::HalvedSum.combine_weights(2., 0.), 0.);
        assert_abs_diff_eq!(CombineRule::HalvedSum.combine_weights(2., 2.), 4.0);
        assert_abs_diff_eq!(CombineRule::Difference.combine_weights(2., 2.), 1.0);
    }

    #[test]
    fn mapper_evaluates() {
        let lin = map(&[VisPol::XX, VisPol::XY, VisPol::YX, VisPol::YY]);
        let sel = CorrelationSelection::resolve("real I, V", &lin).unwrap();
        assert_eq!(sel.products(), vec![VisPol::I, VisPol::V]);

        // one channel, one row; I = 1, Q = 0.5, U = 0.25, V = 0.125
        let (i, q, u, v) = (1.0f32, 0.5f32, 0.25f32, 0.125f32);
        let cube = Array3::from_shape_vec(
            (4, 1, 1),
            vec![
                Complex::new(i + q, 0.),
                Complex::new(u, v),
                Complex::new(u, -v),
                Complex::new(i - q, 0.),
            ],
        )
        .unwrap();

        let m = sel.bind(cube.view(), None).unwrap();
        assert_eq!(m.n_products(), 2);
        assert_abs_diff_eq!(m.evaluate(0, 0, 0), i, epsilon = 1e-6);
        assert_abs_diff_eq!(m.evaluate(1, 0, 0), v, epsilon = 1e-6);

        let model = Array3::from_elem((4, 1, 1), Complex::new(0.5f32, 0.));
        let resid = sel.bind(cube.view(), Some(model.view())).unwrap();
        assert_abs_diff_eq!(resid.correlation_product(0, 0, 0).re, i - 0.5, epsilon = 1e-6);

        let wrong = Array3::from_elem((4, 2, 1), Complex::new(0.0f32, 0.));
        assert!(sel.bind(cube.view(), Some(wrong.view())).is_err());
    }

    #[test]
    fn all_is_identity() {
        let lin = map(&[VisPol::XX, VisPol::YY]);
        let sel = CorrelationSelection::all(&lin);
        assert!(sel.is_identity(2));
        assert!(!CorrelationSelection::resolve("I", &lin)
            .unwrap()
            .is_identity(2));
    }
}
