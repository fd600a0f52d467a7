//! Affine transforms and their time derivatives.
//!
//! Transforms are plain [`Matrix4`] values acting on column vectors. A
//! *position-type* transform has bottom row `(0, 0, 0, 1)`; a
//! *derivative-type* transform (the time or parameter derivative of a
//! position-type one) has bottom row `(0, 0, 0, 0)`. Ordinary matrix
//! products and sums then give the right type automatically: a product
//! containing one derivative factor is a derivative, a sum of derivatives is
//! a derivative.
//!
//! A [`TrfJet`] carries a transform together with its first three time
//! derivatives. Multiplying jets applies the Leibniz rule and inverting a jet
//! applies the identities obtained by differentiating `P · P⁻¹ = I`:
//!
//! ```text
//! Q   = P⁻¹
//! Q'  = −Q·P'·Q
//! Q'' = Q·(2·P'·Q·P' − P'')·Q
//! Q'''= Q·(3·P'·Q·P'' + 3·P''·Q·P' − 6·P'·Q·P'·Q·P' − P''')·Q
//! ```

use nalgebra::{Matrix3, Matrix4, Vector3, Vector6};

/// A 4x4 affine transform (position-type or derivative-type).
pub type Trf = Matrix4<f64>;

/// Position-type translation.
#[must_use]
pub fn translation(x: f64, y: f64, z: f64) -> Trf {
    let mut trf = Trf::identity();
    trf[(0, 3)] = x;
    trf[(1, 3)] = y;
    trf[(2, 3)] = z;
    trf
}

/// Build a transform from three basis columns and an origin column.
///
/// `derivative` selects the bottom-right entry (0 for derivative-type).
#[must_use]
pub fn from_columns(
    x: &Vector3<f64>,
    y: &Vector3<f64>,
    z: &Vector3<f64>,
    origin: &Vector3<f64>,
    derivative: bool,
) -> Trf {
    let mut trf = Trf::zeros();
    trf.fixed_view_mut::<3, 1>(0, 0).copy_from(x);
    trf.fixed_view_mut::<3, 1>(0, 1).copy_from(y);
    trf.fixed_view_mut::<3, 1>(0, 2).copy_from(z);
    trf.fixed_view_mut::<3, 1>(0, 3).copy_from(origin);
    if !derivative {
        trf[(3, 3)] = 1.0;
    }
    trf
}

/// Position-type transform from a rotation block and a translation.
#[must_use]
pub fn from_parts(rotation: &Matrix3<f64>, offset: &Vector3<f64>) -> Trf {
    let mut trf = Trf::identity();
    trf.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
    trf.fixed_view_mut::<3, 1>(0, 3).copy_from(offset);
    trf
}

/// Whether a transform is derivative-type (zero bottom row).
#[must_use]
pub fn is_derivative(trf: &Trf) -> bool {
    trf[(3, 3)] == 0.0 && trf[(3, 0)] == 0.0 && trf[(3, 1)] == 0.0 && trf[(3, 2)] == 0.0
}

/// Inverse of a position-type affine transform.
///
/// The linear block is inverted in general form so non-orthonormal blocks
/// are handled; a singular block falls back to its transpose.
#[must_use]
pub fn inverse(trf: &Trf) -> Trf {
    let linear = trf.fixed_view::<3, 3>(0, 0).into_owned();
    let inv_linear = linear.try_inverse().unwrap_or_else(|| linear.transpose());
    let offset = trf.fixed_view::<3, 1>(0, 3).into_owned();
    from_parts(&inv_linear, &(-(inv_linear * offset)))
}

/// Translation column of a transform.
#[must_use]
pub fn offset(trf: &Trf) -> Vector3<f64> {
    trf.fixed_view::<3, 1>(0, 3).into_owned()
}

/// Apply a transform to a point.
#[must_use]
pub fn transform_point(trf: &Trf, p: &Vector3<f64>) -> Vector3<f64> {
    trf.fixed_view::<3, 3>(0, 0) * p + trf.fixed_view::<3, 1>(0, 3)
}

/// The six loop-closure residual components of a transform.
///
/// Three off-diagonal rotation entries `(0,2)`, `(1,0)`, `(2,1)` followed by
/// the translation column. All six vanish for the identity.
#[must_use]
pub fn residual(trf: &Trf) -> Vector6<f64> {
    Vector6::new(
        trf[(0, 2)],
        trf[(1, 0)],
        trf[(2, 1)],
        trf[(0, 3)],
        trf[(1, 3)],
        trf[(2, 3)],
    )
}

/// Largest rotational and translational closure error of a transform that
/// should be the identity.
#[must_use]
pub fn closure_error(trf: &Trf) -> (f64, f64) {
    let rot = trf[(0, 2)]
        .abs()
        .max(trf[(1, 0)].abs())
        .max(trf[(2, 1)].abs());
    (rot, offset(trf).norm())
}

/// A transform with its first three time derivatives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrfJet {
    /// Position-type value.
    pub pos: Trf,
    /// First time derivative.
    pub der1: Trf,
    /// Second time derivative.
    pub der2: Trf,
    /// Third time derivative.
    pub der3: Trf,
}

impl Default for TrfJet {
    fn default() -> Self {
        Self::identity()
    }
}

impl TrfJet {
    /// Identity with zero derivatives.
    #[must_use]
    pub fn identity() -> Self {
        Self::constant(Trf::identity())
    }

    /// A time-invariant transform.
    #[must_use]
    pub fn constant(pos: Trf) -> Self {
        Self {
            pos,
            der1: Trf::zeros(),
            der2: Trf::zeros(),
            der3: Trf::zeros(),
        }
    }

    /// Build a jet from its four components.
    #[must_use]
    pub const fn new(pos: Trf, der1: Trf, der2: Trf, der3: Trf) -> Self {
        Self {
            pos,
            der1,
            der2,
            der3,
        }
    }

    /// Component of the given order (0 = position, 1..=3 = derivatives).
    ///
    /// Orders above 3 are zero.
    #[must_use]
    pub fn order(&self, order: usize) -> Trf {
        match order {
            0 => self.pos,
            1 => self.der1,
            2 => self.der2,
            3 => self.der3,
            _ => Trf::zeros(),
        }
    }

    /// Product `self · rhs` with the Leibniz rule.
    #[must_use]
    pub fn compose(&self, rhs: &Self) -> Self {
        Self {
            pos: self.pos * rhs.pos,
            der1: self.der1 * rhs.pos + self.pos * rhs.der1,
            der2: self.der2 * rhs.pos + 2.0 * self.der1 * rhs.der1 + self.pos * rhs.der2,
            der3: self.der3 * rhs.pos
                + 3.0 * self.der2 * rhs.der1
                + 3.0 * self.der1 * rhs.der2
                + self.pos * rhs.der3,
        }
    }

    /// Product `self · c` with a constant transform.
    #[must_use]
    pub fn then_constant(&self, c: &Trf) -> Self {
        Self {
            pos: self.pos * c,
            der1: self.der1 * c,
            der2: self.der2 * c,
            der3: self.der3 * c,
        }
    }

    /// Product `c · self` with a constant transform.
    #[must_use]
    pub fn after_constant(&self, c: &Trf) -> Self {
        Self {
            pos: c * self.pos,
            der1: c * self.der1,
            der2: c * self.der2,
            der3: c * self.der3,
        }
    }

    /// Jet of the inverse transform.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let q = inverse(&self.pos);
        Self::inverse_with(&q, &self.der1, &self.der2, &self.der3)
    }

    /// Jet of the inverse given `q = pos⁻¹` and the derivatives of `pos`.
    #[must_use]
    pub fn inverse_with(q: &Trf, d1: &Trf, d2: &Trf, d3: &Trf) -> Self {
        let d1q = d1 * q;
        let d2q = d2 * q;
        let d1qd1 = d1q * d1;

        let inv1 = -(q * d1q);
        let inv2 = q * (2.0 * d1qd1 - d2) * q;
        let inv3 = q * (3.0 * d1q * d2 + 3.0 * d2q * d1 - 6.0 * d1q * d1qd1 - d3) * q;

        Self {
            pos: *q,
            der1: inv1,
            der2: inv2,
            der3: inv3,
        }
    }
}

impl std::ops::Mul for &TrfJet {
    type Output = TrfJet;

    fn mul(self, rhs: Self) -> TrfJet {
        self.compose(rhs)
    }
}

impl std::ops::Mul for TrfJet {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        self.compose(&rhs)
    }
}

/// Elementary rotation about a coordinate axis, or its `order`-th derivative
/// with respect to the angle.
///
/// Conventions (rotation block, row-major):
///
/// ```text
/// Z: [ c  s  0]   Y: [ c  0 -s]   X: [ 1  0  0]
///    [-s  c  0]      [ 0  1  0]      [ 0  c  s]
///    [ 0  0  1]      [ s  0  c]      [ 0 -s  c]
/// ```
///
/// The k-th derivative uses `cos(θ + kπ/2)`, `sin(θ + kπ/2)` and zero
/// constant entries.
#[must_use]
pub fn axis_rotation(axis: Axis, angle: f64, order: usize) -> Trf {
    #[allow(clippy::cast_precision_loss)]
    let phase = angle + order as f64 * std::f64::consts::FRAC_PI_2;
    let (s, c) = phase.sin_cos();
    let one = if order == 0 { 1.0 } else { 0.0 };

    let mut trf = Trf::zeros();
    trf[(3, 3)] = one;

    let (i, j, k) = match axis {
        Axis::Z => (0, 1, 2),
        Axis::X => (1, 2, 0),
        Axis::Y => (2, 0, 1),
    };
    trf[(i, i)] = c;
    trf[(i, j)] = s;
    trf[(j, i)] = -s;
    trf[(j, j)] = c;
    trf[(k, k)] = one;
    trf
}

/// Coordinate axis of an elementary rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Rotation about X.
    X,
    /// Rotation about Y.
    Y,
    /// Rotation about Z.
    Z,
}
