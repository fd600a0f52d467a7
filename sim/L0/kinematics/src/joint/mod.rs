//! Joints: parametric transforms with exact time derivatives.
//!
//! A joint maps its variables to a transform from the grip frame on body 1
//! to the grip frame on body 2. Every kind is a chain of elementary factors,
//! one per variable:
//!
//! ```text
//! pos = T(n-1) · … · T(1) · T(0)
//! ```
//!
//! Each factor is differentiated along time with the chain rule
//! (`F' = D·ṡ`, `F'' = D₂·ṡ² + D·s̈`, `F''' = D₃·ṡ³ + 3·D₂·ṡ·s̈ + D·s⃛`) and
//! the factors are combined with the Leibniz rule, so the composed
//! derivatives include every cross-variable ("mixed") term. Inverse
//! derivatives follow from differentiating `pos · pos⁻¹ = I`.
//!
//! Derived transforms are cached and the caches are dropped on every write.
//! Partial derivatives with respect to single variables (the Jacobian
//! columns used by the position solver) are built with one prefix pass and
//! one suffix pass over the factor chain.
//!
//! # Example
//!
//! ```
//! use sim_kinematics::{Joint, JointKind};
//!
//! let mut joint = Joint::new("hinge", JointKind::Revolute);
//! let _ = joint.set_value(0, 0.5).unwrap();
//! let _ = joint.set_speed(0, 2.0).unwrap();
//!
//! // Rotation about Z: the (0,1) entry is sin(θ) and its rate is cos(θ)·θ̇.
//! assert!((joint.pos()[(0, 1)] - 0.5f64.sin()).abs() < 1e-12);
//! assert!((joint.der1()[(0, 1)] - 2.0 * 0.5f64.cos()).abs() < 1e-12);
//! ```

mod kind;

pub(crate) use kind::Factor;
pub use kind::{JointKind, TrackFollower};

use std::cell::OnceCell;

use crate::model::Change;
use crate::transform::{self, Trf, TrfJet};
use crate::{KinError, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Order of a joint state vector: position, speed, acceleration or jerk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Stage {
    /// Variable values.
    Position,
    /// First time derivatives.
    Speed,
    /// Second time derivatives.
    Accel,
    /// Third time derivatives.
    Jerk,
}

impl Stage {
    /// All stages in precedence order.
    pub const ALL: [Self; 4] = [Self::Position, Self::Speed, Self::Accel, Self::Jerk];

    /// Derivative order of the stage.
    #[must_use]
    pub const fn order(self) -> usize {
        match self {
            Self::Position => 0,
            Self::Speed => 1,
            Self::Accel => 2,
            Self::Jerk => 3,
        }
    }

    /// The stage that must be valid before this one.
    #[must_use]
    pub const fn previous(self) -> Option<Self> {
        match self {
            Self::Position => None,
            Self::Speed => Some(Self::Position),
            Self::Accel => Some(Self::Speed),
            Self::Jerk => Some(Self::Accel),
        }
    }

    /// Lower-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::Speed => "speed",
            Self::Accel => "accel",
            Self::Jerk => "jerk",
        }
    }
}

/// Dense solver index of a joint variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VarIndex {
    /// Not part of any built topology.
    #[default]
    Unassigned,
    /// Index into the free-variable vectors.
    Free(usize),
    /// Index into the fixed-variable vectors.
    Fixed(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct JointVar {
    state: [f64; 4],
    fixed: bool,
    index: VarIndex,
}

#[derive(Debug, Clone)]
struct MotionCache {
    jet: TrfJet,
    inv_jet: TrfJet,
    acc_mixed: Trf,
    jerk_mixed: Trf,
}

#[derive(Debug, Clone)]
struct PartialCache {
    der: Vec<Trf>,
    inv_der: Vec<Trf>,
}

/// A joint with its variables and derivative caches.
#[derive(Debug, Clone)]
pub struct Joint {
    name: String,
    kind: JointKind,
    vars: Vec<JointVar>,
    motion: OnceCell<MotionCache>,
    partials: OnceCell<PartialCache>,
}

impl Joint {
    /// Create a joint with all variables at zero and free.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: JointKind) -> Self {
        let count = kind.var_count();
        Self {
            name: name.into(),
            kind,
            vars: vec![JointVar::default(); count],
            motion: OnceCell::new(),
            partials: OnceCell::new(),
        }
    }

    /// Joint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Joint kind.
    #[must_use]
    pub const fn kind(&self) -> &JointKind {
        &self.kind
    }

    /// Replace the kind, e.g. to follow a different track.
    ///
    /// The variable list is resized to the new kind. Variables that exist in
    /// both keep their state and fixed flag; added ones start at zero and
    /// free. Built topologies must be rebuilt afterwards.
    pub fn set_kind(&mut self, kind: JointKind) -> Change {
        self.vars.resize(kind.var_count(), JointVar::default());
        self.kind = kind;
        self.clear_var_indices();
        self.invalidate();
        Change::TOPOLOGY
    }

    /// Number of variables.
    #[must_use]
    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    /// Whether variable `var` is an angle.
    #[must_use]
    pub fn is_angular(&self, var: usize) -> Option<bool> {
        self.kind.is_angular(var)
    }

    /// State of variable `var` at the given stage.
    #[must_use]
    pub fn rate(&self, stage: Stage, var: usize) -> Option<f64> {
        self.vars.get(var).map(|v| v.state[stage.order()])
    }

    /// Value of variable `var`.
    #[must_use]
    pub fn value(&self, var: usize) -> Option<f64> {
        self.rate(Stage::Position, var)
    }

    /// Speed of variable `var`.
    #[must_use]
    pub fn speed(&self, var: usize) -> Option<f64> {
        self.rate(Stage::Speed, var)
    }

    /// Acceleration of variable `var`.
    #[must_use]
    pub fn accel(&self, var: usize) -> Option<f64> {
        self.rate(Stage::Accel, var)
    }

    /// Jerk of variable `var`.
    #[must_use]
    pub fn jerk(&self, var: usize) -> Option<f64> {
        self.rate(Stage::Jerk, var)
    }

    /// Whether variable `var` is fixed (prescribed rather than solved).
    #[must_use]
    pub fn is_fixed(&self, var: usize) -> Option<bool> {
        self.vars.get(var).map(|v| v.fixed)
    }

    /// Solver index of variable `var`.
    #[must_use]
    pub fn var_index(&self, var: usize) -> Option<VarIndex> {
        self.vars.get(var).map(|v| v.index)
    }

    fn check(&self, var: usize) -> Result<()> {
        if var < self.vars.len() {
            Ok(())
        } else {
            Err(KinError::VarIndexOutOfRange {
                joint: self.name.clone(),
                index: var,
                count: self.vars.len(),
            })
        }
    }

    fn invalidate(&mut self) {
        self.motion.take();
        self.partials.take();
    }

    /// Set the state of variable `var` at the given stage.
    pub fn set_rate(&mut self, stage: Stage, var: usize, value: f64) -> Result<Change> {
        self.check(var)?;
        self.vars[var].state[stage.order()] = value;
        if stage == Stage::Position {
            self.invalidate();
        } else {
            self.motion.take();
        }
        Ok(Change::STATE)
    }

    /// Set the value of variable `var`.
    pub fn set_value(&mut self, var: usize, value: f64) -> Result<Change> {
        self.set_rate(Stage::Position, var, value)
    }

    /// Set the speed of variable `var`.
    pub fn set_speed(&mut self, var: usize, value: f64) -> Result<Change> {
        self.set_rate(Stage::Speed, var, value)
    }

    /// Set the acceleration of variable `var`.
    pub fn set_accel(&mut self, var: usize, value: f64) -> Result<Change> {
        self.set_rate(Stage::Accel, var, value)
    }

    /// Set the jerk of variable `var`.
    pub fn set_jerk(&mut self, var: usize, value: f64) -> Result<Change> {
        self.set_rate(Stage::Jerk, var, value)
    }

    /// Fix or free variable `var`. Changes the solve structure.
    pub fn set_fixed(&mut self, var: usize, fixed: bool) -> Result<Change> {
        self.check(var)?;
        if self.vars[var].fixed == fixed {
            return Ok(Change::NONE);
        }
        self.vars[var].fixed = fixed;
        Ok(Change::TOPOLOGY)
    }

    /// Fix or free every variable.
    pub fn set_fixed_all(&mut self, fixed: bool) -> Change {
        let mut change = Change::NONE;
        for var in &mut self.vars {
            if var.fixed != fixed {
                var.fixed = fixed;
                change = Change::TOPOLOGY;
            }
        }
        change
    }

    /// Copy variable values and rates from a joint with the same variable count.
    pub fn copy_state_from(&mut self, other: &Self) -> Change {
        if other.vars.len() != self.vars.len() {
            return Change::NONE;
        }
        for (dst, src) in self.vars.iter_mut().zip(&other.vars) {
            dst.state = src.state;
        }
        self.invalidate();
        Change::STATE
    }

    pub(crate) fn set_var_index(&mut self, var: usize, index: VarIndex) {
        if let Some(v) = self.vars.get_mut(var) {
            v.index = index;
        }
    }

    pub(crate) fn clear_var_indices(&mut self) {
        for var in &mut self.vars {
            var.index = VarIndex::Unassigned;
        }
    }

    /// Elementary transform of variable `var` alone.
    #[must_use]
    pub fn var_trf(&self, var: usize) -> Option<Trf> {
        self.var_derivatives(var).map(|d| d.pos)
    }

    /// First derivative of [`Self::var_trf`] with respect to its variable.
    #[must_use]
    pub fn var_der_trf(&self, var: usize) -> Option<Trf> {
        self.var_derivatives(var).map(|d| d.der1)
    }

    /// Second derivative of [`Self::var_trf`] with respect to its variable.
    #[must_use]
    pub fn var_der2_trf(&self, var: usize) -> Option<Trf> {
        self.var_derivatives(var).map(|d| d.der2)
    }

    /// Third derivative of [`Self::var_trf`] with respect to its variable.
    #[must_use]
    pub fn var_der3_trf(&self, var: usize) -> Option<Trf> {
        self.var_derivatives(var).map(|d| d.der3)
    }

    /// Elementary transform of `var` evaluated at an arbitrary value, with
    /// its derivatives. Useful for numeric checks.
    #[must_use]
    pub fn var_derivatives_at(&self, var: usize, value: f64) -> Option<TrfJet> {
        let factor = *self.kind.factors().get(var)?;
        Some(self.kind.factor_derivatives(factor, value))
    }

    fn var_derivatives(&self, var: usize) -> Option<TrfJet> {
        self.var_derivatives_at(var, self.vars.get(var)?.state[0])
    }

    fn motion(&self) -> &MotionCache {
        self.motion.get_or_init(|| self.compute_motion())
    }

    fn partials(&self) -> &PartialCache {
        self.partials.get_or_init(|| self.compute_partials())
    }

    fn compute_motion(&self) -> MotionCache {
        let mut jet = TrfJet::identity();
        let mut without_acc = TrfJet::identity();
        let mut without_jerk = TrfJet::identity();

        for (factor, var) in self.kind.factors().iter().zip(&self.vars) {
            let d = self.kind.factor_derivatives(*factor, var.state[0]);
            let [_, sd, sa, sj] = var.state;

            let f = TrfJet::new(
                d.pos,
                d.der1 * sd,
                d.der2 * (sd * sd) + d.der1 * sa,
                d.der3 * (sd * sd * sd) + d.der2 * (3.0 * sd * sa) + d.der1 * sj,
            );

            jet = f.compose(&jet);
            without_acc = TrfJet { der2: Trf::zeros(), ..f }.compose(&without_acc);
            without_jerk = TrfJet { der3: Trf::zeros(), ..f }.compose(&without_jerk);
        }

        MotionCache {
            inv_jet: jet.inverse(),
            jet,
            acc_mixed: without_acc.der2,
            jerk_mixed: without_jerk.der3,
        }
    }

    fn compute_partials(&self) -> PartialCache {
        let derivs: Vec<TrfJet> = self
            .kind
            .factors()
            .iter()
            .zip(&self.vars)
            .map(|(factor, var)| self.kind.factor_derivatives(*factor, var.state[0]))
            .collect();

        // lower[i] = T(i-1) · … · T(0)
        let mut lower = Vec::with_capacity(derivs.len());
        let mut acc = Trf::identity();
        for d in &derivs {
            lower.push(acc);
            acc = d.pos * acc;
        }
        let q = transform::inverse(&acc);

        let mut der = vec![Trf::zeros(); derivs.len()];
        let mut upper = Trf::identity();
        for (i, d) in derivs.iter().enumerate().rev() {
            der[i] = upper * d.der1 * lower[i];
            upper *= d.pos;
        }

        let inv_der = der.iter().map(|d| -(q * d * q)).collect();
        PartialCache { der, inv_der }
    }

    /// Composed transform.
    #[must_use]
    pub fn pos(&self) -> Trf {
        self.motion().jet.pos
    }

    /// Inverse of the composed transform.
    #[must_use]
    pub fn inv_pos(&self) -> Trf {
        self.motion().inv_jet.pos
    }

    /// First time derivative of the composed transform.
    #[must_use]
    pub fn der1(&self) -> Trf {
        self.motion().jet.der1
    }

    /// Second time derivative of the composed transform.
    #[must_use]
    pub fn der2(&self) -> Trf {
        self.motion().jet.der2
    }

    /// Third time derivative of the composed transform.
    #[must_use]
    pub fn der3(&self) -> Trf {
        self.motion().jet.der3
    }

    /// First time derivative of the inverse transform.
    #[must_use]
    pub fn inv_der1(&self) -> Trf {
        self.motion().inv_jet.der1
    }

    /// Second time derivative of the inverse transform.
    #[must_use]
    pub fn inv_der2(&self) -> Trf {
        self.motion().inv_jet.der2
    }

    /// Third time derivative of the inverse transform.
    #[must_use]
    pub fn inv_der3(&self) -> Trf {
        self.motion().inv_jet.der3
    }

    /// Composed transform with its time derivatives.
    #[must_use]
    pub fn jet(&self) -> TrfJet {
        self.motion().jet
    }

    /// Inverse transform with its time derivatives.
    #[must_use]
    pub fn inv_jet(&self) -> TrfJet {
        self.motion().inv_jet
    }

    /// Cross-variable part of [`Self::der2`].
    ///
    /// `der2` equals this plus, per variable, the chain of unchanged factors
    /// around `T″(i)·ṡᵢ² + T′(i)·s̈ᵢ`.
    #[must_use]
    pub fn acc_mixed(&self) -> Trf {
        self.motion().acc_mixed
    }

    /// Cross-variable part of [`Self::der3`].
    #[must_use]
    pub fn jerk_mixed(&self) -> Trf {
        self.motion().jerk_mixed
    }

    /// Partial derivative of the composed transform with respect to `var`.
    #[must_use]
    pub fn derivative(&self, var: usize) -> Option<Trf> {
        self.partials().der.get(var).copied()
    }

    /// Partial derivative of the inverse transform with respect to `var`.
    #[must_use]
    pub fn inv_derivative(&self, var: usize) -> Option<Trf> {
        self.partials().inv_der.get(var).copied()
    }

    /// Set the variables so that the joint reproduces `target` as closely as
    /// the kind allows.
    ///
    /// Fixed variables keep their value unless `fixed_also` is set; the
    /// remaining variables are derived with the kept values in place.
    pub fn init_vars_from_pos(&mut self, target: &Trf, fixed_also: bool) -> Change {
        let t = |r: usize, c: usize| target[(r, c)];
        let keep: Vec<bool> = self.vars.iter().map(|v| v.fixed && !fixed_also).collect();
        let mut v: Vec<f64> = self.vars.iter().map(|v| v.state[0]).collect();

        let put = |v: &mut [f64], i: usize, value: f64| {
            if let (Some(false), Some(slot)) = (keep.get(i), v.get_mut(i)) {
                *slot = value;
            }
        };

        match &self.kind {
            JointKind::Slide => put(&mut v, 0, -t(2, 3)),
            JointKind::Revolute => put(&mut v, 0, t(0, 1).atan2(t(0, 0))),
            JointKind::RevSlide => {
                put(&mut v, 0, t(0, 1).atan2(t(0, 0)));
                put(&mut v, 1, -t(2, 3));
            }
            JointKind::Cross => {
                put(&mut v, 0, t(0, 1).atan2(t(0, 0)));
                put(&mut v, 1, (-t(0, 2)).atan2(t(2, 2)));
            }
            JointKind::Ball | JointKind::BallSlide => {
                put(&mut v, 0, t(0, 1).atan2(t(0, 0)));
                let middle = ball_middle_angle(target, v[0]);
                put(&mut v, 1, middle);
                put(&mut v, 2, t(1, 2).atan2(t(2, 2)));
                if v.len() > 3 {
                    put(&mut v, 3, t(2, 3));
                }
            }
            JointKind::Ball2Slide => {
                let along = if t(0, 2).abs() > t(1, 2).abs() {
                    safe_ratio(t(0, 3), t(0, 2))
                } else {
                    safe_ratio(t(1, 3), t(1, 2))
                };
                put(&mut v, 0, along);
                put(&mut v, 1, t(0, 1).atan2(t(0, 0)));
                let middle = ball_middle_angle(target, v[1]);
                put(&mut v, 2, middle);
                put(&mut v, 3, t(1, 2).atan2(t(2, 2)));
                let last = t(2, 2).mul_add(-v[0], t(2, 3));
                put(&mut v, 4, last);
            }
            JointKind::Track(follower) => {
                let origin = transform::offset(&transform::inverse(target));
                put(&mut v, 0, follower.nearest(&origin));

                let m = target * follower.frame_jet(v[0]).pos;
                put(&mut v, 1, (-m[(0, 2)]).atan2(m[(0, 0)]));
                put(&mut v, 2, (-m[(2, 1)]).atan2(m[(1, 1)]));
                put(&mut v, 3, -m[(2, 3)]);
            }
        }

        for (var, value) in self.vars.iter_mut().zip(v) {
            var.state[0] = value;
        }
        self.invalidate();
        Change::STATE
    }
}

/// Middle (Y) angle of a Z-Y-X rotation given the already known Z angle.
fn ball_middle_angle(trf: &Trf, z_angle: f64) -> f64 {
    let (sa, ca) = z_angle.sin_cos();
    if ca.abs() > sa.abs() {
        (-trf[(0, 2)]).atan2(trf[(0, 0)] / ca)
    } else {
        (-trf[(0, 2)]).atan2(trf[(0, 1)] / sa)
    }
}

fn safe_ratio(num: f64, den: f64) -> f64 {
    if den.abs() < 1e-12 { 0.0 } else { num / den }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests;
