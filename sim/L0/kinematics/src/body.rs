//! Rigid bodies of a mechanism.
//!
//! A body carries its placement `pos`, which maps world coordinates into
//! body-local coordinates, and the first three time derivatives of that
//! placement. The solver writes all four during propagation; callers may
//! set them directly (e.g. to place the root body).

use nalgebra::Vector3;

use crate::ids::GripId;
use crate::transform::{self, Trf, TrfJet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A rigid body.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Body {
    name: String,
    pos: Trf,
    speed: Trf,
    accel: Trf,
    jerk: Trf,
    pub(crate) tree_level: Option<usize>,
    pub(crate) grips: Vec<GripId>,
}

impl Body {
    /// Create a body at the world origin, at rest.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_pos(name, Trf::identity())
    }

    /// Create a body with the given placement, at rest.
    #[must_use]
    pub fn with_pos(name: impl Into<String>, pos: Trf) -> Self {
        Self {
            name: name.into(),
            pos,
            speed: Trf::zeros(),
            accel: Trf::zeros(),
            jerk: Trf::zeros(),
            tree_level: None,
            grips: Vec::new(),
        }
    }

    /// Body name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placement (world to body-local).
    #[must_use]
    pub const fn pos(&self) -> &Trf {
        &self.pos
    }

    /// First time derivative of the placement.
    #[must_use]
    pub const fn speed(&self) -> &Trf {
        &self.speed
    }

    /// Second time derivative of the placement.
    #[must_use]
    pub const fn accel(&self) -> &Trf {
        &self.accel
    }

    /// Third time derivative of the placement.
    #[must_use]
    pub const fn jerk(&self) -> &Trf {
        &self.jerk
    }

    /// Placement with its time derivatives.
    #[must_use]
    pub const fn jet(&self) -> TrfJet {
        TrfJet::new(self.pos, self.speed, self.accel, self.jerk)
    }

    /// Set the placement.
    pub fn set_pos(&mut self, pos: Trf) {
        self.pos = pos;
    }

    /// Set the first time derivative of the placement.
    pub fn set_speed(&mut self, speed: Trf) {
        self.speed = speed;
    }

    /// Set the second time derivative of the placement.
    pub fn set_accel(&mut self, accel: Trf) {
        self.accel = accel;
    }

    /// Set the third time derivative of the placement.
    pub fn set_jerk(&mut self, jerk: Trf) {
        self.jerk = jerk;
    }

    pub(crate) fn set_jet(&mut self, jet: &TrfJet, order: usize) {
        self.pos = jet.pos;
        if order >= 1 {
            self.speed = jet.der1;
        }
        if order >= 2 {
            self.accel = jet.der2;
        }
        if order >= 3 {
            self.jerk = jet.der3;
        }
    }

    /// Depth in the spanning tree of the last built topology, `None` if the
    /// body was not reached.
    #[must_use]
    pub const fn tree_level(&self) -> Option<usize> {
        self.tree_level
    }

    /// Grips attached to this body.
    #[must_use]
    pub fn grips(&self) -> &[GripId] {
        &self.grips
    }

    fn inv_jet(&self) -> TrfJet {
        self.jet().inverse()
    }

    /// Inverse placement (body-local to world).
    #[must_use]
    pub fn inv_pos(&self) -> Trf {
        transform::inverse(&self.pos)
    }

    /// Time derivative of [`Self::inv_pos`].
    #[must_use]
    pub fn inv_speed(&self) -> Trf {
        self.inv_jet().der1
    }

    /// Second time derivative of [`Self::inv_pos`].
    #[must_use]
    pub fn inv_accel(&self) -> Trf {
        self.inv_jet().der2
    }

    /// Third time derivative of [`Self::inv_pos`].
    #[must_use]
    pub fn inv_jerk(&self) -> Trf {
        self.inv_jet().der3
    }

    /// Absolute placement of the body frame in world coordinates.
    #[must_use]
    pub fn abs_pos(&self) -> Trf {
        self.inv_pos()
    }

    /// World position of the body origin.
    #[must_use]
    pub fn abs_origin(&self) -> Vector3<f64> {
        transform::offset(&self.inv_pos())
    }

    /// World velocity of the body origin.
    #[must_use]
    pub fn abs_origin_speed(&self) -> Vector3<f64> {
        transform::offset(&self.inv_speed())
    }

    /// Shift the placement's translation.
    pub fn translate(&mut self, offset: &Vector3<f64>) {
        let mut column = self.pos.fixed_view_mut::<3, 1>(0, 3);
        column += offset;
    }

    /// Right-multiply the placement and its derivatives by `trf`.
    pub fn transform(&mut self, trf: &Trf) {
        self.pos *= trf;
        self.speed *= trf;
        self.accel *= trf;
        self.jerk *= trf;
    }
}
