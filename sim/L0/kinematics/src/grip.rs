//! Grips: joint mounting points between two bodies.

use crate::ids::{BodyId, JointId};
use crate::transform::{self, Trf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A pair of constant offset frames on two bodies, coupled by a joint.
///
/// `pos1` maps body-1 coordinates into the joint frame on body 1, `pos2`
/// maps body-2 coordinates into the joint frame on body 2. With the joint
/// transform `J` the placements satisfy
///
/// ```text
/// body2.pos = pos2⁻¹ · J · pos1 · body1.pos
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Grip {
    name: String,
    body1: BodyId,
    body2: BodyId,
    pos1: Trf,
    pos2: Trf,
    inv_pos1: Trf,
    inv_pos2: Trf,
    joint: Option<JointId>,
    pub(crate) parent_rel: bool,
    pub(crate) loop_count: usize,
}

impl Grip {
    /// Create a grip between two bodies with identity offsets and no joint.
    #[must_use]
    pub fn new(name: impl Into<String>, body1: BodyId, body2: BodyId) -> Self {
        Self {
            name: name.into(),
            body1,
            body2,
            pos1: Trf::identity(),
            pos2: Trf::identity(),
            inv_pos1: Trf::identity(),
            inv_pos2: Trf::identity(),
            joint: None,
            parent_rel: false,
            loop_count: 0,
        }
    }

    /// Set both offset frames.
    #[must_use]
    pub fn with_offsets(mut self, pos1: Trf, pos2: Trf) -> Self {
        self.set_offsets(pos1, pos2);
        self
    }

    /// Mount a joint.
    #[must_use]
    pub const fn with_joint(mut self, joint: JointId) -> Self {
        self.joint = Some(joint);
        self
    }

    /// Grip name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First body.
    #[must_use]
    pub const fn body1(&self) -> BodyId {
        self.body1
    }

    /// Second body.
    #[must_use]
    pub const fn body2(&self) -> BodyId {
        self.body2
    }

    /// The body on the other side from `body`, if `body` is one of the two.
    #[must_use]
    pub fn other_body(&self, body: BodyId) -> Option<BodyId> {
        if body == self.body1 {
            Some(self.body2)
        } else if body == self.body2 {
            Some(self.body1)
        } else {
            None
        }
    }

    /// Whether the grip connects `a` and `b` (in either order).
    #[must_use]
    pub fn connects(&self, a: BodyId, b: BodyId) -> bool {
        (self.body1 == a && self.body2 == b) || (self.body1 == b && self.body2 == a)
    }

    /// Offset from body 1 into the joint frame.
    #[must_use]
    pub const fn pos1(&self) -> &Trf {
        &self.pos1
    }

    /// Offset from body 2 into the joint frame.
    #[must_use]
    pub const fn pos2(&self) -> &Trf {
        &self.pos2
    }

    /// Inverse of [`Self::pos1`].
    #[must_use]
    pub const fn inv_pos1(&self) -> &Trf {
        &self.inv_pos1
    }

    /// Inverse of [`Self::pos2`].
    #[must_use]
    pub const fn inv_pos2(&self) -> &Trf {
        &self.inv_pos2
    }

    /// Replace both offset frames.
    pub fn set_offsets(&mut self, pos1: Trf, pos2: Trf) {
        self.inv_pos1 = transform::inverse(&pos1);
        self.inv_pos2 = transform::inverse(&pos2);
        self.pos1 = pos1;
        self.pos2 = pos2;
    }

    /// Mounted joint.
    #[must_use]
    pub const fn joint(&self) -> Option<JointId> {
        self.joint
    }

    /// Whether the grip is a spanning-tree edge of the last built topology.
    #[must_use]
    pub const fn is_parent_rel(&self) -> bool {
        self.parent_rel
    }

    /// Number of loops of the last built topology that use this grip.
    #[must_use]
    pub const fn loop_count(&self) -> usize {
        self.loop_count
    }

    pub(crate) fn set_joint(&mut self, joint: Option<JointId>) {
        self.joint = joint;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::transform::{Axis, axis_rotation};
    use approx::assert_relative_eq;

    #[test]
    fn test_other_body() {
        let grip = Grip::new("g", BodyId::new(1), BodyId::new(4));
        assert_eq!(grip.other_body(BodyId::new(1)), Some(BodyId::new(4)));
        assert_eq!(grip.other_body(BodyId::new(4)), Some(BodyId::new(1)));
        assert_eq!(grip.other_body(BodyId::new(2)), None);
        assert!(grip.connects(BodyId::new(4), BodyId::new(1)));
        assert!(!grip.connects(BodyId::new(4), BodyId::new(2)));
    }

    #[test]
    fn test_offsets_cache_inverses() {
        let pos1 = axis_rotation(Axis::Y, 0.3, 0) * transform::translation(1.0, 0.0, 0.0);
        let pos2 = transform::translation(0.0, -2.0, 0.0);
        let grip = Grip::new("g", BodyId::new(0), BodyId::new(1))
            .with_offsets(pos1, pos2)
            .with_joint(JointId::new(3));

        assert_relative_eq!(grip.pos1() * grip.inv_pos1(), Trf::identity(), epsilon = 1e-12);
        assert_relative_eq!(grip.inv_pos2()[(1, 3)], 2.0);
        assert_eq!(grip.joint(), Some(JointId::new(3)));
        assert!(!grip.is_parent_rel());
        assert_eq!(grip.loop_count(), 0);
    }
}
