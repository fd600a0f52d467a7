//! Joint kinds and their elementary factor transforms.

use std::sync::Arc;

use nalgebra::Vector3;

use crate::track::Track;
use crate::transform::{self, Axis, Trf, TrfJet};

/// One elementary transform of a joint's factor chain, driven by a single
/// variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Factor {
    /// Rotation about a coordinate axis.
    Rotation(Axis),
    /// Translation along Z by `sign · value`.
    Slide(f64),
    /// Inverse of the track follower frame at arc length `value`.
    TrackFrame,
    /// Wheel offset from the track: X by `-(wheel + pipe radius)`, Z by `-value`.
    WheelOffset,
}

impl Factor {
    pub(crate) const fn is_angular(self) -> bool {
        matches!(self, Self::Rotation(_))
    }
}

const SLIDE: &[Factor] = &[Factor::Slide(-1.0)];
const REVOLUTE: &[Factor] = &[Factor::Rotation(Axis::Z)];
const REV_SLIDE: &[Factor] = &[Factor::Rotation(Axis::Z), Factor::Slide(-1.0)];
const CROSS: &[Factor] = &[Factor::Rotation(Axis::Z), Factor::Rotation(Axis::Y)];
const BALL: &[Factor] = &[
    Factor::Rotation(Axis::Z),
    Factor::Rotation(Axis::Y),
    Factor::Rotation(Axis::X),
];
const BALL_SLIDE: &[Factor] = &[
    Factor::Rotation(Axis::Z),
    Factor::Rotation(Axis::Y),
    Factor::Rotation(Axis::X),
    Factor::Slide(1.0),
];
const BALL_2_SLIDE: &[Factor] = &[
    Factor::Slide(1.0),
    Factor::Rotation(Axis::Z),
    Factor::Rotation(Axis::Y),
    Factor::Rotation(Axis::X),
    Factor::Slide(1.0),
];
const TRACK: &[Factor] = &[
    Factor::TrackFrame,
    Factor::Rotation(Axis::Y),
    Factor::Rotation(Axis::X),
    Factor::WheelOffset,
];

/// The parametric family a joint belongs to.
///
/// Each kind is a chain of elementary factors; factor 0 is applied first, so
/// the composed transform is `T(n-1) · … · T(1) · T(0)`.
#[derive(Debug, Clone)]
pub enum JointKind {
    /// Translation along Z (1 variable, linear). Positive values move along -Z.
    Slide,
    /// Rotation about Z (1 variable, angular).
    Revolute,
    /// Rotation about Z, then translation along -Z (2 variables).
    RevSlide,
    /// Rotations about Z then Y (2 angular variables).
    Cross,
    /// Rotations about Z, Y, then X (3 angular variables).
    Ball,
    /// Ball followed by translation along +Z (4 variables).
    BallSlide,
    /// Translation along +Z, ball, translation along +Z (5 variables).
    Ball2Slide,
    /// Wheel following a track: arc length, camber, misalignment and
    /// lateral slide (4 variables).
    Track(TrackFollower),
}

impl JointKind {
    /// Create a track-follower kind.
    #[must_use]
    pub fn track(track: Arc<dyn Track>, wheel_radius: f64) -> Self {
        Self::Track(TrackFollower::new(track, wheel_radius))
    }

    /// Number of variables.
    #[must_use]
    pub fn var_count(&self) -> usize {
        self.factors().len()
    }

    /// Short name of the kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Slide => "slide",
            Self::Revolute => "revolute",
            Self::RevSlide => "rev-slide",
            Self::Cross => "cross",
            Self::Ball => "ball",
            Self::BallSlide => "ball-slide",
            Self::Ball2Slide => "ball-2-slide",
            Self::Track(_) => "track",
        }
    }

    /// Whether variable `var` is an angle.
    #[must_use]
    pub fn is_angular(&self, var: usize) -> Option<bool> {
        self.factors().get(var).map(|f| f.is_angular())
    }

    pub(crate) const fn factors(&self) -> &'static [Factor] {
        match self {
            Self::Slide => SLIDE,
            Self::Revolute => REVOLUTE,
            Self::RevSlide => REV_SLIDE,
            Self::Cross => CROSS,
            Self::Ball => BALL,
            Self::BallSlide => BALL_SLIDE,
            Self::Ball2Slide => BALL_2_SLIDE,
            Self::Track(_) => TRACK,
        }
    }

    /// Elementary transform of `factor` at `value` with its first three
    /// derivatives with respect to that value.
    pub(crate) fn factor_derivatives(&self, factor: Factor, value: f64) -> TrfJet {
        match factor {
            Factor::Rotation(axis) => TrfJet::new(
                transform::axis_rotation(axis, value, 0),
                transform::axis_rotation(axis, value, 1),
                transform::axis_rotation(axis, value, 2),
                transform::axis_rotation(axis, value, 3),
            ),
            Factor::Slide(sign) => {
                let mut d1 = Trf::zeros();
                d1[(2, 3)] = sign;
                TrfJet::new(
                    transform::translation(0.0, 0.0, sign * value),
                    d1,
                    Trf::zeros(),
                    Trf::zeros(),
                )
            }
            Factor::TrackFrame => match self {
                Self::Track(follower) => follower.frame_jet(value).inverse(),
                _ => TrfJet::identity(),
            },
            Factor::WheelOffset => {
                let lateral = match self {
                    Self::Track(follower) => follower.lateral_offset(),
                    _ => 0.0,
                };
                let mut d1 = Trf::zeros();
                d1[(2, 3)] = -1.0;
                TrfJet::new(
                    transform::translation(lateral, 0.0, -value),
                    d1,
                    Trf::zeros(),
                    Trf::zeros(),
                )
            }
        }
    }
}

/// Track geometry and wheel size of a track-follower joint.
#[derive(Clone)]
pub struct TrackFollower {
    track: Arc<dyn Track>,
    wheel_radius: f64,
}

impl std::fmt::Debug for TrackFollower {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackFollower")
            .field("wheel_radius", &self.wheel_radius)
            .field("pipe_radius", &self.track.pipe_radius())
            .field("length", &self.track.length())
            .finish_non_exhaustive()
    }
}

impl TrackFollower {
    /// Create a follower for `track` with the given wheel radius.
    #[must_use]
    pub fn new(track: Arc<dyn Track>, wheel_radius: f64) -> Self {
        Self {
            track,
            wheel_radius,
        }
    }

    /// The followed track.
    #[must_use]
    pub fn track(&self) -> &Arc<dyn Track> {
        &self.track
    }

    /// Wheel radius.
    #[must_use]
    pub const fn wheel_radius(&self) -> f64 {
        self.wheel_radius
    }

    fn lateral_offset(&self) -> f64 {
        -(self.wheel_radius + self.track.pipe_radius())
    }

    /// Follower frame at arc length `s` and its derivatives with respect to `s`.
    ///
    /// The frame has columns `[n, v, n × v]` and origin `p`, with `n` the
    /// track's X-direction, `v` its direction and `p` its point.
    #[must_use]
    pub fn frame_jet(&self, s: f64) -> TrfJet {
        let trk = &self.track;

        let (p, v, a) = (trk.point(s), trk.dir(s), trk.acc(s));
        let (j, sn) = (trk.jerk(s), trk.snap(s));
        let (n0, n1) = (trk.x_dir(s), trk.x_dir_der(s));
        let (n2, n3) = (trk.x_dir_der2(s), trk.x_dir_der3(s));

        let w0 = n0.cross(&v);
        let w1 = n1.cross(&v) + n0.cross(&a);
        let w2 = n2.cross(&v) + 2.0 * n1.cross(&a) + n0.cross(&j);
        let w3 = n3.cross(&v) + 3.0 * n2.cross(&a) + 3.0 * n1.cross(&j) + n0.cross(&sn);

        TrfJet::new(
            transform::from_columns(&n0, &v, &w0, &p, false),
            transform::from_columns(&n1, &a, &w1, &v, true),
            transform::from_columns(&n2, &j, &w2, &a, true),
            transform::from_columns(&n3, &sn, &w3, &j, true),
        )
    }

    /// Arc length nearest to a point given in track coordinates.
    pub(crate) fn nearest(&self, p: &Vector3<f64>) -> f64 {
        self.track.find_point(p, None).0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp, clippy::panic)]
mod tests {
    use super::*;
    use crate::track::CircleTrack;
    use approx::assert_relative_eq;

    fn circle_kind() -> JointKind {
        JointKind::track(
            Arc::new(CircleTrack::new(Vector3::zeros(), Vector3::z(), 2.0).with_pipe_radius(0.05)),
            0.25,
        )
    }

    #[test]
    fn test_var_counts_and_angular_flags() {
        assert_eq!(JointKind::Slide.var_count(), 1);
        assert_eq!(JointKind::Revolute.var_count(), 1);
        assert_eq!(JointKind::RevSlide.var_count(), 2);
        assert_eq!(JointKind::Cross.var_count(), 2);
        assert_eq!(JointKind::Ball.var_count(), 3);
        assert_eq!(JointKind::BallSlide.var_count(), 4);
        assert_eq!(JointKind::Ball2Slide.var_count(), 5);
        assert_eq!(circle_kind().var_count(), 4);

        assert_eq!(JointKind::Revolute.is_angular(0), Some(true));
        assert_eq!(JointKind::Slide.is_angular(0), Some(false));
        assert_eq!(JointKind::Slide.is_angular(1), None);

        let track = circle_kind();
        let flags: Vec<bool> = (0..4).filter_map(|i| track.is_angular(i)).collect();
        assert_eq!(flags, vec![false, true, true, false]);

        let ball2: Vec<bool> = (0..5)
            .filter_map(|i| JointKind::Ball2Slide.is_angular(i))
            .collect();
        assert_eq!(ball2, vec![false, true, true, true, false]);
    }

    #[test]
    fn test_slide_conventions() {
        let d = JointKind::Slide.factor_derivatives(Factor::Slide(-1.0), 0.4);
        assert_eq!(d.pos, transform::translation(0.0, 0.0, -0.4));
        assert_eq!(d.der1[(2, 3)], -1.0);
        assert_eq!(d.der2, Trf::zeros());
    }

    #[test]
    fn test_frame_is_orthonormal_and_inverse_consistent() {
        let kind = circle_kind();
        let JointKind::Track(follower) = &kind else {
            panic!("expected a track kind");
        };
        let frame = follower.frame_jet(1.1);
        let rot = frame.pos.fixed_view::<3, 3>(0, 0).into_owned();
        assert_relative_eq!(rot.transpose() * rot, nalgebra::Matrix3::identity(), epsilon = 1e-12);
        assert_relative_eq!(rot.determinant(), 1.0, epsilon = 1e-12);

        let inv = kind.factor_derivatives(Factor::TrackFrame, 1.1);
        assert_relative_eq!(inv.pos * frame.pos, Trf::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_wheel_offset_uses_pipe_radius() {
        let kind = circle_kind();
        let d = kind.factor_derivatives(Factor::WheelOffset, 0.2);
        assert_relative_eq!(d.pos[(0, 3)], -0.3, epsilon = 1e-15);
        assert_relative_eq!(d.pos[(2, 3)], -0.2, epsilon = 1e-15);
    }
}
