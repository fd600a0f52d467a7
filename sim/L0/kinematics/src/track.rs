//! Track geometry consumed by track-following joints.
//!
//! A [`Track`] is a space curve parameterized by arc length `s`. Besides the
//! point and its first three derivatives it provides a transverse
//! *X-direction* field: a unit vector perpendicular to the travel direction
//! that fixes the roll of the follower frame. The follower frame at `s` has
//! columns `[x_dir, dir, x_dir × dir]` and origin `point`.
//!
//! Higher derivatives that a geometry cannot provide in closed form default
//! to central differences of the next lower derivative.
//!
//! # Example
//!
//! ```
//! use sim_kinematics::{CircleTrack, Track};
//! use nalgebra::Vector3;
//! use std::f64::consts::PI;
//!
//! let track = CircleTrack::new(Vector3::zeros(), Vector3::z(), 2.0);
//! let a = track.point(0.0);
//! let b = track.point(PI * 2.0);
//! assert!((a + b).norm() < 1e-12);
//! ```

use nalgebra::Vector3;

/// Step used by the finite-difference defaults.
const DIFF_STEP: f64 = 1e-4;

/// A curve followed by a track joint, parameterized by arc length.
pub trait Track: std::fmt::Debug + Send + Sync {
    /// Point at arc length `s`.
    fn point(&self, s: f64) -> Vector3<f64>;

    /// Unit direction (first derivative of [`Self::point`]).
    fn dir(&self, s: f64) -> Vector3<f64>;

    /// Second derivative of [`Self::point`].
    fn acc(&self, s: f64) -> Vector3<f64>;

    /// Third derivative of [`Self::point`].
    fn jerk(&self, s: f64) -> Vector3<f64>;

    /// Fourth derivative of [`Self::point`].
    fn snap(&self, s: f64) -> Vector3<f64> {
        (self.jerk(s + DIFF_STEP) - self.jerk(s - DIFF_STEP)) / (2.0 * DIFF_STEP)
    }

    /// Transverse X-direction at `s`.
    fn x_dir(&self, s: f64) -> Vector3<f64>;

    /// Derivative of [`Self::x_dir`].
    fn x_dir_der(&self, s: f64) -> Vector3<f64>;

    /// Second derivative of [`Self::x_dir`].
    fn x_dir_der2(&self, s: f64) -> Vector3<f64> {
        (self.x_dir_der(s + DIFF_STEP) - self.x_dir_der(s - DIFF_STEP)) / (2.0 * DIFF_STEP)
    }

    /// Third derivative of [`Self::x_dir`].
    fn x_dir_der3(&self, s: f64) -> Vector3<f64> {
        (self.x_dir_der2(s + DIFF_STEP) - self.x_dir_der2(s - DIFF_STEP)) / (2.0 * DIFF_STEP)
    }

    /// Arc length of the point nearest to `p` and that point.
    ///
    /// `window` restricts the search to `[min_s, max_s]`.
    fn find_point(&self, p: &Vector3<f64>, window: Option<(f64, f64)>) -> (f64, Vector3<f64>);

    /// Radius of the pipe the wheels run on.
    fn pipe_radius(&self) -> f64;

    /// Whether the track closes on itself.
    fn is_closed(&self) -> bool;

    /// Total arc length.
    fn length(&self) -> f64;
}

/// A circular track, exact in every derivative.
///
/// The X-direction is the plane normal, so the follower frame's third axis
/// points toward the center.
#[derive(Debug, Clone, PartialEq)]
pub struct CircleTrack {
    center: Vector3<f64>,
    normal: Vector3<f64>,
    u: Vector3<f64>,
    w: Vector3<f64>,
    radius: f64,
    pipe_radius: f64,
}

impl CircleTrack {
    /// Create a circle around `center` in the plane with the given normal.
    ///
    /// Arc length zero lies on the first in-plane axis; travel is
    /// counterclockwise about `normal`.
    #[must_use]
    pub fn new(center: Vector3<f64>, normal: Vector3<f64>, radius: f64) -> Self {
        let n = normal.normalize();
        let reference = if n.z.abs() < 0.9 {
            Vector3::z()
        } else {
            Vector3::x()
        };
        let w = n.cross(&reference).normalize();
        let u = w.cross(&n);

        Self {
            center,
            normal: n,
            u,
            w,
            radius,
            pipe_radius: 0.0,
        }
    }

    /// Set the pipe radius.
    #[must_use]
    pub const fn with_pipe_radius(mut self, pipe_radius: f64) -> Self {
        self.pipe_radius = pipe_radius;
        self
    }

    /// Circle radius.
    #[must_use]
    pub const fn radius(&self) -> f64 {
        self.radius
    }

    /// Circle center.
    #[must_use]
    pub const fn center(&self) -> Vector3<f64> {
        self.center
    }

    fn radial(&self, s: f64) -> Vector3<f64> {
        let (sin, cos) = (s / self.radius).sin_cos();
        self.u * cos + self.w * sin
    }

    fn tangential(&self, s: f64) -> Vector3<f64> {
        let (sin, cos) = (s / self.radius).sin_cos();
        self.w * cos - self.u * sin
    }
}

impl Track for CircleTrack {
    fn point(&self, s: f64) -> Vector3<f64> {
        self.center + self.radial(s) * self.radius
    }

    fn dir(&self, s: f64) -> Vector3<f64> {
        self.tangential(s)
    }

    fn acc(&self, s: f64) -> Vector3<f64> {
        -self.radial(s) / self.radius
    }

    fn jerk(&self, s: f64) -> Vector3<f64> {
        -self.tangential(s) / (self.radius * self.radius)
    }

    fn snap(&self, s: f64) -> Vector3<f64> {
        self.radial(s) / self.radius.powi(3)
    }

    fn x_dir(&self, _s: f64) -> Vector3<f64> {
        self.normal
    }

    fn x_dir_der(&self, _s: f64) -> Vector3<f64> {
        Vector3::zeros()
    }

    fn x_dir_der2(&self, _s: f64) -> Vector3<f64> {
        Vector3::zeros()
    }

    fn x_dir_der3(&self, _s: f64) -> Vector3<f64> {
        Vector3::zeros()
    }

    fn find_point(&self, p: &Vector3<f64>, window: Option<(f64, f64)>) -> (f64, Vector3<f64>) {
        let q = p - self.center;
        let angle = q.dot(&self.w).atan2(q.dot(&self.u));
        let len = self.length();
        let mut s = (angle * self.radius).rem_euclid(len);

        if let Some((min_s, max_s)) = window {
            // Pick the periodic image closest to the window, then clamp.
            let mid = 0.5 * (min_s + max_s);
            s += ((mid - s) / len).round() * len;
            s = s.clamp(min_s.min(max_s), max_s.max(min_s));
        }

        (s, self.point(s))
    }

    fn pipe_radius(&self) -> f64 {
        self.pipe_radius
    }

    fn is_closed(&self) -> bool {
        true
    }

    fn length(&self) -> f64 {
        std::f64::consts::TAU * self.radius
    }
}
