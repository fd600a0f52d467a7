//! Solver configuration.
//!
//! Controls the damped Newton position solve: iteration budget, closure
//! tolerances, the angular step bound and the diagonal regularization added
//! to the normal equations.

use crate::{KinError, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Largest correction applied to any angular variable in one Newton step
/// (10 degrees).
pub const DEFAULT_MAX_ANGULAR_STEP: f64 = std::f64::consts::FRAC_PI_4 / 4.5;

/// Configuration for the loop-closure position solver.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverConfig {
    /// Maximum number of Newton iterations.
    pub max_iterations: usize,

    /// Tolerance on the rotational closure residual (radians, small-angle).
    pub rot_tolerance: f64,

    /// Tolerance on the translational closure residual (model length units).
    pub pos_tolerance: f64,

    /// Bound on the largest angular component of one correction step.
    ///
    /// If exceeded, the whole correction vector is scaled down so the
    /// step direction is preserved.
    pub max_angular_step: f64,

    /// Value added to the diagonal of `JᵀJ`.
    ///
    /// Keeps the factorization positive definite when a free variable has
    /// no influence on any loop residual.
    pub regularization: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            rot_tolerance: 1e-10,
            pos_tolerance: 1e-10,
            max_angular_step: DEFAULT_MAX_ANGULAR_STEP,
            regularization: 1e-14,
        }
    }
}

impl SolverConfig {
    /// Tight tolerances for analysis and tests.
    #[must_use]
    pub fn precise() -> Self {
        Self {
            max_iterations: 100,
            rot_tolerance: 1e-13,
            pos_tolerance: 1e-13,
            ..Default::default()
        }
    }

    /// Loose tolerances and a small budget for interactive use.
    #[must_use]
    pub fn realtime() -> Self {
        Self {
            max_iterations: 10,
            rot_tolerance: 1e-6,
            pos_tolerance: 1e-6,
            ..Default::default()
        }
    }

    /// Set the iteration budget.
    #[must_use]
    pub const fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Set both closure tolerances.
    #[must_use]
    pub const fn with_tolerances(mut self, rot: f64, pos: f64) -> Self {
        self.rot_tolerance = rot;
        self.pos_tolerance = pos;
        self
    }

    /// Set the angular step bound.
    #[must_use]
    pub const fn with_max_angular_step(mut self, step: f64) -> Self {
        self.max_angular_step = step;
        self
    }

    /// Set the diagonal regularization.
    #[must_use]
    pub const fn with_regularization(mut self, regularization: f64) -> Self {
        self.regularization = regularization;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(KinError::invalid_config(
                "max_iterations must be at least 1",
            ));
        }

        if !self.rot_tolerance.is_finite() || self.rot_tolerance < 0.0 {
            return Err(KinError::invalid_config(
                "rot_tolerance must be finite and non-negative",
            ));
        }

        if !self.pos_tolerance.is_finite() || self.pos_tolerance < 0.0 {
            return Err(KinError::invalid_config(
                "pos_tolerance must be finite and non-negative",
            ));
        }

        if !self.max_angular_step.is_finite() || self.max_angular_step <= 0.0 {
            return Err(KinError::invalid_config(
                "max_angular_step must be positive",
            ));
        }

        if !self.regularization.is_finite() || self.regularization < 0.0 {
            return Err(KinError::invalid_config(
                "regularization cannot be negative",
            ));
        }

        Ok(())
    }
}
