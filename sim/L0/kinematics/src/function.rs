//! Table-driven couplings between joint variables.
//!
//! A [`JointFunction`] drives one joint variable from another through a
//! scalar table `y = f(x)`. Time derivatives follow the chain rule:
//!
//! ```text
//! y'   = f'(x)·x'
//! y''  = f''(x)·x'² + f'(x)·x''
//! y''' = f'''(x)·x'³ + 3·f''(x)·x'·x'' + f'(x)·x'''
//! ```
//!
//! Functions are stored on the [`Model`](crate::Model) and applied by the
//! solvers before each stage, so the driven variable should be fixed.

use std::fmt::Debug;
use std::sync::Arc;

use crate::ids::JointId;
use crate::joint::Stage;
use crate::model::{Change, Model};
use crate::{KinError, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A scalar function of one variable with three derivatives.
pub trait TableFunction: Debug + Send + Sync {
    /// Smallest tabulated argument.
    fn start_of_range(&self) -> f64;

    /// Largest tabulated argument (one period past the start for closed
    /// tables).
    fn end_of_range(&self) -> f64;

    /// `f(x)`.
    fn value_at(&self, x: f64) -> f64;

    /// `f'(x)`.
    fn derivative_at(&self, x: f64) -> f64;

    /// `f''(x)`.
    fn second_derivative_at(&self, x: f64) -> f64;

    /// `f'''(x)`.
    fn third_derivative_at(&self, x: f64) -> f64;
}

/// Piecewise linear table.
///
/// An open table holds its end values outside the tabulated range, with a
/// zero derivative there. A closed table repeats with its period; the
/// segment from the last point back to the first spans the gap between the
/// last argument and one period past the first.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinearTable {
    xs: Vec<f64>,
    ys: Vec<f64>,
    period: Option<f64>,
}

/// Where an argument falls in a [`LinearTable`].
enum Lookup {
    /// Outside an open table.
    Held(f64),
    /// On the segment `lower..upper` at `x`.
    Segment { x: f64, lower: (f64, f64), upper: (f64, f64) },
}

impl LinearTable {
    /// Table through `points`, which must be finite and strictly increasing
    /// in `x`. A closed table needs a period longer than the tabulated span.
    ///
    /// # Errors
    ///
    /// Returns [`KinError::InvalidConfig`] for fewer than two points,
    /// non-finite or unordered points, or an invalid period.
    pub fn from_points(points: &[(f64, f64)], period: Option<f64>) -> Result<Self> {
        if points.len() < 2 {
            return Err(KinError::invalid_config("a table needs at least two points"));
        }
        if points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(KinError::invalid_config("table points must be finite"));
        }
        if points.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(KinError::invalid_config("table arguments must be strictly increasing"));
        }
        let (xs, ys): (Vec<f64>, Vec<f64>) = points.iter().copied().unzip();

        if let Some(period) = period {
            let span = xs[xs.len() - 1] - xs[0];
            if !period.is_finite() || period <= span {
                return Err(KinError::invalid_config(format!(
                    "period {period} must exceed the tabulated span {span}"
                )));
            }
        }
        Ok(Self { xs, ys, period })
    }

    /// Open table through `points`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_points`].
    pub fn open(points: &[(f64, f64)]) -> Result<Self> {
        Self::from_points(points, None)
    }

    /// Closed table through `points`, repeating every `period`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_points`].
    pub fn closed(points: &[(f64, f64)], period: f64) -> Result<Self> {
        Self::from_points(points, Some(period))
    }

    /// Period of a closed table.
    #[must_use]
    pub const fn period(&self) -> Option<f64> {
        self.period
    }

    /// Number of tabulated points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    /// Always false: a table has at least two points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    fn first(&self) -> (f64, f64) {
        (self.xs[0], self.ys[0])
    }

    fn last(&self) -> (f64, f64) {
        let n = self.xs.len() - 1;
        (self.xs[n], self.ys[n])
    }

    fn lookup(&self, x: f64) -> Lookup {
        let (x0, y0) = self.first();
        let (xn, yn) = self.last();

        let x = match self.period {
            Some(period) => x0 + (x - x0).rem_euclid(period),
            None if x <= x0 => return Lookup::Held(y0),
            None if x >= xn => return Lookup::Held(yn),
            None => x,
        };

        // Zero only for NaN, which then propagates through the first segment.
        let i = self.xs.partition_point(|&v| v <= x).saturating_sub(1);
        if i + 1 < self.xs.len() {
            Lookup::Segment {
                x,
                lower: (self.xs[i], self.ys[i]),
                upper: (self.xs[i + 1], self.ys[i + 1]),
            }
        } else {
            let period = self.period.unwrap_or(0.0);
            Lookup::Segment {
                x,
                lower: (xn, yn),
                upper: (x0 + period, y0),
            }
        }
    }
}

fn slope(lower: (f64, f64), upper: (f64, f64)) -> f64 {
    (upper.1 - lower.1) / (upper.0 - lower.0)
}

impl TableFunction for LinearTable {
    fn start_of_range(&self) -> f64 {
        self.xs[0]
    }

    fn end_of_range(&self) -> f64 {
        match self.period {
            Some(period) => self.xs[0] + period,
            None => self.last().0,
        }
    }

    fn value_at(&self, x: f64) -> f64 {
        match self.lookup(x) {
            Lookup::Held(y) => y,
            Lookup::Segment { x, lower, upper } => lower.1 + slope(lower, upper) * (x - lower.0),
        }
    }

    fn derivative_at(&self, x: f64) -> f64 {
        match self.lookup(x) {
            Lookup::Held(_) => 0.0,
            Lookup::Segment { lower, upper, .. } => slope(lower, upper),
        }
    }

    fn second_derivative_at(&self, _x: f64) -> f64 {
        0.0
    }

    fn third_derivative_at(&self, _x: f64) -> f64 {
        0.0
    }
}

/// One variable of one joint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VarRef {
    /// The joint.
    pub joint: JointId,
    /// Variable index within the joint.
    pub var: usize,
}

impl VarRef {
    /// Variable `var` of `joint`.
    #[must_use]
    pub const fn new(joint: JointId, var: usize) -> Self {
        Self { joint, var }
    }
}

/// Drives `output` from `input` through a table.
#[derive(Debug, Clone)]
pub struct JointFunction {
    name: String,
    input: VarRef,
    output: VarRef,
    table: Arc<dyn TableFunction>,
}

impl JointFunction {
    /// Coupling `output = table(input)`.
    pub fn new(
        name: impl Into<String>,
        input: VarRef,
        output: VarRef,
        table: Arc<dyn TableFunction>,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            output,
            table,
        }
    }

    /// Function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The driving variable.
    #[must_use]
    pub const fn input(&self) -> VarRef {
        self.input
    }

    /// The driven variable.
    #[must_use]
    pub const fn output(&self) -> VarRef {
        self.output
    }

    /// The table.
    #[must_use]
    pub fn table(&self) -> &dyn TableFunction {
        self.table.as_ref()
    }

    /// Driven rate of order `stage` given the input rates `x`, `x'`, `x''`,
    /// `x'''` (only the first `stage.order() + 1` are read).
    #[must_use]
    pub fn output_rate(&self, stage: Stage, x: [f64; 4]) -> f64 {
        let f = self.table.as_ref();
        let [x0, x1, x2, x3] = x;
        match stage {
            Stage::Position => f.value_at(x0),
            Stage::Speed => f.derivative_at(x0) * x1,
            Stage::Accel => f.second_derivative_at(x0) * x1 * x1 + f.derivative_at(x0) * x2,
            Stage::Jerk => {
                f.third_derivative_at(x0) * x1 * x1 * x1
                    + 3.0 * f.second_derivative_at(x0) * x1 * x2
                    + f.derivative_at(x0) * x3
            }
        }
    }

    /// Write the driven rate of order `stage` from the input's current rates.
    ///
    /// # Errors
    ///
    /// Returns an error if either joint or variable no longer exists.
    pub fn apply(&self, model: &mut Model, stage: Stage) -> Result<Change> {
        let input = model.joint_ref(self.input.joint)?;
        let out_of_range = || KinError::VarIndexOutOfRange {
            joint: input.name().to_string(),
            index: self.input.var,
            count: input.var_count(),
        };
        let mut x = [0.0; 4];
        for s in Stage::ALL.into_iter().take(stage.order() + 1) {
            x[s.order()] = input.rate(s, self.input.var).ok_or_else(out_of_range)?;
        }

        let y = self.output_rate(stage, x);
        let change = model.joint_mut_raw(self.output.joint)?.set_rate(stage, self.output.var, y)?;
        model.record(change);
        Ok(change)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::joint::{Joint, JointKind};
    use approx::assert_relative_eq;

    fn ramp() -> LinearTable {
        LinearTable::open(&[(0.0, 0.0), (1.0, 2.0), (3.0, 3.0)]).unwrap()
    }

    #[test]
    fn test_open_table_interpolates_and_holds() {
        let table = ramp();
        assert_eq!(table.len(), 3);
        assert_relative_eq!(table.value_at(0.5), 1.0);
        assert_relative_eq!(table.value_at(2.0), 2.5);
        assert_relative_eq!(table.derivative_at(0.5), 2.0);
        assert_relative_eq!(table.derivative_at(2.0), 0.5);

        assert_eq!(table.value_at(-1.0), 0.0);
        assert_eq!(table.value_at(7.0), 3.0);
        assert_eq!(table.derivative_at(-1.0), 0.0);
        assert_eq!(table.derivative_at(7.0), 0.0);
        assert_eq!(table.end_of_range(), 3.0);
    }

    #[test]
    fn test_closed_table_wraps_through_the_gap() {
        // Gap from x = 3 back to x = 4 (the first point one period on).
        let table = LinearTable::closed(&[(0.0, 0.0), (1.0, 2.0), (3.0, 4.0)], 4.0).unwrap();
        assert_eq!(table.start_of_range(), 0.0);
        assert_eq!(table.end_of_range(), 4.0);

        assert_relative_eq!(table.value_at(3.5), 2.0);
        assert_relative_eq!(table.derivative_at(3.5), -4.0);
        assert_relative_eq!(table.value_at(4.5), table.value_at(0.5));
        assert_relative_eq!(table.value_at(-0.5), 2.0);
        assert_relative_eq!(table.value_at(-3.5), 1.0);
    }

    #[test]
    fn test_table_validation() {
        assert!(LinearTable::open(&[(0.0, 1.0)]).is_err());
        assert!(LinearTable::open(&[(0.0, 1.0), (0.0, 2.0)]).is_err());
        assert!(LinearTable::open(&[(0.0, 1.0), (f64::NAN, 2.0)]).is_err());
        assert!(LinearTable::closed(&[(0.0, 1.0), (2.0, 2.0)], 2.0).is_err());
        assert!(LinearTable::closed(&[(0.0, 1.0), (2.0, 2.0)], 2.5).is_ok());
    }

    /// Table `y = x²` with exact derivatives.
    #[derive(Debug)]
    struct Square;

    impl TableFunction for Square {
        fn start_of_range(&self) -> f64 {
            f64::NEG_INFINITY
        }
        fn end_of_range(&self) -> f64 {
            f64::INFINITY
        }
        fn value_at(&self, x: f64) -> f64 {
            x * x
        }
        fn derivative_at(&self, x: f64) -> f64 {
            2.0 * x
        }
        fn second_derivative_at(&self, _x: f64) -> f64 {
            2.0
        }
        fn third_derivative_at(&self, _x: f64) -> f64 {
            0.0
        }
    }

    #[test]
    fn test_chain_rule_rates() {
        let function = JointFunction::new(
            "square",
            VarRef::new(JointId::new(0), 0),
            VarRef::new(JointId::new(1), 0),
            Arc::new(Square),
        );
        // x(t) = 3 + 2t + t² + t³/3 at t = 0, so y = x² has
        // y' = 2x·x', y'' = 2x'² + 2x·x'', y''' = 6x'·x'' + 2x·x'''.
        let x = [3.0, 2.0, 2.0, 2.0];
        assert_relative_eq!(function.output_rate(Stage::Position, x), 9.0);
        assert_relative_eq!(function.output_rate(Stage::Speed, x), 12.0);
        assert_relative_eq!(function.output_rate(Stage::Accel, x), 20.0);
        assert_relative_eq!(function.output_rate(Stage::Jerk, x), 36.0);
    }

    #[test]
    fn test_apply_writes_driven_variable() {
        let mut model = Model::new("pair");
        let drive = model.add_joint(Joint::new("drive", JointKind::Revolute));
        let follower = model.add_joint(Joint::new("follower", JointKind::Slide));
        model.set_joint_value(drive, 0, 0.5).unwrap();
        model
            .update_joint(drive, |joint| joint.set_speed(0, 3.0))
            .unwrap();

        let function = JointFunction::new(
            "cam",
            VarRef::new(drive, 0),
            VarRef::new(follower, 0),
            Arc::new(ramp()),
        );
        function.apply(&mut model, Stage::Position).unwrap();
        function.apply(&mut model, Stage::Speed).unwrap();
        let joint = model.joint(follower).unwrap();
        assert_relative_eq!(joint.value(0).unwrap(), 1.0);
        assert_relative_eq!(joint.speed(0).unwrap(), 6.0);

        let stray = JointFunction::new(
            "stray",
            VarRef::new(drive, 4),
            VarRef::new(follower, 0),
            Arc::new(ramp()),
        );
        assert!(matches!(
            stray.apply(&mut model, Stage::Position),
            Err(KinError::VarIndexOutOfRange { index: 4, .. })
        ));
    }
}
